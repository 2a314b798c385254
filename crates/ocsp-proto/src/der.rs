//! DER encoding and decoding helpers
//!
//! OCSP messages are small, fixed-shape ASN.1 structures. Encoding is done with
//! a handful of TLV builders; decoding walks elements with `asn1-rs` and keeps
//! the raw encoding of every element around, which signature verification needs
//! (the signed `tbsResponseData` must be checked byte-for-byte).

use crate::error::OcspError;
use asn1_rs::{Any, Class, FromDer};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Universal tag numbers used by OCSP
pub mod tag {
    pub const INTEGER: u32 = 0x02;
    pub const BIT_STRING: u32 = 0x03;
    pub const OCTET_STRING: u32 = 0x04;
    pub const NULL: u32 = 0x05;
    pub const OID: u32 = 0x06;
    pub const ENUMERATED: u32 = 0x0A;
    pub const SEQUENCE: u32 = 0x10;
    pub const GENERALIZED_TIME: u32 = 0x18;
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a SEQUENCE
pub fn der_sequence(contents: &[u8]) -> Vec<u8> {
    der_tlv(0x30, contents)
}

/// Encode an OCTET STRING
pub fn der_octet_string(contents: &[u8]) -> Vec<u8> {
    der_tlv(0x04, contents)
}

/// Encode a BIT STRING with no unused bits
pub fn der_bit_string(contents: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(contents.len() + 1);
    value.push(0x00);
    value.extend_from_slice(contents);
    der_tlv(0x03, &value)
}

/// INTEGER content octets for a big-endian magnitude
///
/// A leading zero is added when the high bit is set so the value stays positive.
pub fn integer_content(value: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(value.len() + 1);
    if value.first().map_or(true, |&first| first & 0x80 != 0) {
        content.push(0x00);
    }
    content.extend_from_slice(value);
    content
}

/// Encode an INTEGER from big-endian magnitude bytes
pub fn der_integer(value: &[u8]) -> Vec<u8> {
    der_tlv(0x02, &integer_content(value))
}

/// Encode an ENUMERATED with a single-byte value
pub fn der_enumerated(value: u8) -> Vec<u8> {
    der_tlv(0x0A, &[value])
}

/// Encode an OBJECT IDENTIFIER
pub fn der_oid(components: &[u64]) -> Vec<u8> {
    der_tlv(0x06, &oid_content(components))
}

/// Content octets of an OBJECT IDENTIFIER (no tag/length)
///
/// Used both for encoding and for comparing decoded OIDs without
/// materializing an `Oid` value.
pub fn oid_content(components: &[u64]) -> Vec<u8> {
    if components.len() < 2 {
        return Vec::new();
    }

    let mut encoded = Vec::new();

    // First two components are encoded as 40*v1 + v2
    encoded.extend_from_slice(&encode_base128(40 * components[0] + components[1]));

    for &component in &components[2..] {
        encoded.extend_from_slice(&encode_base128(component));
    }

    encoded
}

/// Encode NULL
pub fn der_null() -> Vec<u8> {
    vec![0x05, 0x00]
}

/// Encode a GeneralizedTime (`YYYYMMDDHHMMSSZ`)
pub fn der_generalized_time(time: DateTime<Utc>) -> Vec<u8> {
    der_tlv(0x18, time.format("%Y%m%d%H%M%SZ").to_string().as_bytes())
}

/// Encode context-specific explicit (constructed) tag
pub fn der_explicit_context(tag: u8, contents: &[u8]) -> Vec<u8> {
    der_tlv(0xA0 | tag, contents)
}

/// Encode context-specific implicit primitive tag
pub fn der_implicit_context(tag: u8, contents: &[u8]) -> Vec<u8> {
    der_tlv(0x80 | tag, contents)
}

/// Encode Tag-Length-Value
pub fn der_tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut result = vec![tag];
    result.extend_from_slice(&der_length(contents.len()));
    result.extend_from_slice(contents);
    result
}

/// Encode DER length
fn der_length(length: usize) -> Vec<u8> {
    if length < 128 {
        vec![length as u8]
    } else {
        let mut length_bytes = Vec::new();
        let mut len = length;
        while len > 0 {
            length_bytes.insert(0, (len & 0xFF) as u8);
            len >>= 8;
        }
        let mut result = vec![0x80 | length_bytes.len() as u8];
        result.extend_from_slice(&length_bytes);
        result
    }
}

/// Encode value in base-128 (for OID components)
fn encode_base128(mut value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }

    let mut result = Vec::new();
    let mut first = true;

    while value > 0 {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if !first {
            byte |= 0x80;
        }

        result.insert(0, byte);
        first = false;
    }

    result
}

// ============================================================================
// Decoding
// ============================================================================

/// A decoded DER element that still references its raw encoding
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    /// Tag number
    pub tag: u32,
    /// Tag class
    pub class: Class,
    /// Constructed (as opposed to primitive) encoding
    pub constructed: bool,
    /// Content octets
    pub contents: &'a [u8],
    /// Full TLV encoding
    pub raw: &'a [u8],
}

impl<'a> Element<'a> {
    /// Whether this is a universal element with the given tag
    pub fn is_universal(&self, tag: u32) -> bool {
        self.class == Class::Universal && self.tag == tag
    }

    /// Whether this is a context-specific element `[tag]`
    pub fn is_context(&self, tag: u32) -> bool {
        self.class == Class::ContextSpecific && self.tag == tag
    }

    /// Require a universal element with the given tag
    pub fn expect(self, tag: u32, what: &str) -> Result<Self, OcspError> {
        if self.is_universal(tag) {
            Ok(self)
        } else {
            Err(OcspError::ParseError(format!(
                "{} has unexpected tag {:?}/{}",
                what, self.class, self.tag
            )))
        }
    }

    /// Decode the children of a constructed element
    pub fn children(&self) -> Result<Vec<Element<'a>>, OcspError> {
        if !self.constructed {
            return Err(OcspError::ParseError(format!(
                "element with tag {} is not constructed",
                self.tag
            )));
        }
        read_all(self.contents)
    }

    /// Decode the single element wrapped by an EXPLICIT tag
    pub fn explicit_inner(&self) -> Result<Element<'a>, OcspError> {
        let (inner, rest) = read_element(self.contents)?;
        if !rest.is_empty() {
            return Err(OcspError::ParseError(
                "trailing data inside explicit tag".to_string(),
            ));
        }
        Ok(inner)
    }

    /// Compare an OBJECT IDENTIFIER element against dotted components
    pub fn is_oid(&self, components: &[u64]) -> bool {
        self.is_universal(tag::OID) && self.contents == oid_content(components).as_slice()
    }

    /// Content of a BIT STRING with no unused bits
    pub fn bit_string_bytes(&self) -> Result<&'a [u8], OcspError> {
        let element = self.expect(tag::BIT_STRING, "BIT STRING")?;
        match element.contents.split_first() {
            Some((0, rest)) => Ok(rest),
            Some((unused, _)) => Err(OcspError::ParseError(format!(
                "BIT STRING has {} unused bits",
                unused
            ))),
            None => Err(OcspError::ParseError("empty BIT STRING".to_string())),
        }
    }

    /// Value of a small non-negative INTEGER or ENUMERATED
    pub fn small_uint(&self) -> Result<u32, OcspError> {
        if self.contents.is_empty() || self.contents.len() > 4 || self.contents[0] & 0x80 != 0 {
            return Err(OcspError::ParseError(format!(
                "invalid integer encoding of length {}",
                self.contents.len()
            )));
        }
        Ok(self
            .contents
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte)))
    }

    /// Decode a GeneralizedTime element
    pub fn generalized_time(&self) -> Result<DateTime<Utc>, OcspError> {
        let element = self.expect(tag::GENERALIZED_TIME, "GeneralizedTime")?;
        let text = std::str::from_utf8(element.contents)
            .map_err(|_| OcspError::ParseError("GeneralizedTime is not ASCII".to_string()))?;
        parse_generalized_time(text)
    }
}

/// Read one element from the front of `input`, returning it and the remainder
pub fn read_element(input: &[u8]) -> Result<(Element<'_>, &[u8]), OcspError> {
    let (rest, any) = Any::from_der(input)
        .map_err(|e| OcspError::Der(format!("{:?}", e)))?;
    let raw = &input[..input.len() - rest.len()];

    Ok((
        Element {
            tag: any.header.tag().0,
            class: any.header.class(),
            constructed: any.header.is_constructed(),
            contents: any.data,
            raw,
        },
        rest,
    ))
}

/// Read exactly one element spanning all of `input`
pub fn read_single(input: &[u8]) -> Result<Element<'_>, OcspError> {
    let (element, rest) = read_element(input)?;
    if !rest.is_empty() {
        return Err(OcspError::Der(format!(
            "{} bytes of trailing data",
            rest.len()
        )));
    }
    Ok(element)
}

/// Read every element in `input`
pub fn read_all(mut input: &[u8]) -> Result<Vec<Element<'_>>, OcspError> {
    let mut elements = Vec::new();
    while !input.is_empty() {
        let (element, rest) = read_element(input)?;
        elements.push(element);
        input = rest;
    }
    Ok(elements)
}

/// Parse ASN.1 GeneralizedTime text (`YYYYMMDDHHMMSS[.fff]Z`)
pub fn parse_generalized_time(text: &str) -> Result<DateTime<Utc>, OcspError> {
    let trimmed = text.strip_suffix('Z').ok_or_else(|| {
        OcspError::ParseError(format!("GeneralizedTime '{}' is not in UTC", text))
    })?;

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y%m%d%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y%m%d%H%M%S%.f"))
        .map_err(|e| {
            OcspError::ParseError(format!("Failed to parse GeneralizedTime '{}': {}", text, e))
        })?;

    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_der_length_long_form() {
        let contents = vec![0u8; 300];
        let encoded = der_octet_string(&contents);
        assert_eq!(&encoded[..4], &[0x04, 0x82, 0x01, 0x2C]);
        assert_eq!(encoded.len(), 304);
    }

    #[test]
    fn test_der_oid_sha256() {
        let encoded = der_oid(&[2, 16, 840, 1, 101, 3, 4, 2, 1]);
        assert_eq!(
            encoded,
            vec![0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01]
        );
    }

    #[test]
    fn test_der_integer_padding() {
        assert_eq!(der_integer(&[0x80]), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(der_integer(&[0x7F]), vec![0x02, 0x01, 0x7F]);
        assert_eq!(der_integer(&[]), vec![0x02, 0x01, 0x00]);
        assert_eq!(integer_content(&[0x80, 0x01]), vec![0x00, 0x80, 0x01]);
    }

    #[test]
    fn test_read_nested_elements() {
        let inner = [der_integer(&[0x05]), der_null()].concat();
        let encoded = der_sequence(&inner);

        let outer = read_single(&encoded).unwrap();
        assert!(outer.is_universal(tag::SEQUENCE));
        assert_eq!(outer.raw, encoded.as_slice());

        let children = outer.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].small_uint().unwrap(), 5);
        assert!(children[1].is_universal(tag::NULL));
    }

    #[test]
    fn test_explicit_context_inner() {
        let wrapped = der_explicit_context(0, &der_integer(&[0x01]));
        let element = read_single(&wrapped).unwrap();
        assert!(element.is_context(0));
        assert!(element.constructed);
        assert_eq!(element.explicit_inner().unwrap().small_uint().unwrap(), 1);
    }

    #[test]
    fn test_read_single_rejects_trailing_data() {
        let mut encoded = der_null();
        encoded.push(0x00);
        assert!(read_single(&encoded).is_err());
    }

    #[test]
    fn test_generalized_time() {
        let time = Utc.with_ymd_and_hms(2024, 3, 5, 10, 20, 30).unwrap();
        let encoded = der_generalized_time(time);
        let element = read_single(&encoded).unwrap();
        assert_eq!(element.generalized_time().unwrap(), time);

        let fractional = parse_generalized_time("20240305102030.5Z").unwrap();
        assert_eq!(fractional.timestamp(), time.timestamp());

        assert!(parse_generalized_time("20240305102030+0100").is_err());
    }

    #[test]
    fn test_is_oid() {
        let encoded = der_oid(&[1, 3, 6, 1, 5, 5, 7, 48, 1, 1]);
        let element = read_single(&encoded).unwrap();
        assert!(element.is_oid(&[1, 3, 6, 1, 5, 5, 7, 48, 1, 1]));
        assert!(!element.is_oid(&[1, 3, 6, 1, 5, 5, 7, 48, 1, 2]));
    }
}
