//! Staple freshness
//!
//! A response is worth refreshing once more than half of its validity window
//! has elapsed. The window ends at `nextUpdate`, or earlier if the delegated
//! responder certificate that signed it expires first.

use crate::response::OcspResponse;
use chrono::{DateTime, Utc};

impl OcspResponse {
    /// End of the window in which this response may be served
    ///
    /// `None` when the response carries no `nextUpdate`.
    pub fn effective_expiry(&self) -> Option<DateTime<Utc>> {
        let next_update = self.next_update?;
        match &self.responder_certificate {
            Some(responder) if responder.not_after < next_update => Some(responder.not_after),
            _ => Some(next_update),
        }
    }

    /// Midpoint of the validity window, after which a new response should be fetched
    pub fn refresh_at(&self) -> Option<DateTime<Utc>> {
        let expiry = self.effective_expiry()?;
        Some(self.this_update + (expiry - self.this_update) / 2)
    }
}

/// Whether `response` can still be served at `now` without asking the responder
///
/// A response without `nextUpdate` is never fresh.
pub fn is_fresh(response: &OcspResponse, now: DateTime<Utc>) -> bool {
    response
        .refresh_at()
        .is_some_and(|refresh_at| now < refresh_at)
}
