//! End-to-end stapling behavior against a mock responder

mod common;

use chrono::Duration;
use common::{MockTransport, RecordingStorage};
use ocsp_proto::testutil::{now, TestPki, DEFAULT_ISSUER_URL, DEFAULT_OCSP_URL};
use ocsp_stapler::transport::OCSP_REQUEST_CONTENT_TYPE;
use ocsp_stapler::{
    ocsp_staple_key, ErrorKind, FetchError, ManagedCertificate, StapleError, StapleManager,
    StapleSource, StaplingConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Harness {
    manager: Arc<StapleManager>,
    transport: Arc<MockTransport>,
    storage: Arc<RecordingStorage>,
}

fn harness(config: StaplingConfig, transport: MockTransport, storage: RecordingStorage) -> Harness {
    let transport = Arc::new(transport);
    let storage = Arc::new(storage);
    let manager = StapleManager::new(config, transport.clone(), storage.clone());
    Harness {
        manager: Arc::new(manager),
        transport,
        storage,
    }
}

fn default_harness(transport: MockTransport) -> Harness {
    harness(StaplingConfig::default(), transport, RecordingStorage::new())
}

fn managed(pki: &TestPki) -> ManagedCertificate {
    ManagedCertificate::from_pem(&pki.bundle_pem()).unwrap()
}

fn staple_key(pki: &TestPki) -> String {
    let cert = managed(pki);
    ocsp_staple_key(cert.names(), &pki.bundle_pem())
}

#[tokio::test]
async fn test_fetches_and_persists_good_response() {
    let pki = TestPki::builder().build();
    let body = pki.response().build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, body.clone()));

    let mut cert = managed(&pki);
    let outcome = h
        .manager
        .ensure_stapled(&cert, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.source, StapleSource::Responder);
    assert_eq!(outcome.staple.as_deref(), Some(body.as_slice()));
    assert!(outcome.response.as_ref().unwrap().is_good());

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].url, DEFAULT_OCSP_URL);
    assert_eq!(
        calls[0].content_type.as_deref(),
        Some(OCSP_REQUEST_CONTENT_TYPE)
    );

    assert_eq!(h.storage.stores(), 1);
    assert_eq!(h.storage.get(&staple_key(&pki)).await, Some(body.clone()));

    cert.apply(&outcome);
    assert_eq!(cert.staple(), Some(body.as_slice()));
}

#[tokio::test]
async fn test_second_call_served_from_storage() {
    let pki = TestPki::builder().build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, pki.response().build()));
    let cert = managed(&pki);
    let cancel = CancellationToken::new();

    let first = h.manager.ensure_stapled(&cert, None, &cancel).await.unwrap();
    let second = h.manager.ensure_stapled(&cert, None, &cancel).await.unwrap();

    assert_eq!(first.source, StapleSource::Responder);
    assert_eq!(second.source, StapleSource::Cache);
    assert_eq!(first.staple, second.staple);
    assert_eq!(h.transport.post_count(), 1);
    assert_eq!(h.storage.stores(), 1);
}

#[tokio::test]
async fn test_given_pem_bundle_determines_key() {
    let pki = TestPki::builder().names(&["www.example.test"]).build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, pki.response().build()));
    let pem = pki.bundle_pem();
    let cert = ManagedCertificate::from_pem(&pem).unwrap();

    h.manager
        .ensure_stapled(&cert, Some(&pem), &CancellationToken::new())
        .await
        .unwrap();

    let key = ocsp_staple_key(cert.names(), &pem);
    assert!(key.starts_with("ocsp/www.example.test-"));
    assert!(h.storage.get(&key).await.is_some());
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_replaced() {
    let pki = TestPki::builder().build();
    let body = pki.response().build();
    let storage = RecordingStorage::new();
    storage.seed(&staple_key(&pki), b"not an OCSP response").await;
    let h = harness(
        StaplingConfig::default(),
        MockTransport::new().respond(DEFAULT_OCSP_URL, body.clone()),
        storage,
    );

    let outcome = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.source, StapleSource::Responder);
    assert_eq!(h.storage.deletes(), 1);
    assert_eq!(h.transport.post_count(), 1);
    assert_eq!(h.storage.get(&staple_key(&pki)).await, Some(body));
}

#[tokio::test]
async fn test_corrupt_cache_entry_deleted_even_if_fetch_fails() {
    let pki = TestPki::builder().build();
    let storage = RecordingStorage::new();
    storage.seed(&staple_key(&pki), b"garbage").await;
    let h = harness(
        StaplingConfig::default(),
        MockTransport::new().fail(DEFAULT_OCSP_URL, 500),
        storage,
    );

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(h.storage.get(&staple_key(&pki)).await.is_none());
}

#[tokio::test]
async fn test_stale_cache_entry_is_kept() {
    let pki = TestPki::builder().build();
    // Past the midpoint of its window
    let stale = pki
        .response()
        .this_update(now() - Duration::days(6))
        .next_update(now() + Duration::days(1))
        .build();
    let storage = RecordingStorage::new();
    storage.seed(&staple_key(&pki), &stale).await;
    let h = harness(
        StaplingConfig::default(),
        MockTransport::new().fail(DEFAULT_OCSP_URL, 503),
        storage,
    );

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert_eq!(h.transport.post_count(), 1);
    assert_eq!(h.storage.deletes(), 0);
    assert_eq!(h.storage.get(&staple_key(&pki)).await, Some(stale));
}

#[tokio::test]
async fn test_stale_cache_entry_is_refreshed() {
    let pki = TestPki::builder().build();
    let stale = pki
        .response()
        .this_update(now() - Duration::days(6))
        .next_update(now() + Duration::days(1))
        .build();
    let fresh = pki.response().build();
    let storage = RecordingStorage::new();
    storage.seed(&staple_key(&pki), &stale).await;
    let h = harness(
        StaplingConfig::default(),
        MockTransport::new().respond(DEFAULT_OCSP_URL, fresh.clone()),
        storage,
    );

    let outcome = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.source, StapleSource::Responder);
    assert_eq!(h.storage.get(&staple_key(&pki)).await, Some(fresh));
}

#[tokio::test]
async fn test_response_outliving_certificate_rejected() {
    let issued = now();
    let pki = TestPki::builder()
        .validity(issued - Duration::days(1), issued + Duration::days(3))
        .build();
    let body = pki
        .response()
        .next_update(issued + Duration::days(5))
        .build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, body));

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Temporal);
    match err {
        StapleError::OutlivesCertificate {
            next_update,
            expires_at,
            ..
        } => {
            assert_eq!(next_update, issued + Duration::days(5));
            assert_eq!(expires_at, issued + Duration::days(3) + Duration::seconds(1));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.storage.stores(), 0);
}

#[tokio::test]
async fn test_cached_response_outliving_certificate_rejected() {
    let issued = now();
    let pki = TestPki::builder()
        .validity(issued - Duration::days(1), issued + Duration::days(3))
        .build();
    // Fresh, but valid past the certificate's expiry
    let cached = pki
        .response()
        .next_update(issued + Duration::days(5))
        .build();
    let storage = RecordingStorage::new();
    storage.seed(&staple_key(&pki), &cached).await;
    let h = harness(StaplingConfig::default(), MockTransport::new(), storage);

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Temporal);
    assert_eq!(h.transport.post_count(), 0);
    assert_eq!(h.storage.stores(), 0);
    assert_eq!(h.storage.deletes(), 0);
}

#[tokio::test]
async fn test_next_update_at_expiry_accepted() {
    let issued = now();
    let not_after = issued + Duration::days(3);
    let pki = TestPki::builder()
        .validity(issued - Duration::days(1), not_after)
        .build();
    let body = pki
        .response()
        .next_update(not_after + Duration::seconds(1))
        .build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, body));

    let outcome = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_stapled());
}

#[tokio::test]
async fn test_short_lived_certificate_fetch_error_ignored() {
    let issued = now();
    let pki = TestPki::builder()
        .validity(issued - Duration::days(1), issued + Duration::days(3))
        .build();
    let h = default_harness(MockTransport::new().fail(DEFAULT_OCSP_URL, 500));

    let outcome = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.source, StapleSource::Skipped);
    assert!(outcome.response.is_none());
    assert_eq!(h.transport.post_count(), 1);
}

#[tokio::test]
async fn test_long_lived_certificate_fetch_error_reported() {
    let pki = TestPki::builder().build();
    let h = default_harness(MockTransport::new().fail(DEFAULT_OCSP_URL, 500));

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert_eq!(err.names().to_vec(), vec!["example.test".to_string()]);
    assert!(matches!(
        err,
        StapleError::Fetch {
            source: FetchError::Responder { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_disabled_stapling_is_noop() {
    let pki = TestPki::builder().build();
    let h = harness(
        StaplingConfig::disabled(),
        MockTransport::new().respond(DEFAULT_OCSP_URL, pki.response().build()),
        RecordingStorage::new(),
    );

    let outcome = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.source, StapleSource::Disabled);
    assert!(!outcome.is_stapled());
    assert!(h.transport.calls().is_empty());
    assert_eq!(h.storage.stores(), 0);
}

#[tokio::test]
async fn test_responder_override_used() {
    let pki = TestPki::builder().build();
    let mut config = StaplingConfig::default();
    config.responder_overrides.insert(
        DEFAULT_OCSP_URL.to_string(),
        "http://ocsp.internal.test/".to_string(),
    );
    let h = harness(
        config,
        MockTransport::new().respond("http://ocsp.internal.test/", pki.response().build()),
        RecordingStorage::new(),
    );

    let outcome = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_stapled());
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "http://ocsp.internal.test/");
}

#[tokio::test]
async fn test_disabled_responder_makes_no_request() {
    let pki = TestPki::builder().build();
    let mut config = StaplingConfig::default();
    config
        .responder_overrides
        .insert(DEFAULT_OCSP_URL.to_string(), String::new());
    let h = harness(config, MockTransport::new(), RecordingStorage::new());

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoResponder);
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn test_no_responder_url() {
    let pki = TestPki::builder().no_ocsp_url().build();
    let h = default_harness(MockTransport::new());

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoResponder);
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn test_issuer_downloaded_for_leaf_only_bundle() {
    let pki = TestPki::builder().build();
    let h = default_harness(
        MockTransport::new()
            .respond(DEFAULT_ISSUER_URL, pki.ca_der.clone())
            .respond(DEFAULT_OCSP_URL, pki.response().build()),
    );
    let pem = pki.leaf_pem();
    let cert = ManagedCertificate::from_pem(&pem).unwrap();

    let outcome = h
        .manager
        .ensure_stapled(&cert, Some(&pem), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_stapled());
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, "GET");
    assert_eq!(calls[0].url, DEFAULT_ISSUER_URL);
    assert_eq!(calls[1].method, "POST");
}

#[tokio::test]
async fn test_leaf_only_bundle_without_issuer_url() {
    let pki = TestPki::builder().no_issuer_url().build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, pki.response().build()));
    let pem = pki.leaf_pem();
    let cert = ManagedCertificate::from_pem(&pem).unwrap();

    let err = h
        .manager
        .ensure_stapled(&cert, Some(&pem), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StapleError::Fetch {
            source: FetchError::NoIssuerUrl,
            ..
        }
    ));
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn test_revoked_response_not_stapled_or_stored() {
    let pki = TestPki::builder().build();
    let revoked_at = now() - Duration::days(2);
    let body = pki.response().revoked(revoked_at, Some(1)).build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, body));

    let mut cert = managed(&pki);
    let outcome = h
        .manager
        .ensure_stapled(&cert, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.is_stapled());
    assert!(outcome.response.as_ref().unwrap().is_revoked());
    assert_eq!(h.storage.stores(), 0);

    cert.apply(&outcome);
    assert!(cert.staple().is_none());
    assert!(cert.ocsp_response().unwrap().is_revoked());
}

#[tokio::test]
async fn test_persist_failure_still_returns_staple() {
    let pki = TestPki::builder().build();
    let body = pki.response().build();
    let h = harness(
        StaplingConfig::default(),
        MockTransport::new().respond(DEFAULT_OCSP_URL, body.clone()),
        RecordingStorage::failing(),
    );

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persist);
    let outcome = err.outcome().unwrap();
    assert_eq!(outcome.source, StapleSource::Responder);
    assert_eq!(outcome.staple.as_deref(), Some(body.as_slice()));
}

#[tokio::test]
async fn test_bad_signature_rejected() {
    let pki = TestPki::builder().build();
    let h = default_harness(
        MockTransport::new().respond(DEFAULT_OCSP_URL, pki.response().wrong_key().build()),
    );

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StapleError::Fetch {
            source: FetchError::Response { .. },
            ..
        }
    ));
    assert_eq!(h.storage.stores(), 0);
}

#[tokio::test]
async fn test_response_for_other_serial_rejected() {
    let pki = TestPki::builder().build();
    let h = default_harness(
        MockTransport::new().respond(DEFAULT_OCSP_URL, pki.response().serial(vec![0x7f, 0x01]).build()),
    );

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_fetch() {
    let pki = TestPki::builder().build();
    let h = default_harness(
        MockTransport::new()
            .with_delay(std::time::Duration::from_millis(50))
            .respond(DEFAULT_OCSP_URL, pki.response().build()),
    );
    let cert = managed(&pki);

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let manager = Arc::clone(&h.manager);
        let cert = cert.clone();
        tasks.push(tokio::spawn(async move {
            manager
                .ensure_stapled(&cert, None, &CancellationToken::new())
                .await
        }));
    }

    let mut staples = Vec::new();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        staples.push(outcome.staple.unwrap());
    }

    assert_eq!(h.transport.post_count(), 1);
    assert_eq!(h.storage.stores(), 1);
    assert!(staples.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let pki = TestPki::builder().build();
    let h = default_harness(MockTransport::new().respond(DEFAULT_OCSP_URL, pki.response().build()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .manager
        .ensure_stapled(&managed(&pki), None, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_while_waiting_for_responder() {
    let pki = TestPki::builder().build();
    let h = default_harness(
        MockTransport::new()
            .with_delay(std::time::Duration::from_secs(30))
            .respond(DEFAULT_OCSP_URL, pki.response().build()),
    );
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });
    }

    let err = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        h.manager.ensure_stapled(&managed(&pki), None, &cancel),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.storage.stores(), 0);
}
