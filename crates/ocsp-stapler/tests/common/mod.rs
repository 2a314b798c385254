//! Shared test doubles for the stapling integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use ocsp_stapler::{HttpTransport, MemoryStorage, Storage, StorageError, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One request seen by [`MockTransport`]
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
enum Reply {
    Body(Vec<u8>),
    Status(u16),
}

/// HTTP transport answering from a fixed table and recording every call
///
/// URLs without a configured reply get a 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(self, url: &str, body: Vec<u8>) -> Self {
        self.set_reply(url, Reply::Body(body));
        self
    }

    pub fn fail(self, url: &str, status: u16) -> Self {
        self.set_reply(url, Reply::Status(status));
        self
    }

    fn set_reply(&self, url: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.count("POST")
    }

    pub fn get_count(&self) -> usize {
        self.count("GET")
    }

    fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    async fn answer(&self, call: Call, limit: usize) -> Result<Vec<u8>, TransportError> {
        let url = call.url.clone();
        self.calls.lock().unwrap().push(call);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().unwrap().get(&url).cloned();
        match reply {
            Some(Reply::Body(body)) if body.len() > limit => Err(TransportError::TooLarge { limit }),
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Status(status)) => Err(TransportError::Status(status)),
            None => Err(TransportError::Status(404)),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, limit: usize) -> Result<Vec<u8>, TransportError> {
        let call = Call {
            method: "GET",
            url: url.to_string(),
            content_type: None,
            body: Vec::new(),
        };
        self.answer(call, limit).await
    }

    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
        limit: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let call = Call {
            method: "POST",
            url: url.to_string(),
            content_type: Some(content_type.to_string()),
            body,
        };
        self.answer(call, limit).await
    }
}

/// In-memory storage that counts writes and deletes, optionally failing writes
#[derive(Debug, Default)]
pub struct RecordingStorage {
    inner: MemoryStorage,
    fail_stores: bool,
    stores: AtomicUsize,
    deletes: AtomicUsize,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose writes always fail
    pub fn failing() -> Self {
        Self {
            fail_stores: true,
            ..Self::default()
        }
    }

    /// Seed an entry without counting it as a write
    pub async fn seed(&self, key: &str, value: &[u8]) {
        self.inner.store(key, value).await.unwrap();
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.load(key).await.ok()
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn load(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.load(key).await
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if self.fail_stores {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.inner.store(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }
}
