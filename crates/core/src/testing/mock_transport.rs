//! Mock transport for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::transport::{FetchOutcome, FetchRequest, Transport, TransportError};

/// A recorded fetch for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    /// The request that was submitted.
    pub request: FetchRequest,
    /// Whether the fetch succeeded.
    pub success: bool,
}

/// Mock implementation of the Transport trait.
///
/// Successful fetches write the configured body for the URL (or a body
/// derived from the URL) to the destination.
///
/// # Example
///
/// ```rust,ignore
/// use mediafetch_core::testing::MockTransport;
///
/// let transport = MockTransport::default();
/// transport.set_content("http://c.org/a.jpg", b"jpeg bytes".to_vec()).await;
/// transport.fail_url("http://c.org/b.jpg", error).await;
///
/// // ... run a download phase ...
///
/// assert_eq!(transport.fetch_count().await, 2);
/// ```
#[derive(Debug)]
pub struct MockTransport {
    schemes: Vec<&'static str>,
    /// Recorded fetches.
    fetches: Arc<RwLock<Vec<RecordedFetch>>>,
    /// Bodies by URL.
    contents: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// URLs that always fail with the given error.
    failing: Arc<RwLock<HashMap<String, TransportError>>>,
    /// If set, the next fetch will fail with this error.
    next_error: Arc<RwLock<Option<TransportError>>>,
    /// Whether failed fetches leave a partial file behind.
    partial_on_failure: Arc<RwLock<bool>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(&["http", "https", "ftp", "sftp"])
    }
}

impl MockTransport {
    /// Create a mock claiming the given URL schemes.
    pub fn new(schemes: &[&'static str]) -> Self {
        Self {
            schemes: schemes.to_vec(),
            fetches: Arc::new(RwLock::new(Vec::new())),
            contents: Arc::new(RwLock::new(HashMap::new())),
            failing: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            partial_on_failure: Arc::new(RwLock::new(false)),
        }
    }

    /// Get all recorded fetches.
    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.read().await.clone()
    }

    /// URLs fetched so far, in order.
    pub async fn fetched_urls(&self) -> Vec<String> {
        self.fetches
            .read()
            .await
            .iter()
            .map(|f| f.request.url.clone())
            .collect()
    }

    /// Get the number of fetches performed.
    pub async fn fetch_count(&self) -> usize {
        self.fetches.read().await.len()
    }

    /// Set the body served for a URL.
    pub async fn set_content(&self, url: impl Into<String>, body: Vec<u8>) {
        self.contents.write().await.insert(url.into(), body);
    }

    /// Make every fetch of `url` fail with `error`.
    pub async fn fail_url(&self, url: impl Into<String>, error: TransportError) {
        self.failing.write().await.insert(url.into(), error);
    }

    /// Configure the next fetch to fail with the given error.
    pub async fn set_next_error(&self, error: TransportError) {
        *self.next_error.write().await = Some(error);
    }

    /// Leave a truncated file at the destination when a fetch fails.
    pub async fn set_partial_on_failure(&self, partial: bool) {
        *self.partial_on_failure.write().await = partial;
    }

    /// Body served for `url` when none was configured.
    pub fn default_body(url: &str) -> Vec<u8> {
        format!("mock media from {}", url).into_bytes()
    }

    async fn failure_for(&self, url: &str) -> Option<TransportError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Some(err);
        }
        self.failing.read().await.get(url).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn schemes(&self) -> &[&str] {
        &self.schemes
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, TransportError> {
        if let Some(err) = self.failure_for(&request.url).await {
            if *self.partial_on_failure.read().await {
                let _ = tokio::fs::write(&request.destination, b"partial").await;
            }
            self.fetches.write().await.push(RecordedFetch {
                request: request.clone(),
                success: false,
            });
            return Err(err);
        }

        let body = self
            .contents
            .read()
            .await
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Self::default_body(&request.url));

        tokio::fs::write(&request.destination, &body)
            .await
            .map_err(|e| TransportError::from_io(&request.url, &e))?;

        self.fetches.write().await.push(RecordedFetch {
            request: request.clone(),
            success: true,
        });

        Ok(FetchOutcome {
            bytes: body.len() as u64,
            attempts: 1,
            anonymous: false,
        })
    }
}
