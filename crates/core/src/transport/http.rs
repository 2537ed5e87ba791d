//! HTTP(S) transport.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::config::TransportConfig;
use super::error::{TransportError, TransportErrorKind};
use super::retry::RetryPolicy;
use super::traits::{FetchOutcome, FetchRequest, Transport};

/// Plain GET, streamed to disk chunk by chunk.
pub struct HttpTransport {
    client: Client,
    policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .user_agent(concat!("mediafetch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            policy: config.retry_policy(),
        })
    }

    /// Replaces the retry policy from the config.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<u64, TransportError> {
        let url = request.url.as_str();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        let mut file = File::create(&request.destination)
            .await
            .map_err(|e| TransportError::from_io(url, &e))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify_reqwest_error(url, &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransportError::from_io(url, &e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| TransportError::from_io(url, &e))?;
        file.sync_all()
            .await
            .map_err(|e| TransportError::from_io(url, &e))?;

        Ok(written)
    }
}

fn classify_reqwest_error(url: &str, error: &reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::ConnectionRefused
    } else if error.is_builder() {
        TransportErrorKind::InvalidUrl
    } else {
        TransportErrorKind::Io
    };
    TransportError::new(kind, url, error.to_string())
}

fn classify_status(url: &str, status: StatusCode) -> TransportError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportErrorKind::AuthFailure,
        StatusCode::NOT_FOUND | StatusCode::GONE => TransportErrorKind::NotFound,
        _ => TransportErrorKind::Protocol,
    };
    TransportError::new(kind, url, format!("server answered {}", status))
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn schemes(&self) -> &[&str] {
        &["http", "https"]
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, TransportError> {
        debug!(url = %request.url, dest = %request.destination.display(), "HTTP fetch");

        let mut attempts = 0;
        let bytes = self
            .policy
            .run(&request.url, |n| {
                attempts = n;
                self.attempt(request)
            })
            .await?;

        info!(url = %request.url, bytes, attempts, "HTTP fetch complete");
        Ok(FetchOutcome {
            bytes,
            attempts,
            anonymous: false,
        })
    }
}
