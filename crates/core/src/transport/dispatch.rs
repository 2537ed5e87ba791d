//! Routes a fetch to the transport registered for the URL scheme.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::config::TransportConfig;
use super::error::{TransportError, TransportErrorKind};
use super::ftp::FtpTransport;
use super::http::HttpTransport;
use super::sftp::SftpTransport;
use super::traits::{FetchOutcome, FetchRequest, Transport};

/// Holds one transport per scheme.
#[derive(Default)]
pub struct SchemeTransport {
    by_scheme: HashMap<String, Arc<dyn Transport>>,
}

impl SchemeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP(S), FTP and SFTP, built from one transport config.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let http = HttpTransport::new(config).map_err(|e| {
            TransportError::new(TransportErrorKind::Io, "", format!("HTTP client setup: {}", e))
        })?;

        let mut dispatch = Self::new();
        dispatch.register(Arc::new(http));
        dispatch.register(Arc::new(FtpTransport::new(config)));
        dispatch.register(Arc::new(SftpTransport::new(config)));
        Ok(dispatch)
    }

    /// Registers a transport under every scheme it claims. Later
    /// registrations replace earlier ones.
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        for scheme in transport.schemes() {
            self.by_scheme
                .insert(scheme.to_ascii_lowercase(), Arc::clone(&transport));
        }
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.by_scheme.contains_key(&scheme.to_ascii_lowercase())
    }

    fn resolve(&self, url: &str) -> Result<&Arc<dyn Transport>, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidUrl, url, e.to_string()))?;
        self.by_scheme
            .get(parsed.scheme())
            .ok_or_else(|| TransportError::unsupported(url, parsed.scheme()))
    }
}

#[async_trait]
impl Transport for SchemeTransport {
    fn name(&self) -> &str {
        "dispatch"
    }

    fn schemes(&self) -> &[&str] {
        &[]
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, TransportError> {
        let transport = self.resolve(&request.url)?;
        debug!(url = %request.url, transport = transport.name(), "Dispatching fetch");
        transport.fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    #[tokio::test]
    async fn test_unknown_scheme_fails_without_retry() {
        let dispatch = SchemeTransport::from_config(&TransportConfig::default()).unwrap();
        let request = FetchRequest::new("gopher://example.org/a.jpg", "/tmp/never-written");

        let err = dispatch.fetch(&request).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::UnsupportedProtocol);
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn test_unparseable_url_is_invalid() {
        let dispatch = SchemeTransport::new();
        let err = dispatch
            .fetch(&FetchRequest::new("not a url", "/tmp/x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::InvalidUrl);
    }

    #[tokio::test]
    async fn test_routes_by_scheme() {
        let mock = Arc::new(MockTransport::new(&["ftp"]));
        let mut dispatch = SchemeTransport::new();
        dispatch.register(mock.clone());

        assert!(dispatch.supports("FTP"));
        assert!(!dispatch.supports("http"));

        dispatch
            .fetch(&FetchRequest::new("ftp://host/dir/a.jpg", "/tmp/a.jpg"))
            .await
            .unwrap();
        assert_eq!(mock.fetched_urls().await, vec!["ftp://host/dir/a.jpg".to_string()]);
    }

    #[test]
    fn test_from_config_registers_all_schemes() {
        let dispatch = SchemeTransport::from_config(&TransportConfig::default()).unwrap();
        for scheme in ["http", "https", "ftp", "sftp"] {
            assert!(dispatch.supports(scheme), "{scheme}");
        }
    }
}
