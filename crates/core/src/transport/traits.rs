//! Trait definitions for the transport module.

use std::path::PathBuf;

use async_trait::async_trait;

use super::error::TransportError;
use crate::job::Credential;

/// One file to fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Written (truncated first) by every attempt.
    pub destination: PathBuf,
    /// The owning centre's file source credential, if it has one.
    pub credential: Option<Credential>,
    /// Go straight to anonymous access even when a credential exists.
    pub skip_credentials: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            credential: None,
            skip_credentials: false,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn skip_credentials(mut self, skip: bool) -> Self {
        self.skip_credentials = skip;
        self
    }
}

/// A completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    pub bytes: u64,
    pub attempts: u32,
    /// The transfer only succeeded through the anonymous fallback.
    pub anonymous: bool,
}

/// Fetches remote files to local disk.
///
/// On error the destination may hold a partial file; removing it is the
/// caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the name of this transport implementation.
    fn name(&self) -> &str;

    /// URL schemes this transport handles.
    fn schemes(&self) -> &[&str];

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, TransportError>;
}
