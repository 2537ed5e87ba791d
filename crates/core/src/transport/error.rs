//! Error types for the transport module.

use std::fmt;
use std::io;

use thiserror::Error;

/// Why a transfer attempt failed. The retry loop decides on this alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionRefused,
    AuthFailure,
    UnsupportedProtocol,
    InvalidUrl,
    /// The server answered that the file does not exist.
    NotFound,
    /// Any other protocol-level refusal (HTTP 5xx, unexpected FTP reply).
    Protocol,
    /// Network or local disk I/O.
    Io,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::AuthFailure => "authentication failure",
            TransportErrorKind::UnsupportedProtocol => "unsupported protocol",
            TransportErrorKind::InvalidUrl => "invalid url",
            TransportErrorKind::NotFound => "not found",
            TransportErrorKind::Protocol => "protocol error",
            TransportErrorKind::Io => "i/o error",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed transfer, after however many attempts were made.
#[derive(Debug, Clone, Error)]
#[error("{kind} fetching {url} after {attempts} attempt(s): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub url: String,
    pub message: String,
    pub attempts: u32,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            message: message.into(),
            attempts: 1,
        }
    }

    pub fn unsupported(url: impl Into<String>, scheme: &str) -> Self {
        Self::new(
            TransportErrorKind::UnsupportedProtocol,
            url,
            format!("no transport for scheme {:?}", scheme),
        )
    }

    /// Classifies an I/O error from a socket or the destination file.
    pub fn from_io(url: impl Into<String>, error: &io::Error) -> Self {
        let kind = match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, url, error.to_string())
    }

    /// Auth failures are not retried, to stay clear of server-side bans for
    /// repeated failed logins. Bad URLs, unknown schemes and missing files
    /// cannot succeed on a second try.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            TransportErrorKind::AuthFailure
                | TransportErrorKind::UnsupportedProtocol
                | TransportErrorKind::InvalidUrl
                | TransportErrorKind::NotFound
        )
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}
