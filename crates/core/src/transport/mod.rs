//! Fetching originals over HTTP(S), FTP and SFTP.
//!
//! Each scheme has its own [`Transport`] strategy; [`SchemeTransport`]
//! picks one by URL scheme. Every strategy streams straight to the
//! destination file and retries through a fixed [`RetryPolicy`].

mod config;
mod dispatch;
mod error;
mod ftp;
mod http;
mod retry;
mod sftp;
mod traits;

pub use config::TransportConfig;
pub use dispatch::SchemeTransport;
pub use error::{TransportError, TransportErrorKind};
pub use ftp::FtpTransport;
pub use http::HttpTransport;
pub use retry::RetryPolicy;
pub use sftp::SftpTransport;
pub use traits::{FetchOutcome, FetchRequest, Transport};
