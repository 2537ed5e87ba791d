//! Transport configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;

/// Configuration shared by all transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Attempts per transfer, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed sleep between attempts (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-transfer timeout for HTTP, and socket read timeout for SFTP (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Private key offered to SFTP servers before the password.
    #[serde(default = "default_sftp_private_key")]
    pub sftp_private_key: PathBuf,

    #[serde(default = "default_sftp_port")]
    pub sftp_port: u16,

    #[serde(default = "default_ftp_port")]
    pub ftp_port: u16,

    /// Centres whose FTP servers are only ever accessed anonymously.
    #[serde(default)]
    pub skip_credentials_centres: Vec<i64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5000 // 5 seconds
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_timeout() -> u64 {
    3600 // 1 hour, originals can be large
}

fn default_sftp_private_key() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".ssh")
        .join("id_rsa")
}

fn default_sftp_port() -> u16 {
    22
}

fn default_ftp_port() -> u16 {
    21
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
            sftp_private_key: default_sftp_private_key(),
            sftp_port: default_sftp_port(),
            ftp_port: default_ftp_port(),
            skip_credentials_centres: Vec::new(),
        }
    }
}

impl TransportConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether FTP access for this centre skips the credentialed login.
    pub fn skips_credentials(&self, centre_id: i64) -> bool {
        self.skip_credentials_centres.contains(&centre_id)
    }
}
