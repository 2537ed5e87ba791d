//! SFTP transport.

use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tracing::{debug, info, warn};
use url::Url;

use super::config::TransportConfig;
use super::error::{TransportError, TransportErrorKind};
use super::retry::RetryPolicy;
use super::traits::{FetchOutcome, FetchRequest, Transport};

/// libssh2 error code for a missing remote file (`LIBSSH2_FX_NO_SUCH_FILE`).
const SFTP_NO_SUCH_FILE: i32 = 2;

#[derive(Debug, Clone)]
struct SftpTarget {
    host: String,
    port: u16,
    path: String,
    user: String,
    password: String,
}

/// Authenticates with the configured private key, passing the centre's
/// access key as its passphrase, then falls back to password auth with the
/// same secret.
pub struct SftpTransport {
    policy: RetryPolicy,
    private_key: PathBuf,
    default_port: u16,
    connect_timeout: Duration,
    timeout: Duration,
}

impl SftpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            policy: config.retry_policy(),
            private_key: config.sftp_private_key.clone(),
            default_port: config.sftp_port,
            connect_timeout: config.connect_timeout(),
            timeout: config.timeout(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn parse_target(&self, request: &FetchRequest) -> Result<SftpTarget, TransportError> {
        let url = request.url.as_str();
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidUrl, url, e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::new(TransportErrorKind::InvalidUrl, url, "missing host"))?;
        let path = urlencoding::decode(parsed.path())
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidUrl, url, e.to_string()))?;

        let (user, password) = match &request.credential {
            Some(c) => (c.username.clone(), c.access_key.clone()),
            None if !parsed.username().is_empty() => (
                parsed.username().to_string(),
                parsed.password().unwrap_or_default().to_string(),
            ),
            None => {
                return Err(TransportError::new(
                    TransportErrorKind::AuthFailure,
                    url,
                    "no credential for SFTP host",
                ))
            }
        };

        Ok(SftpTarget {
            host: host.to_string(),
            port: parsed.port().unwrap_or(self.default_port),
            path: path.into_owned(),
            user,
            password,
        })
    }

    async fn attempt(&self, url: &str, target: &SftpTarget, destination: &Path) -> Result<u64, TransportError> {
        let url_owned = url.to_string();
        let target = target.clone();
        let destination = destination.to_path_buf();
        let private_key = self.private_key.clone();
        let connect_timeout = self.connect_timeout;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            retrieve_sync(&url_owned, &target, &private_key, &destination, connect_timeout, timeout)
        })
        .await
        .map_err(|e| TransportError::new(TransportErrorKind::Io, url, format!("SFTP task panicked: {}", e)))?
    }
}

fn retrieve_sync(
    url: &str,
    target: &SftpTarget,
    private_key: &Path,
    destination: &Path,
    connect_timeout: Duration,
    timeout: Duration,
) -> Result<u64, TransportError> {
    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::from_io(url, &e))?
        .next()
        .ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::ConnectionRefused,
                url,
                format!("{} did not resolve", target.host),
            )
        })?;

    debug!(host = %target.host, port = target.port, user = %target.user, "Connecting to SFTP server");
    let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
        .map_err(|e| TransportError::from_io(url, &e))?;

    let mut session = Session::new().map_err(|e| session_error(url, e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session.handshake().map_err(|e| session_error(url, e))?;

    authenticate(&session, target, private_key);
    if !session.authenticated() {
        return Err(TransportError::new(
            TransportErrorKind::AuthFailure,
            url,
            format!("SFTP server rejected user {}", target.user),
        ));
    }

    let sftp = session.sftp().map_err(|e| session_error(url, e))?;
    let mut remote = sftp.open(Path::new(&target.path)).map_err(|e| {
        if matches!(e.code(), ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) {
            TransportError::new(TransportErrorKind::NotFound, url, e.to_string())
        } else {
            session_error(url, e)
        }
    })?;

    let mut file = File::create(destination).map_err(|e| TransportError::from_io(url, &e))?;
    let written = io::copy(&mut remote, &mut file).map_err(|e| TransportError::from_io(url, &e))?;
    file.sync_all().map_err(|e| TransportError::from_io(url, &e))?;

    if let Err(e) = session.disconnect(None, "done", None) {
        warn!(url, "Failed to close SFTP session gracefully: {}", e);
    }
    Ok(written)
}

/// Key first, then password. Failures here only show up as an
/// unauthenticated session.
fn authenticate(session: &Session, target: &SftpTarget, private_key: &Path) {
    if private_key.exists() {
        match session.userauth_pubkey_file(&target.user, None, private_key, Some(&target.password)) {
            Ok(()) => return,
            Err(e) => debug!(user = %target.user, "SFTP key authentication failed: {}", e),
        }
    }
    if let Err(e) = session.userauth_password(&target.user, &target.password) {
        debug!(user = %target.user, "SFTP password authentication failed: {}", e);
    }
}

fn session_error(url: &str, error: ssh2::Error) -> TransportError {
    let io_err: io::Error = error.into();
    TransportError::from_io(url, &io_err)
}

#[async_trait]
impl Transport for SftpTransport {
    fn name(&self) -> &str {
        "sftp"
    }

    fn schemes(&self) -> &[&str] {
        &["sftp"]
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, TransportError> {
        let target = self.parse_target(request)?;
        debug!(url = %request.url, "SFTP fetch");

        let mut attempts = 0;
        let bytes = self
            .policy
            .run(&request.url, |n| {
                attempts = n;
                self.attempt(&request.url, &target, &request.destination)
            })
            .await?;

        info!(url = %request.url, bytes, attempts, "SFTP fetch complete");
        Ok(FetchOutcome {
            bytes,
            attempts,
            anonymous: false,
        })
    }
}
