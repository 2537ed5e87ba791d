//! FTP transport.
//!
//! The credentialed login runs under the retry policy. When it never
//! succeeds, one anonymous attempt follows; if that fails too, the
//! credentialed error is what the caller sees.

use std::fs::File;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};
use tracing::{debug, info, warn};
use url::Url;

use super::config::TransportConfig;
use super::error::{TransportError, TransportErrorKind};
use super::retry::RetryPolicy;
use super::traits::{FetchOutcome, FetchRequest, Transport};

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "mediafetch@";

#[derive(Debug, Clone, PartialEq, Eq)]
struct FtpTarget {
    host: String,
    port: u16,
    path: String,
}

#[derive(Clone)]
struct Login {
    user: String,
    password: String,
}

impl Login {
    fn anonymous() -> Self {
        Self {
            user: ANONYMOUS_USER.to_string(),
            password: ANONYMOUS_PASSWORD.to_string(),
        }
    }
}

pub struct FtpTransport {
    policy: RetryPolicy,
    default_port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl FtpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            policy: config.retry_policy(),
            default_port: config.ftp_port,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.timeout(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn parse_target(&self, url: &str) -> Result<FtpTarget, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidUrl, url, e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::new(TransportErrorKind::InvalidUrl, url, "missing host"))?;
        let path = urlencoding::decode(parsed.path())
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidUrl, url, e.to_string()))?;

        Ok(FtpTarget {
            host: host.to_string(),
            port: parsed.port().unwrap_or(self.default_port),
            path: path.into_owned(),
        })
    }

    async fn attempt(
        &self,
        url: &str,
        target: &FtpTarget,
        login: &Login,
        destination: &Path,
    ) -> Result<u64, TransportError> {
        let url_owned = url.to_string();
        let target = target.clone();
        let login = login.clone();
        let destination = destination.to_path_buf();
        let connect_timeout = self.connect_timeout;
        let read_timeout = self.read_timeout;

        tokio::task::spawn_blocking(move || {
            retrieve_sync(&url_owned, &target, &login, &destination, connect_timeout, read_timeout)
        })
        .await
        .map_err(|e| TransportError::new(TransportErrorKind::Io, url, format!("FTP task panicked: {}", e)))?
    }

    async fn run_with(
        &self,
        policy: RetryPolicy,
        request: &FetchRequest,
        target: &FtpTarget,
        login: &Login,
    ) -> Result<(u64, u32), TransportError> {
        let mut attempts = 0;
        let bytes = policy
            .run(&request.url, |n| {
                attempts = n;
                self.attempt(&request.url, target, login, &request.destination)
            })
            .await?;
        Ok((bytes, attempts))
    }
}

fn resolve(url: &str, target: &FtpTarget) -> Result<SocketAddr, TransportError> {
    (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::from_io(url, &e))?
        .next()
        .ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::ConnectionRefused,
                url,
                format!("{} did not resolve", target.host),
            )
        })
}

/// One blocking session: connect, login, RETR into the destination, QUIT.
fn retrieve_sync(
    url: &str,
    target: &FtpTarget,
    login: &Login,
    destination: &Path,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<u64, TransportError> {
    let addr = resolve(url, target)?;
    debug!(host = %target.host, port = target.port, user = %login.user, "Connecting to FTP server");

    let mut ftp = FtpStream::connect_timeout(addr, connect_timeout)
        .map_err(|e| classify_session_error(url, e))?;
    ftp.get_ref()
        .set_read_timeout(Some(read_timeout))
        .map_err(|e| TransportError::from_io(url, &e))?;
    ftp.set_mode(Mode::Passive);

    ftp.login(&login.user, &login.password)
        .map_err(|e| classify_login_error(url, e))?;
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| classify_session_error(url, e))?;

    let mut file = File::create(destination).map_err(|e| TransportError::from_io(url, &e))?;
    let mut stream = ftp
        .retr_as_stream(&target.path)
        .map_err(|e| classify_retrieve_error(url, e))?;
    let written = io::copy(&mut stream, &mut file).map_err(|e| TransportError::from_io(url, &e))?;
    ftp.finalize_retr_stream(stream)
        .map_err(|e| classify_session_error(url, e))?;
    file.sync_all().map_err(|e| TransportError::from_io(url, &e))?;

    if let Err(e) = ftp.quit() {
        warn!(url, "Failed to quit FTP session gracefully: {}", e);
    }
    Ok(written)
}

fn classify_session_error(url: &str, error: FtpError) -> TransportError {
    match error {
        FtpError::ConnectionError(io_err) => TransportError::from_io(url, &io_err),
        FtpError::InvalidAddress(e) => {
            TransportError::new(TransportErrorKind::InvalidUrl, url, e.to_string())
        }
        other => TransportError::new(TransportErrorKind::Protocol, url, other.to_string()),
    }
}

/// A rejected login is an auth failure; a dropped socket is still a network error.
fn classify_login_error(url: &str, error: FtpError) -> TransportError {
    match error {
        FtpError::ConnectionError(io_err) => TransportError::from_io(url, &io_err),
        other => TransportError::new(TransportErrorKind::AuthFailure, url, other.to_string()),
    }
}

fn classify_retrieve_error(url: &str, error: FtpError) -> TransportError {
    match &error {
        FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable => {
            TransportError::new(TransportErrorKind::NotFound, url, error.to_string())
        }
        _ => classify_session_error(url, error),
    }
}

#[async_trait]
impl Transport for FtpTransport {
    fn name(&self) -> &str {
        "ftp"
    }

    fn schemes(&self) -> &[&str] {
        &["ftp"]
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, TransportError> {
        let target = self.parse_target(&request.url)?;

        let credential = match (&request.credential, request.skip_credentials) {
            (Some(c), false) => Some(Login {
                user: c.username.clone(),
                password: c.access_key.clone(),
            }),
            _ => None,
        };

        let Some(login) = credential else {
            debug!(url = %request.url, "FTP fetch, anonymous only");
            let (bytes, attempts) = self
                .run_with(self.policy, request, &target, &Login::anonymous())
                .await?;
            info!(url = %request.url, bytes, attempts, "FTP fetch complete");
            return Ok(FetchOutcome {
                bytes,
                attempts,
                anonymous: false,
            });
        };

        let original = match self.run_with(self.policy, request, &target, &login).await {
            Ok((bytes, attempts)) => {
                info!(url = %request.url, bytes, attempts, "FTP fetch complete");
                return Ok(FetchOutcome {
                    bytes,
                    attempts,
                    anonymous: false,
                });
            }
            Err(e) => e,
        };

        warn!(url = %request.url, error = %original, "Credentialed FTP fetch failed, trying anonymous login");
        match self
            .run_with(RetryPolicy::once(), request, &target, &Login::anonymous())
            .await
        {
            Ok((bytes, _)) => {
                info!(url = %request.url, bytes, "FTP fetch complete via anonymous fallback");
                Ok(FetchOutcome {
                    bytes,
                    attempts: original.attempts + 1,
                    anonymous: true,
                })
            }
            Err(fallback) => {
                debug!(url = %request.url, error = %fallback, "Anonymous fallback failed too");
                Err(original)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Credential;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn transport(max_attempts: u32) -> FtpTransport {
        FtpTransport::new(&TransportConfig::default())
            .with_policy(RetryPolicy::new(max_attempts, Duration::from_millis(1)))
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn credential() -> Credential {
        Credential {
            centre_id: 2,
            protocol: "ftp".to_string(),
            hostname: "127.0.0.1".to_string(),
            username: "centre".to_string(),
            access_key: "key".to_string(),
            base_path: "/".to_string(),
        }
    }

    #[derive(Debug, Default)]
    struct ServerLog {
        connections: usize,
        users: Vec<String>,
    }

    /// Single-file FTP server on a local port. The centre user is always
    /// refused with 530. A refused anonymous session is cut off mid-login,
    /// which the client sees as a network error.
    fn start_server(body: Vec<u8>, accept_anonymous: bool) -> (u16, Arc<Mutex<ServerLog>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(ServerLog::default()));

        let server_log = log.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                server_log.lock().unwrap().connections += 1;
                let _ = serve_session(stream, &body, accept_anonymous, &server_log);
            }
        });
        (port, log)
    }

    fn serve_session(
        control: TcpStream,
        body: &[u8],
        accept_anonymous: bool,
        log: &Mutex<ServerLog>,
    ) -> io::Result<()> {
        let mut reader = BufReader::new(control.try_clone()?);
        let mut out = control;
        let mut user = String::new();
        let mut data: Option<TcpListener> = None;
        out.write_all(b"220 ready\r\n")?;

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let line = line.trim_end();
            let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "USER" => {
                    log.lock().unwrap().users.push(line.to_string());
                    user = arg.to_string();
                    out.write_all(b"331 password required\r\n")?;
                }
                "PASS" if user == ANONYMOUS_USER && accept_anonymous => {
                    out.write_all(b"230 logged in\r\n")?;
                }
                "PASS" if user == ANONYMOUS_USER => return Ok(()),
                "PASS" => out.write_all(b"530 login incorrect\r\n")?,
                "TYPE" => out.write_all(b"200 type set\r\n")?,
                "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0")?;
                    let port = listener.local_addr()?.port();
                    write!(
                        out,
                        "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                        port / 256,
                        port % 256
                    )?;
                    data = Some(listener);
                }
                "RETR" => {
                    let Some(listener) = data.take() else {
                        out.write_all(b"425 no data connection\r\n")?;
                        continue;
                    };
                    out.write_all(b"150 sending\r\n")?;
                    let (mut channel, _) = listener.accept()?;
                    channel.write_all(body)?;
                    drop(channel);
                    out.write_all(b"226 transfer complete\r\n")?;
                }
                "QUIT" => {
                    out.write_all(b"221 bye\r\n")?;
                    return Ok(());
                }
                _ => out.write_all(b"502 not implemented\r\n")?,
            }
        }
    }

    #[test]
    fn test_parse_target_decodes_path_and_defaults_port() {
        let ftp = transport(1);
        let target = ftp
            .parse_target("ftp://ftp.example.org/images/mouse%20one.tif")
            .unwrap();
        assert_eq!(target.host, "ftp.example.org");
        assert_eq!(target.port, 21);
        assert_eq!(target.path, "/images/mouse one.tif");

        let target = ftp.parse_target("ftp://h:2121/a.jpg").unwrap();
        assert_eq!(target.port, 2121);
    }

    #[test]
    fn test_parse_target_rejects_hostless_url() {
        let err = transport(1).parse_target("ftp:///a.jpg").unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::InvalidUrl);
    }

    #[tokio::test]
    async fn test_credentialed_failure_surfaces_original_error() {
        let temp = TempDir::new().unwrap();
        let request = FetchRequest::new(
            format!("ftp://127.0.0.1:{}/a.jpg", closed_port()),
            temp.path().join("a.jpg"),
        )
        .with_credential(Some(credential()));

        let err = transport(2).fetch(&request).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ConnectionRefused);
        // The credentialed run's count, not the fallback's.
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn test_anonymous_only_uses_retry_policy() {
        let temp = TempDir::new().unwrap();
        let request = FetchRequest::new(
            format!("ftp://127.0.0.1:{}/a.jpg", closed_port()),
            temp.path().join("a.jpg"),
        )
        .with_credential(Some(credential()))
        .skip_credentials(true);

        let err = transport(3).fetch(&request).await.unwrap_err();
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test]
    async fn test_anonymous_fallback_is_tried_exactly_once() {
        let (port, log) = start_server(b"unused".to_vec(), false);
        let temp = TempDir::new().unwrap();
        let request = FetchRequest::new(
            format!("ftp://127.0.0.1:{}/a.jpg", port),
            temp.path().join("a.jpg"),
        )
        .with_credential(Some(credential()));

        let err = transport(3).fetch(&request).await.unwrap_err();

        // The rejected centre login is what surfaces, not the dropped
        // anonymous session.
        assert_eq!(err.kind, TransportErrorKind::AuthFailure);
        assert_eq!(err.attempts, 1);
        let log = log.lock().unwrap();
        assert_eq!(log.connections, 2);
        assert_eq!(log.users, vec!["USER centre", "USER anonymous"]);
    }

    #[tokio::test]
    async fn test_anonymous_fallback_fetches_file() {
        let body: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let (port, log) = start_server(body.clone(), true);
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.jpg");
        let request = FetchRequest::new(format!("ftp://127.0.0.1:{}/a.jpg", port), &dest)
            .with_credential(Some(credential()));

        let outcome = transport(3).fetch(&request).await.unwrap();

        assert!(outcome.anonymous);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.bytes, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        let log = log.lock().unwrap();
        assert_eq!(log.connections, 2);
        assert_eq!(log.users, vec!["USER centre", "USER anonymous"]);
    }
}
