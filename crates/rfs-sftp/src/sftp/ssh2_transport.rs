// ── ssh2-backed transport ────────────────────────────────────────────────────

use crate::sftp::error::{TransportError, SESSION_AUTHENTICATION_FAILED};
use crate::sftp::transport::{Connector, Transport, TransportResult};
use crate::sftp::types::*;
use log::{debug, info, warn};
use secrecy::ExposeSecret;
use ssh2::{RenameFlags, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Pause between polls of a non-blocking exec channel with nothing to read.
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Opens [`Ssh2Transport`]s with the configured tuning.
#[derive(Debug, Clone, Default)]
pub struct Ssh2Connector {
    tuning: TransportTuning,
}

impl Ssh2Connector {
    pub fn new(tuning: TransportTuning) -> Self {
        Self { tuning }
    }

    fn open_tcp(&self, identity: &ConnectionIdentity) -> TransportResult<TcpStream> {
        let timeout = Duration::from_secs(self.tuning.timeout_secs.max(1));
        let addrs = (identity.host.as_str(), identity.port).to_socket_addrs()?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(tcp) => {
                    tcp.set_nonblocking(false)?;
                    return Ok(tcp);
                }
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => TransportError::Io(e),
            None => TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("'{}' resolved to no addresses", identity.host),
            )),
        })
    }

    fn authenticate(
        &self,
        session: &Session,
        identity: &ConnectionIdentity,
        credentials: &Credentials,
    ) -> TransportResult<()> {
        match credentials {
            Credentials::Password(password) => {
                session.userauth_password(&identity.username, password.expose_secret())?;
            }
            Credentials::PrivateKey { path, passphrase } => {
                let key_path = expand_home(path);
                session.userauth_pubkey_file(
                    &identity.username,
                    None,
                    &key_path,
                    passphrase.as_ref().map(|p| p.expose_secret().as_str()),
                )?;
            }
        }

        if !session.authenticated() {
            return Err(TransportError::Session {
                code: SESSION_AUTHENTICATION_FAILED,
                message: "not authenticated after auth attempt".into(),
            });
        }
        Ok(())
    }
}

impl Connector for Ssh2Connector {
    fn connect(
        &self,
        identity: &ConnectionIdentity,
        credentials: &Credentials,
    ) -> TransportResult<Box<dyn Transport>> {
        info!("SSH connecting to {}", identity);

        let tcp = self.open_tcp(identity)?;

        let mut session = Session::new()?;
        if self.tuning.compress {
            session.set_compress(true);
        }
        session.set_timeout((self.tuning.timeout_secs.saturating_mul(1000)).min(u32::MAX as u64) as u32);
        session.set_tcp_stream(tcp);
        session.handshake()?;

        self.authenticate(&session, identity, credentials)?;

        let keepalive = self.tuning.keepalive_secs.min(u32::MAX as u64) as u32;
        session.set_keepalive(keepalive > 0, keepalive);

        info!("SSH authenticated to {} via {}", identity, credentials.method());

        Ok(Box::new(Ssh2Transport {
            session,
            sftp: None,
            auth_method: credentials.method().to_string(),
            closed: false,
        }))
    }
}

/// Read both output streams of a non-blocking channel until `at_eof` holds
/// and neither has anything left, so a chatty stderr cannot stall stdout.
/// Fails with `TimedOut` after `idle_limit` without any output.
fn drain_streams<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut at_eof: impl FnMut() -> bool,
    idle_limit: Option<Duration>,
) -> TransportResult<(String, String)> {
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let mut buf = [0u8; 8192];
    let mut last_progress = Instant::now();

    loop {
        let mut progressed = read_available(stdout, &mut buf, &mut out)?;
        progressed |= read_available(stderr, &mut buf, &mut err)?;

        if progressed {
            last_progress = Instant::now();
            continue;
        }
        if at_eof() {
            break;
        }
        if idle_limit.is_some_and(|limit| last_progress.elapsed() > limit) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "remote command produced no output before the session timeout",
            )));
        }
        std::thread::sleep(EXEC_POLL_INTERVAL);
    }

    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// `true` when something was read.
fn read_available<R: Read>(reader: &mut R, buf: &mut [u8], sink: &mut Vec<u8>) -> TransportResult<bool> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted) => {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// `~/` in key paths refers to the local user's home.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

pub struct Ssh2Transport {
    session: Session,
    /// Opened on first use and reused for the lifetime of the session.
    sftp: Option<Sftp>,
    auth_method: String,
    closed: bool,
}

impl Ssh2Transport {
    fn sftp(&mut self) -> TransportResult<&Sftp> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.sftp.is_none() {
            self.sftp = Some(self.session.sftp()?);
        }
        self.sftp
            .as_ref()
            .ok_or_else(|| TransportError::Other("SFTP channel unavailable".into()))
    }
}

fn stat_from(stat: &ssh2::FileStat) -> RemoteStat {
    RemoteStat {
        mode: stat.perm.unwrap_or(0),
        size: stat.size.unwrap_or(0),
        mtime: stat.mtime,
    }
}

impl Transport for Ssh2Transport {
    fn stat(&mut self, path: &str) -> TransportResult<RemoteStat> {
        let stat = self.sftp()?.stat(Path::new(path))?;
        Ok(stat_from(&stat))
    }

    fn read_dir(&mut self, path: &str) -> TransportResult<Vec<RemoteDirEntry>> {
        let raw = self.sftp()?.readdir(Path::new(path))?;
        Ok(raw
            .into_iter()
            .map(|(entry_path, stat)| RemoteDirEntry {
                name: entry_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                stat: stat_from(&stat),
            })
            .collect())
    }

    fn download(&mut self, remote_path: &str, sink: &mut dyn Write) -> TransportResult<u64> {
        let mut remote = self.sftp()?.open(Path::new(remote_path))?;
        let copied = std::io::copy(&mut remote, sink)?;
        sink.flush()?;
        Ok(copied)
    }

    fn upload(&mut self, local_path: &Path, remote_path: &str) -> TransportResult<u64> {
        let mut local = std::fs::File::open(local_path)?;
        let mut remote = self.sftp()?.create(Path::new(remote_path))?;
        let copied = std::io::copy(&mut local, &mut remote)?;
        Ok(copied)
    }

    fn mkdir(&mut self, path: &str, mode: i32) -> TransportResult<()> {
        self.sftp()?.mkdir(Path::new(path), mode)?;
        Ok(())
    }

    fn rename(&mut self, old_path: &str, new_path: &str) -> TransportResult<()> {
        self.sftp()?.rename(
            Path::new(old_path),
            Path::new(new_path),
            Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE),
        )?;
        Ok(())
    }

    fn exec(&mut self, command: &str) -> TransportResult<CommandOutput> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut out_stream = channel.stream(0);
        let mut err_stream = channel.stderr();
        let idle_limit = match self.session.timeout() {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        };
        self.session.set_blocking(false);
        let drained = drain_streams(&mut out_stream, &mut err_stream, || channel.eof(), idle_limit);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained?;

        channel.wait_close()?;
        let exit_status = channel.exit_status()?;

        Ok(CommandOutput {
            exit_status,
            stdout,
            stderr,
        })
    }

    fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sftp = None;
        if let Err(e) = self.session.disconnect(None, "Client disconnecting", None) {
            warn!("SSH disconnect failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn auth_method(&self) -> &str {
        &self.auth_method
    }
}
