// ── Types ─────────────────────────────────────────────────────────────────────

use crate::sftp::error::{RemoteError, RemoteResult};
use chrono::{DateTime, Local, TimeZone, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_ssh_port() -> u16 {
    22
}
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_keepalive_secs() -> u64 {
    60
}

// ── Connection identity ──────────────────────────────────────────────────────

/// Who we connect as, and where. Two identities are the same connection iff
/// all three fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionIdentity {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
}

impl ConnectionIdentity {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }

    /// Parse a `host[:port]` string as sent by the front-end. A missing port
    /// means 22.
    pub fn parse(host: &str, username: &str) -> RemoteResult<Self> {
        let host = host.trim();
        let username = username.trim();
        if username.is_empty() {
            return Err(RemoteError::unknown("Username must not be empty"));
        }

        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| RemoteError::unknown(format!("Invalid port in '{}'", host)))?;
                if port == 0 {
                    return Err(RemoteError::unknown(format!("Invalid port in '{}'", host)));
                }
                (name, port)
            }
            None => (host, default_ssh_port()),
        };

        if name.is_empty() {
            return Err(RemoteError::unknown("Host must not be empty"));
        }

        Ok(Self::new(name, port, username))
    }

    pub fn key(&self) -> SessionKey {
        SessionKey(format!("{}@{}:{}", self.username, self.host, self.port))
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Registry key. Derived from a [`ConnectionIdentity`], never generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        SessionKey(s.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        SessionKey(s)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Authentication ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum Credentials {
    Password(SecretString),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Credentials::Password(SecretString::new(password.into()))
    }

    pub fn method(&self) -> &'static str {
        match self {
            Credentials::Password(_) => "password",
            Credentials::PrivateKey { .. } => "publickey",
        }
    }
}

// ── Transport tuning ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportTuning {
    #[serde(default = "default_true")]
    pub compress: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            compress: true,
            timeout_secs: default_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

// ── Transport records ────────────────────────────────────────────────────────

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteStat {
    pub mode: u32,
    pub size: u64,
    /// Seconds since the epoch.
    pub mtime: Option<u64>,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    pub name: String,
    pub stat: RemoteStat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Exit 0 and nothing on stderr.
    pub fn is_clean(&self) -> bool {
        self.exit_status == 0 && self.stderr.trim().is_empty()
    }
}

// ── Listing output ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    #[serde(rename = "dir")]
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(rename = "mTime")]
    pub m_time: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
}

impl FileEntry {
    /// Build an entry for `raw` found inside the (already normalised) `dir`.
    pub fn from_remote(dir: &str, raw: &RemoteDirEntry) -> Self {
        let path = if dir == "/" {
            format!("/{}", raw.name)
        } else {
            format!("{}/{}", dir, raw.name)
        };
        let entry_type = if raw.stat.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        };
        FileEntry {
            name: raw.name.clone(),
            path,
            size: raw.stat.size,
            m_time: format_mtime(raw.stat.mtime),
            entry_type,
        }
    }
}

/// Local-time `%Y-%m-%d %H:%M:%S`; empty when the server sent no mtime.
pub fn format_mtime(mtime: Option<u64>) -> String {
    mtime
        .and_then(|secs| Local.timestamp_opt(secs as i64, 0).single())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

// ── Session info ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub key: SessionKey,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub operations_count: u64,
}
