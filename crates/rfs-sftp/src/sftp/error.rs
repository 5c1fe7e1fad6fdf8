//! Domain error taxonomy and the translation from transport failures into it.
//!
//! Everything that leaves a [`RemoteSession`](crate::sftp::session::RemoteSession)
//! or the registry is a [`RemoteError`] carrying exactly one [`ErrorKind`].
//! Raw [`TransportError`]s stay inside the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Domain error ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The remote file or directory does not exist.
    NotFound,
    /// Access refused by the server, or by the protected-path policy.
    PermissionDenied,
    /// Connection or read timed out.
    Timeout,
    /// Malformed or unsupported protocol exchange.
    ProtocolError,
    /// Catch-all.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    pub session_key: Option<String>,
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            session_key: None,
        }
    }

    pub fn with_session(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, msg)
    }

    /// Rejection by the protected-path policy. Never involves the transport.
    pub fn protected(path: &str) -> Self {
        Self::permission_denied(format!("Refusing to touch protected path '{}'", path))
    }

    /// Translate a transport failure, prefixing the message with `context`.
    pub fn from_transport(err: &TransportError, context: &str) -> Self {
        Self::new(translate(err), format!("{}: {}", context, err))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session_key {
            Some(key) => write!(f, "[{} {}] {}", self.kind, key, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

// ── Transport failure signals ────────────────────────────────────────────────

/// Failure raised by a [`Transport`](crate::sftp::transport::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("SFTP status {code}: {message}")]
    Sftp { code: i32, message: String },
    #[error("SSH session error {code}: {message}")]
    Session { code: i32, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote command exited with status {exit_status}: {stderr}")]
    Command { exit_status: i32, stderr: String },
    #[error("session is closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl From<ssh2::Error> for TransportError {
    fn from(e: ssh2::Error) -> Self {
        match e.code() {
            ssh2::ErrorCode::SFTP(code) => TransportError::Sftp {
                code,
                message: e.message().to_string(),
            },
            ssh2::ErrorCode::Session(code) => TransportError::Session {
                code,
                message: e.message().to_string(),
            },
        }
    }
}

// SFTP status codes (draft-ietf-secsh-filexfer-02 / libssh2 LIBSSH2_FX_*).
pub const FX_NO_SUCH_FILE: i32 = 2;
pub const FX_PERMISSION_DENIED: i32 = 3;
pub const FX_FAILURE: i32 = 4;
pub const FX_BAD_MESSAGE: i32 = 5;
pub const FX_OP_UNSUPPORTED: i32 = 8;
pub const FX_INVALID_HANDLE: i32 = 9;
pub const FX_NO_SUCH_PATH: i32 = 10;
pub const FX_FILE_ALREADY_EXISTS: i32 = 11;
pub const FX_WRITE_PROTECT: i32 = 12;

// libssh2 session error codes (LIBSSH2_ERROR_*).
pub const SESSION_BANNER_RECV: i32 = -2;
pub const SESSION_BANNER_SEND: i32 = -3;
pub const SESSION_INVALID_MAC: i32 = -4;
pub const SESSION_KEX_FAILURE: i32 = -5;
pub const SESSION_KEY_EXCHANGE_FAILURE: i32 = -8;
pub const SESSION_TIMEOUT: i32 = -9;
pub const SESSION_DECRYPT: i32 = -12;
pub const SESSION_PROTO: i32 = -14;
pub const SESSION_PASSWORD_EXPIRED: i32 = -15;
pub const SESSION_AUTHENTICATION_FAILED: i32 = -18;
pub const SESSION_PUBLICKEY_UNVERIFIED: i32 = -19;
pub const SESSION_CHANNEL_OUTOFORDER: i32 = -20;
pub const SESSION_CHANNEL_REQUEST_DENIED: i32 = -22;
pub const SESSION_CHANNEL_WINDOW_EXCEEDED: i32 = -24;
pub const SESSION_CHANNEL_PACKET_EXCEEDED: i32 = -25;
pub const SESSION_SCP_PROTOCOL: i32 = -28;
pub const SESSION_ZLIB: i32 = -29;
pub const SESSION_SOCKET_TIMEOUT: i32 = -30;
pub const SESSION_SFTP_PROTOCOL: i32 = -31;
pub const SESSION_REQUEST_DENIED: i32 = -32;
pub const SESSION_METHOD_NOT_SUPPORTED: i32 = -33;
pub const SESSION_PUBLICKEY_PROTOCOL: i32 = -36;
pub const SESSION_EAGAIN: i32 = -37;
pub const SESSION_COMPRESS: i32 = -40;
pub const SESSION_AGENT_PROTOCOL: i32 = -42;
pub const SESSION_ENCRYPT: i32 = -44;

// ── Translation ──────────────────────────────────────────────────────────────

/// Map a transport failure onto the closed [`ErrorKind`] set. Total: every
/// input yields exactly one kind.
pub fn translate(err: &TransportError) -> ErrorKind {
    match err {
        TransportError::Sftp { code, message } => match *code {
            FX_NO_SUCH_FILE | FX_NO_SUCH_PATH => ErrorKind::NotFound,
            FX_PERMISSION_DENIED | FX_WRITE_PROTECT => ErrorKind::PermissionDenied,
            FX_BAD_MESSAGE | FX_OP_UNSUPPORTED | FX_INVALID_HANDLE => ErrorKind::ProtocolError,
            _ => classify_message(message),
        },
        TransportError::Session { code, message } => match *code {
            SESSION_TIMEOUT | SESSION_SOCKET_TIMEOUT | SESSION_EAGAIN => ErrorKind::Timeout,
            SESSION_PASSWORD_EXPIRED
            | SESSION_AUTHENTICATION_FAILED
            | SESSION_PUBLICKEY_UNVERIFIED
            | SESSION_CHANNEL_REQUEST_DENIED
            | SESSION_REQUEST_DENIED => ErrorKind::PermissionDenied,
            SESSION_BANNER_RECV
            | SESSION_BANNER_SEND
            | SESSION_INVALID_MAC
            | SESSION_KEX_FAILURE
            | SESSION_KEY_EXCHANGE_FAILURE
            | SESSION_DECRYPT
            | SESSION_PROTO
            | SESSION_CHANNEL_OUTOFORDER
            | SESSION_CHANNEL_WINDOW_EXCEEDED
            | SESSION_CHANNEL_PACKET_EXCEEDED
            | SESSION_SCP_PROTOCOL
            | SESSION_ZLIB
            | SESSION_SFTP_PROTOCOL
            | SESSION_METHOD_NOT_SUPPORTED
            | SESSION_PUBLICKEY_PROTOCOL
            | SESSION_COMPRESS
            | SESSION_AGENT_PROTOCOL
            | SESSION_ENCRYPT => ErrorKind::ProtocolError,
            _ => classify_message(message),
        },
        TransportError::Io(e) => match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                ErrorKind::ProtocolError
            }
            _ => classify_message(&e.to_string()),
        },
        TransportError::Command { stderr, .. } => classify_message(stderr),
        TransportError::Closed => ErrorKind::Unknown,
        TransportError::Other(message) => classify_message(message),
    }
}

/// Categorise free-form failure text (remote stderr, library messages).
pub fn classify_message(text: &str) -> ErrorKind {
    let lower = text.to_lowercase();
    if lower.contains("no such file") || lower.contains("not found") || lower.contains("does not exist") {
        ErrorKind::NotFound
    } else if lower.contains("permission denied") || lower.contains("operation not permitted") {
        ErrorKind::PermissionDenied
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ErrorKind::Timeout
    } else if lower.contains("protocol") {
        ErrorKind::ProtocolError
    } else {
        ErrorKind::Unknown
    }
}
