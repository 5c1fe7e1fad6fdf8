// ── rfs-sftp / sftp module ────────────────────────────────────────────────────
//
// Remote file management over SSH/SFTP:
//   • Connection registry keyed by (host, port, username)
//   • Per-session listing, transfers, mkdir / remove / rename, history, df
//   • Protected-path policy for destructive operations
//   • Transport failures translated into a closed error taxonomy
//   • Endpoint reachability diagnostics

pub mod error;
pub mod types;
pub mod guard;
pub mod transport;
pub mod ssh2_transport;
pub mod session;
pub mod registry;
pub mod diagnostics;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{translate, ErrorKind, RemoteError, RemoteResult, TransportError};
pub use guard::{is_allowed, is_normalised, PathGuard, DEFAULT_PROTECTED_PREFIXES};
pub use registry::ConnectionRegistry;
pub use session::RemoteSession;
pub use ssh2_transport::Ssh2Connector;
pub use transport::{Connector, Transport};
pub use types::*;
pub use diagnostics::diagnose_endpoint;
