// ── Transport seam ───────────────────────────────────────────────────────────
//
// The blocking capability a RemoteSession drives. `Ssh2Transport` is the real
// implementation; tests use the in-memory one from `testing`.

use crate::sftp::error::TransportError;
use crate::sftp::types::{CommandOutput, ConnectionIdentity, Credentials, RemoteDirEntry, RemoteStat};
use std::io::Write;
use std::path::Path;

pub type TransportResult<T> = Result<T, TransportError>;

/// One authenticated connection. All calls block.
pub trait Transport: Send {
    fn stat(&mut self, path: &str) -> TransportResult<RemoteStat>;

    /// Raw entries in server order, `.` and `..` possibly included.
    fn read_dir(&mut self, path: &str) -> TransportResult<Vec<RemoteDirEntry>>;

    /// Stream the remote file into `sink`, returning the byte count.
    fn download(&mut self, remote_path: &str, sink: &mut dyn Write) -> TransportResult<u64>;

    fn upload(&mut self, local_path: &Path, remote_path: &str) -> TransportResult<u64>;

    fn mkdir(&mut self, path: &str, mode: i32) -> TransportResult<()>;

    fn rename(&mut self, old_path: &str, new_path: &str) -> TransportResult<()>;

    /// Run a shell command; a non-zero exit is not an error at this level.
    fn exec(&mut self, command: &str) -> TransportResult<CommandOutput>;

    fn close(&mut self) -> TransportResult<()>;

    /// Authentication method that opened this transport, for `SessionInfo`.
    fn auth_method(&self) -> &str {
        "unknown"
    }
}

/// Opens and authenticates transports.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        identity: &ConnectionIdentity,
        credentials: &Credentials,
    ) -> TransportResult<Box<dyn Transport>>;
}
