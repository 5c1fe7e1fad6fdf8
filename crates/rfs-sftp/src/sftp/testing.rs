// ── In-memory transport ──────────────────────────────────────────────────────
//
// A fake remote host for tests: a flat table of directories and files, plus
// just enough of a shell to answer the commands RemoteSession issues
// (`rm -rf`, `stat`, `cat ~/.bash_history`, `df -h`). Every transport call,
// every command and every connect call is recorded so tests can assert on
// what reached the "server".

use crate::sftp::error::*;
use crate::sftp::transport::{Connector, Transport, TransportResult};
use crate::sftp::types::*;
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FIXED_MTIME: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct RemoteState {
    /// Insertion order is the "server" listing order.
    nodes: Vec<(String, Node)>,
    denied: HashSet<String>,
    sticky: HashSet<String>,
    commands: Vec<String>,
    calls: usize,
    history: Option<String>,
    df: String,
    closes: usize,
}

impl RemoteState {
    fn find(&self, path: &str) -> Option<&Node> {
        self.nodes.iter().find(|(p, _)| p == path).map(|(_, n)| n)
    }

    fn is_denied(&self, path: &str) -> bool {
        self.denied.iter().any(|d| path == d || path.starts_with(&format!("{}/", d)))
    }

    fn remove_tree(&mut self, path: &str) {
        let below = format!("{}/", path);
        self.nodes.retain(|(p, _)| p != path && !p.starts_with(&below));
    }

    fn children(&self, dir: &str) -> Vec<RemoteDirEntry> {
        self.nodes
            .iter()
            .filter(|(p, _)| p != dir && parent_of(p) == dir)
            .map(|(p, node)| RemoteDirEntry {
                name: p.rsplit('/').next().unwrap_or_default().to_string(),
                stat: stat_of(node),
            })
            .collect()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "",
    }
}

fn stat_of(node: &Node) -> RemoteStat {
    match node {
        Node::Dir => RemoteStat {
            mode: 0o040755,
            size: 4096,
            mtime: Some(FIXED_MTIME),
        },
        Node::File(data) => RemoteStat {
            mode: 0o100644,
            size: data.len() as u64,
            mtime: Some(FIXED_MTIME),
        },
    }
}

fn sftp_err(code: i32, message: &str) -> TransportError {
    TransportError::Sftp {
        code,
        message: message.to_string(),
    }
}

/// Reverse of `'...'` quoting with `'\''` escapes.
fn unquote(arg: &str) -> String {
    let arg = arg.trim();
    let inner = arg
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(arg);
    inner.replace("'\\''", "'")
}

/// Handle on the fake host's state, shared by every transport it serves.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// A host with only `/`.
    pub fn new() -> Self {
        let state = RemoteState {
            nodes: vec![("/".to_string(), Node::Dir)],
            df: "Filesystem      Size  Used Avail Use% Mounted on\n/dev/sda1        20G  5.0G   15G  25% /\n"
                .to_string(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_dir(&self, path: &str) -> &Self {
        let mut state = self.lock();
        if state.find(path).is_none() {
            state.nodes.push((path.to_string(), Node::Dir));
        }
        drop(state);
        self
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) -> &Self {
        let mut state = self.lock();
        state.nodes.retain(|(p, _)| p != path);
        state.nodes.push((path.to_string(), Node::File(contents.to_vec())));
        drop(state);
        self
    }

    /// Every operation on `path` or below it fails with permission denied.
    pub fn deny(&self, path: &str) -> &Self {
        self.lock().denied.insert(path.to_string());
        self
    }

    /// `rm -rf` reports success on `path` but leaves it in place.
    pub fn make_sticky(&self, path: &str) -> &Self {
        self.lock().sticky.insert(path.to_string());
        self
    }

    pub fn set_history(&self, history: &str) -> &Self {
        self.lock().history = Some(history.to_string());
        self
    }

    pub fn set_df(&self, df: &str) -> &Self {
        self.lock().df = df.to_string();
        self
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().find(path).is_some()
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().find(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Shell commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Calls made on any [`Transport`] method, `close` included.
    pub fn transport_calls(&self) -> usize {
        self.lock().calls
    }

    /// How many transports have been closed.
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            remote: self.clone(),
            closed: false,
            auth_method: "password".to_string(),
        }
    }
}

pub struct MemoryTransport {
    remote: MemoryRemote,
    closed: bool,
    auth_method: String,
}

impl MemoryTransport {
    fn state(&self) -> TransportResult<std::sync::MutexGuard<'_, RemoteState>> {
        let mut state = self.remote.lock();
        state.calls += 1;
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(state)
    }
}

impl Transport for MemoryTransport {
    fn stat(&mut self, path: &str) -> TransportResult<RemoteStat> {
        let state = self.state()?;
        if state.is_denied(path) {
            return Err(sftp_err(FX_PERMISSION_DENIED, "Permission denied"));
        }
        state
            .find(path)
            .map(stat_of)
            .ok_or_else(|| sftp_err(FX_NO_SUCH_FILE, "No such file"))
    }

    fn read_dir(&mut self, path: &str) -> TransportResult<Vec<RemoteDirEntry>> {
        let state = self.state()?;
        if state.is_denied(path) {
            return Err(sftp_err(FX_PERMISSION_DENIED, "Permission denied"));
        }
        match state.find(path) {
            Some(Node::Dir) => {
                let dot = |name: &str| RemoteDirEntry {
                    name: name.to_string(),
                    stat: stat_of(&Node::Dir),
                };
                let mut entries = vec![dot("."), dot("..")];
                entries.extend(state.children(path));
                Ok(entries)
            }
            Some(Node::File(_)) => Err(sftp_err(FX_FAILURE, "Not a directory")),
            None => Err(sftp_err(FX_NO_SUCH_FILE, "No such file")),
        }
    }

    fn download(&mut self, remote_path: &str, sink: &mut dyn Write) -> TransportResult<u64> {
        let data = {
            let state = self.state()?;
            if state.is_denied(remote_path) {
                return Err(sftp_err(FX_PERMISSION_DENIED, "Permission denied"));
            }
            match state.find(remote_path) {
                Some(Node::File(data)) => data.clone(),
                Some(Node::Dir) => return Err(sftp_err(FX_FAILURE, "Is a directory")),
                None => return Err(sftp_err(FX_NO_SUCH_FILE, "No such file")),
            }
        };
        sink.write_all(&data)?;
        Ok(data.len() as u64)
    }

    fn upload(&mut self, local_path: &Path, remote_path: &str) -> TransportResult<u64> {
        let mut state = self.state()?;
        let data = std::fs::read(local_path)?;
        let parent = parent_of(remote_path).to_string();
        if state.is_denied(&parent) {
            return Err(sftp_err(FX_PERMISSION_DENIED, "Permission denied"));
        }
        if !matches!(state.find(&parent), Some(Node::Dir)) {
            return Err(sftp_err(FX_NO_SUCH_FILE, "No such file"));
        }
        let len = data.len() as u64;
        state.nodes.retain(|(p, _)| p != remote_path);
        state.nodes.push((remote_path.to_string(), Node::File(data)));
        Ok(len)
    }

    fn mkdir(&mut self, path: &str, _mode: i32) -> TransportResult<()> {
        let mut state = self.state()?;
        if state.is_denied(path) {
            return Err(sftp_err(FX_PERMISSION_DENIED, "Permission denied"));
        }
        if state.find(path).is_some() {
            return Err(sftp_err(FX_FAILURE, "Failure"));
        }
        if !matches!(state.find(parent_of(path)), Some(Node::Dir)) {
            return Err(sftp_err(FX_NO_SUCH_FILE, "No such file"));
        }
        state.nodes.push((path.to_string(), Node::Dir));
        Ok(())
    }

    fn rename(&mut self, old_path: &str, new_path: &str) -> TransportResult<()> {
        let mut state = self.state()?;
        if state.is_denied(old_path) || state.is_denied(new_path) {
            return Err(sftp_err(FX_PERMISSION_DENIED, "Permission denied"));
        }
        if state.find(old_path).is_none() {
            return Err(sftp_err(FX_NO_SUCH_FILE, "No such file"));
        }
        let below = format!("{}/", old_path);
        for (p, _) in state.nodes.iter_mut() {
            if p == old_path {
                *p = new_path.to_string();
            } else if let Some(rest) = p.strip_prefix(&below) {
                *p = format!("{}/{}", new_path, rest);
            }
        }
        Ok(())
    }

    fn exec(&mut self, command: &str) -> TransportResult<CommandOutput> {
        let mut state = self.state()?;
        state.commands.push(command.to_string());

        let ok = |stdout: &str| CommandOutput {
            exit_status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        let fail = |stderr: String| CommandOutput {
            exit_status: 1,
            stdout: String::new(),
            stderr,
        };

        if let Some(arg) = command.strip_prefix("rm -rf ") {
            let path = unquote(arg);
            if state.is_denied(&path) {
                return Ok(fail(format!("rm: cannot remove '{}': Permission denied\n", path)));
            }
            if !state.sticky.contains(&path) {
                state.remove_tree(&path);
            }
            return Ok(ok(""));
        }

        if let Some(arg) = command.strip_prefix("stat ") {
            let path = unquote(arg.trim_end_matches(" 2>/dev/null"));
            return Ok(match state.find(&path) {
                Some(_) => ok(&format!("  File: {}\n", path)),
                None => CommandOutput {
                    exit_status: 1,
                    ..Default::default()
                },
            });
        }

        match command {
            "cat ~/.bash_history" => Ok(match &state.history {
                Some(history) => ok(history),
                None => fail("cat: .bash_history: No such file or directory\n".to_string()),
            }),
            "df -h" => Ok(ok(&state.df)),
            other => Ok(CommandOutput {
                exit_status: 127,
                stdout: String::new(),
                stderr: format!("sh: {}: command not found\n", other),
            }),
        }
    }

    fn close(&mut self) -> TransportResult<()> {
        let mut state = self.remote.lock();
        state.calls += 1;
        if !self.closed {
            self.closed = true;
            state.closes += 1;
        }
        Ok(())
    }

    fn auth_method(&self) -> &str {
        &self.auth_method
    }
}

/// Connects to a [`MemoryRemote`], optionally checking a password, delaying
/// or failing outright.
#[derive(Debug)]
pub struct MemoryConnector {
    remote: MemoryRemote,
    password: Option<String>,
    delay: Duration,
    unreachable: bool,
    calls: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(remote: MemoryRemote) -> Self {
        Self {
            remote,
            password: None,
            delay: Duration::ZERO,
            unreachable: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Only this password authenticates.
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Hold every connect for `delay` on the blocking thread.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every connect times out.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        _identity: &ConnectionIdentity,
        credentials: &Credentials,
    ) -> TransportResult<Box<dyn Transport>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.unreachable {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connection timed out",
            )));
        }
        if let (Some(expected), Credentials::Password(given)) = (&self.password, credentials) {
            if given.expose_secret() != expected {
                return Err(TransportError::Session {
                    code: SESSION_AUTHENTICATION_FAILED,
                    message: "Authentication failed (username/password)".into(),
                });
            }
        }
        let mut transport = self.remote.transport();
        transport.auth_method = credentials.method().to_string();
        Ok(Box::new(transport))
    }
}
