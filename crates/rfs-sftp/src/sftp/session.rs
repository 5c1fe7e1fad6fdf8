// ── RemoteSession – one authenticated connection and its operations ──────────

use crate::sftp::error::*;
use crate::sftp::guard::PathGuard;
use crate::sftp::transport::{Connector, Transport, TransportResult};
use crate::sftp::types::*;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

const DIR_MODE: i32 = 0o755;

type TransportSlot = Arc<StdMutex<Option<Box<dyn Transport>>>>;

#[derive(Debug, Clone)]
struct Activity {
    last_activity: DateTime<Utc>,
    operations_count: u64,
}

pub struct RemoteSession {
    identity: ConnectionIdentity,
    key: SessionKey,
    guard: Arc<PathGuard>,
    auth_method: String,
    connected_at: DateTime<Utc>,
    activity: StdMutex<Activity>,
    closed: AtomicBool,
    transport: TransportSlot,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("key", &self.key)
            .field("auth_method", &self.auth_method)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RemoteSession {
    /// Wrap an already authenticated transport.
    pub fn new(identity: ConnectionIdentity, transport: Box<dyn Transport>, guard: Arc<PathGuard>) -> Self {
        let now = Utc::now();
        Self {
            key: identity.key(),
            auth_method: transport.auth_method().to_string(),
            identity,
            guard,
            connected_at: now,
            activity: StdMutex::new(Activity {
                last_activity: now,
                operations_count: 0,
            }),
            closed: AtomicBool::new(false),
            transport: Arc::new(StdMutex::new(Some(transport))),
        }
    }

    /// Connect and authenticate on the blocking pool.
    pub async fn open(
        identity: ConnectionIdentity,
        credentials: Credentials,
        connector: Arc<dyn Connector>,
        guard: Arc<PathGuard>,
    ) -> RemoteResult<Self> {
        let target = identity.clone();
        let connected = tokio::task::spawn_blocking(move || connector.connect(&target, &credentials))
            .await
            .map_err(|e| TransportError::Other(format!("connect task failed: {}", e)))
            .and_then(|r| r);

        match connected {
            Ok(transport) => Ok(Self::new(identity, transport, guard)),
            Err(e) => {
                let err = RemoteError::from_transport(&e, &format!("Connecting to {}", identity))
                    .with_session(identity.key().as_str());
                warn!("{}", err);
                Err(err)
            }
        }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> SessionInfo {
        let activity = self.activity.lock().unwrap_or_else(|e| e.into_inner()).clone();
        SessionInfo {
            key: self.key.clone(),
            host: self.identity.host.clone(),
            port: self.identity.port,
            username: self.identity.username.clone(),
            auth_method: self.auth_method.clone(),
            connected_at: self.connected_at,
            last_activity: activity.last_activity,
            operations_count: activity.operations_count,
        }
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    fn touch(&self) {
        let mut activity = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        activity.last_activity = Utc::now();
        activity.operations_count += 1;
    }

    /// Run `op` against the transport on the blocking pool, holding the
    /// transport lock for its whole duration.
    async fn with_transport<T, F>(&self, op: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Transport) -> TransportResult<T> + Send + 'static,
    {
        let slot = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| TransportError::Other("session lock poisoned".into()))?;
            match guard.as_mut() {
                Some(transport) => op(&mut **transport),
                None => Err(TransportError::Closed),
            }
        })
        .await;
        self.touch();
        match result {
            Ok(r) => r,
            Err(e) => Err(TransportError::Other(format!("blocking task failed: {}", e))),
        }
    }

    fn fail(&self, err: &TransportError, context: String) -> RemoteError {
        let err = RemoteError::from_transport(err, &context).with_session(self.key.as_str());
        warn!("{}", err);
        err
    }

    // ── Listing ──────────────────────────────────────────────────────────────

    pub async fn list_directory(&self, path: &str) -> RemoteResult<Vec<FileEntry>> {
        let dir = normalise_dir(path);

        let probe = dir.clone();
        self.with_transport(move |t| t.stat(&probe))
            .await
            .map_err(|e| self.fail(&e, format!("Cannot access '{}'", dir)))?;

        let target = dir.clone();
        let raw = self
            .with_transport(move |t| t.read_dir(&target))
            .await
            .map_err(|e| self.fail(&e, format!("Listing '{}' failed", dir)))?;

        let entries: Vec<FileEntry> = raw
            .iter()
            .filter(|e| !e.name.is_empty() && e.name != "." && e.name != "..")
            .map(|e| FileEntry::from_remote(&dir, e))
            .collect();

        debug!("[{}] listed {} ({} entries)", self.key, dir, entries.len());
        Ok(entries)
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    /// Fetch `remote_path` into a fresh sub-directory of `staging_dir` and
    /// return the local file path.
    pub async fn download_file(&self, remote_path: &str, staging_dir: &Path) -> RemoteResult<PathBuf> {
        let base = base_name(remote_path);
        if base.is_empty() {
            return Err(RemoteError::not_found(format!("No file name in '{}'", remote_path))
                .with_session(self.key.as_str()));
        }

        let local_io = |e: std::io::Error| self.fail(&TransportError::Io(e), "Preparing staging directory".into());
        std::fs::create_dir_all(staging_dir).map_err(local_io)?;
        let unique = tempfile::Builder::new()
            .prefix("dl-")
            .tempdir_in(staging_dir)
            .map_err(local_io)?;

        let target = unique.path().join(base);
        let dest = target.clone();
        let remote = remote_path.to_string();
        let result = self
            .with_transport(move |t| {
                let mut file = std::fs::File::create(&dest)?;
                t.download(&remote, &mut file)
            })
            .await;

        match result {
            Ok(bytes) => {
                #[allow(deprecated)]
                let kept = unique.into_path();
                info!("[{}] downloaded {} ({} bytes)", self.key, remote_path, bytes);
                Ok(kept.join(base))
            }
            // dropping `unique` removes the directory and the partial file
            Err(e) => Err(self.fail(&e, format!("Download of '{}' failed", remote_path))),
        }
    }

    /// Upload a local file into `remote_dir`, keeping its file name.
    pub async fn upload_file(&self, local_path: &Path, remote_dir: &str) -> RemoteResult<bool> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                RemoteError::not_found(format!("No file name in '{}'", local_path.display()))
                    .with_session(self.key.as_str())
            })?;
        let remote_path = join_remote(remote_dir, &name);

        let local = local_path.to_path_buf();
        let dest = remote_path.clone();
        let bytes = self
            .with_transport(move |t| t.upload(&local, &dest))
            .await
            .map_err(|e| self.fail(&e, format!("Upload to '{}' failed", remote_path)))?;

        info!("[{}] uploaded {} ({} bytes)", self.key, remote_path, bytes);
        Ok(true)
    }

    // ── Path operations ──────────────────────────────────────────────────────

    /// `Ok(false)` for ordinary refusals (exists, missing parent, denied);
    /// timeouts and protocol failures are errors.
    pub async fn make_directory(&self, path: &str) -> RemoteResult<bool> {
        let target = path.to_string();
        match self.with_transport(move |t| t.mkdir(&target, DIR_MODE)).await {
            Ok(()) => {
                info!("[{}] mkdir {}", self.key, path);
                Ok(true)
            }
            Err(e) => match translate(&e) {
                ErrorKind::Timeout | ErrorKind::ProtocolError => {
                    Err(self.fail(&e, format!("mkdir '{}' failed", path)))
                }
                kind => {
                    warn!("[{}] mkdir {} refused ({}): {}", self.key, path, kind, e);
                    Ok(false)
                }
            },
        }
    }

    /// Policy check alone; never touches the transport.
    pub fn check_removable(&self, path: &str) -> RemoteResult<()> {
        if self.guard.is_allowed(path) {
            Ok(())
        } else {
            Err(RemoteError::protected(path).with_session(self.key.as_str()))
        }
    }

    /// Recursively delete `path`. `Ok(true)` only once a follow-up `stat`
    /// no longer sees it.
    pub async fn remove_path(&self, path: &str) -> RemoteResult<bool> {
        if let Err(rejected) = self.check_removable(path) {
            warn!("{}", rejected);
            return Ok(false);
        }

        let rm = format!("rm -rf {}", shell_escape(path));
        let out = self
            .with_transport(move |t| t.exec(&rm))
            .await
            .map_err(|e| self.fail(&e, format!("Removing '{}' failed", path)))?;
        if !out.is_clean() {
            let err = TransportError::Command {
                exit_status: out.exit_status,
                stderr: out.stderr.trim().to_string(),
            };
            return Err(self.fail(&err, format!("Removing '{}' failed", path)));
        }

        let check = format!("stat {} 2>/dev/null", shell_escape(path));
        match self.with_transport(move |t| t.exec(&check)).await {
            Ok(out) if out.exit_status == 0 => {
                warn!("[{}] {} still present after rm", self.key, path);
                Ok(false)
            }
            Ok(_) => {
                info!("[{}] removed {}", self.key, path);
                Ok(true)
            }
            Err(e) => {
                debug!("[{}] post-remove check of {} failed: {}", self.key, path, e);
                Ok(true)
            }
        }
    }

    /// Plain SFTP rename. Not subject to the protected-path policy.
    pub async fn rename_path(&self, old_path: &str, new_path: &str) -> RemoteResult<bool> {
        let (from, to) = (old_path.to_string(), new_path.to_string());
        self.with_transport(move |t| t.rename(&from, &to))
            .await
            .map_err(|e| self.fail(&e, format!("Renaming '{}' to '{}' failed", old_path, new_path)))?;
        info!("[{}] rename {} → {}", self.key, old_path, new_path);
        Ok(true)
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn run_lines(&self, command: &'static str) -> RemoteResult<Vec<String>> {
        let out = self
            .with_transport(move |t| t.exec(command))
            .await
            .map_err(|e| self.fail(&e, format!("'{}' failed", command)))?;
        if out.exit_status != 0 {
            let err = TransportError::Command {
                exit_status: out.exit_status,
                stderr: out.stderr.trim().to_string(),
            };
            return Err(self.fail(&err, format!("'{}' failed", command)));
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// The remote user's shell history, comments dropped.
    pub async fn command_history(&self) -> RemoteResult<Vec<String>> {
        let lines = self.run_lines("cat ~/.bash_history").await?;
        Ok(lines.into_iter().filter(|l| !l.starts_with('#')).collect())
    }

    pub async fn disk_usage(&self) -> RemoteResult<Vec<String>> {
        self.run_lines("df -h").await
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Close the connection. Safe to call more than once.
    pub async fn close(&self) -> RemoteResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let slot = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || close_slot(&slot))
            .await
            .map_err(|e| TransportError::Other(format!("close task failed: {}", e)))
            .and_then(|r| r);

        match result {
            Ok(()) => {
                info!("[{}] session closed", self.key);
                Ok(())
            }
            Err(e) => Err(self.fail(&e, "Closing session".into())),
        }
    }
}

fn close_slot(slot: &StdMutex<Option<Box<dyn Transport>>>) -> TransportResult<()> {
    let taken = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    match taken {
        Some(mut transport) => transport.close(),
        None => Ok(()),
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // An operation still in flight owns the lock; its transport is
        // dropped with the last Arc instead.
        if let Ok(mut slot) = self.transport.try_lock() {
            if let Some(mut transport) = slot.take() {
                if let Err(e) = transport.close() {
                    warn!("[{}] close on drop failed: {}", self.key, e);
                }
            }
        }
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────────

/// Strip one trailing `/`; the empty result means root.
fn normalise_dir(path: &str) -> String {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, base)| base).unwrap_or(path)
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Single-quote `s` for a POSIX shell.
pub(crate) fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
