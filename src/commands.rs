// ── Request-layer commands ────────────────────────────────────────────────────
//
// Thin wrappers that resolve the session for a request, delegate to it, and
// wrap the outcome in an `Envelope`. Nothing here returns an `Err`: every
// failure becomes `status: false` with a message and, when it came from the
// session layer, the error kind.

use crate::state::AppState;
use rfs_core::DiagnosticReport;
use rfs_sftp::sftp::diagnostics::DIAG_TIMEOUT;
use rfs_sftp::sftp::{
    diagnose_endpoint, is_normalised, ConnectionIdentity, Credentials, ErrorKind, FileEntry,
    RemoteError, RemoteSession, SessionInfo, SessionKey,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const NOT_LOGGED_IN: &str = "Not logged in";

/// Prefix of the per-download directories created under `tmpPath`.
const DOWNLOAD_DIR_PREFIX: &str = "dl-";

// ── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub status: bool,
    pub msg: String,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl<T> Envelope<T> {
    pub fn success(data: T, msg: impl Into<String>) -> Self {
        Self {
            status: true,
            msg: msg.into(),
            data,
            error_kind: None,
        }
    }

    pub fn failure(msg: impl Into<String>, data: T) -> Self {
        Self {
            status: false,
            msg: msg.into(),
            data,
            error_kind: None,
        }
    }

    pub fn from_error(err: &RemoteError, data: T) -> Self {
        Self {
            status: false,
            msg: err.message.clone(),
            data,
            error_kind: Some(err.kind),
        }
    }

    fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    fn with_msg_prefix(mut self, prefix: &str) -> Self {
        self.msg = format!("{}{}", prefix, self.msg);
        self
    }
}

fn empty() -> Value {
    json!({})
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub host_ip: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Key authentication; `password` then serves as the key passphrase.
    #[serde(default)]
    pub private_key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub key: String,
    pub host_ip: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesRequest {
    pub host_ip: String,
    pub username: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFileRequest {
    pub host_ip: String,
    pub username: String,
    pub remote_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub host_ip: String,
    pub username: String,
    pub location: String,
    /// Staged copy under `uploadTmpPath`; removed once the transfer ends.
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequest {
    pub host_ip: String,
    pub username: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathOperationRequest {
    pub host_ip: String,
    pub username: String,
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseRequest {
    pub host_ip: String,
    pub username: String,
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub file_name: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub active_connections: usize,
    pub connections: Vec<SessionInfo>,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn session_for(state: &AppState, host_ip: &str, username: &str) -> Option<Arc<RemoteSession>> {
    let identity = ConnectionIdentity::parse(host_ip, username).ok()?;
    let session = state.registry.get_by_identity(&identity).await;
    if session.is_none() {
        warn!("Client not found: {}@{}", username, host_ip);
    }
    session
}

/// Canonical form of `path` when it names something strictly inside `root`.
async fn confined(root: &Path, path: &Path) -> Option<PathBuf> {
    let root = tokio::fs::canonicalize(root).await.ok()?;
    let path = tokio::fs::canonicalize(path).await.ok()?;
    (path != root && path.starts_with(&root)).then_some(path)
}

/// The per-download directory holding `file`, if `file` sits directly in a
/// `dl-*` directory directly under `tmp_root`. Both paths are canonical.
fn staged_download_dir(tmp_root: &Path, file: &Path) -> Option<PathBuf> {
    let dir = file.parent()?;
    let is_download_dir = dir
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(DOWNLOAD_DIR_PREFIX));
    (is_download_dir && dir.parent() == Some(tmp_root)).then(|| dir.to_path_buf())
}

fn invalid_path(path: impl std::fmt::Display) -> Envelope<Value> {
    warn!("Rejected path {}", path);
    Envelope::failure(format!("Invalid path: {}", path), empty()).with_kind(ErrorKind::PermissionDenied)
}

// ── Connection ───────────────────────────────────────────────────────────────

pub async fn login(state: &AppState, req: LoginRequest) -> Envelope<Value> {
    let identity = match ConnectionIdentity::parse(&req.host_ip, &req.username) {
        Ok(identity) => identity,
        Err(e) => return Envelope::from_error(&e, empty()).with_msg_prefix("Login failed: "),
    };

    let credentials = match (req.private_key_path, req.password) {
        (Some(path), passphrase) => Credentials::PrivateKey {
            path: PathBuf::from(path),
            passphrase,
        },
        (None, Some(password)) => Credentials::Password(password),
        (None, None) => {
            return Envelope::failure("Login failed: no password or key given", empty())
                .with_kind(ErrorKind::PermissionDenied)
        }
    };

    match state.registry.add(identity, credentials).await {
        Ok((key, _)) => {
            info!("Successful login: {}@{}", req.username, req.host_ip);
            Envelope::success(
                json!({ "key": key, "hostIp": req.host_ip, "username": req.username }),
                "Login successful",
            )
        }
        Err(e) => {
            error!("Login failed for {}@{}: {}", req.username, req.host_ip, e);
            Envelope::from_error(&e, empty()).with_msg_prefix("Login failed: ")
        }
    }
}

pub async fn logout(state: &AppState, req: LogoutRequest) -> Envelope<Value> {
    if state.registry.remove(&SessionKey::from(req.key)).await {
        info!("Successful logout: {}@{}", req.username, req.host_ip);
        Envelope::success(empty(), "Logout successful")
    } else {
        warn!("Logout failed - client not found: {}@{}", req.username, req.host_ip);
        Envelope::failure("Client not found", empty())
    }
}

pub async fn list_sessions(state: &AppState) -> Envelope<StatusData> {
    let connections = state.registry.list_all().await;
    info!("Status request: {} active connections", connections.len());
    Envelope::success(
        StatusData {
            active_connections: connections.len(),
            connections,
        },
        "",
    )
}

/// Reachability report for a host, no login needed.
pub async fn diagnose(req: DiagnoseRequest) -> Envelope<Option<DiagnosticReport>> {
    let identity = match ConnectionIdentity::parse(&req.host_ip, &req.username) {
        Ok(identity) => identity,
        Err(e) => return Envelope::from_error(&e, None),
    };
    match diagnose_endpoint(&identity, DIAG_TIMEOUT).await {
        Ok(report) => {
            let msg = report.summary.clone();
            Envelope {
                status: report.reachable,
                msg,
                data: Some(report),
                error_kind: None,
            }
        }
        Err(e) => Envelope::from_error(&e, None),
    }
}

// ── Files ────────────────────────────────────────────────────────────────────

pub async fn list_files(state: &AppState, req: ListFilesRequest) -> Envelope<Vec<FileEntry>> {
    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        return Envelope::failure(NOT_LOGGED_IN, Vec::new());
    };

    match session.list_directory(&req.location).await {
        Ok(entries) => {
            info!("Listed {} files in {}", entries.len(), req.location);
            Envelope::success(entries, "")
        }
        Err(e) => {
            let msg = match e.kind {
                ErrorKind::PermissionDenied => format!("Permission denied for {}", req.location),
                ErrorKind::NotFound => format!("Directory not found: {}", req.location),
                _ => e.message.clone(),
            };
            error!("Error listing files in {}: {}", req.location, e);
            Envelope::failure(msg, Vec::new()).with_kind(e.kind)
        }
    }
}

/// Stage the remote file under `tmpPath`. Pass the returned path to
/// [`cleanup_staged`] once it has been delivered.
pub async fn get_file(state: &AppState, req: GetFileRequest) -> Envelope<Option<StagedFile>> {
    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        return Envelope::failure(NOT_LOGGED_IN, None);
    };

    match session.download_file(&req.remote_path, &state.settings.tmp_dir()).await {
        Ok(local_path) => {
            let file_name = local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            info!("Downloaded {} to {}", req.remote_path, local_path.display());
            Envelope::success(Some(StagedFile { file_name, local_path }), "")
        }
        Err(e) => {
            error!("Failed to download {}: {}", req.remote_path, e);
            Envelope::from_error(&e, None)
        }
    }
}

/// Send a file staged under `uploadTmpPath` and delete the staged copy.
/// Files anywhere else are refused and left alone.
pub async fn upload_file(state: &AppState, req: UploadRequest) -> Envelope<Value> {
    let Some(local_path) = confined(&state.settings.upload_tmp_dir(), &req.local_path).await else {
        return invalid_path(req.local_path.display());
    };

    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        remove_staged_upload(&local_path).await;
        return Envelope::failure(NOT_LOGGED_IN, empty());
    };

    let result = session.upload_file(&local_path, &req.location).await;
    remove_staged_upload(&local_path).await;

    let filename = local_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match result {
        Ok(true) => {
            info!("Uploaded {} to {}", filename, req.location);
            Envelope::success(json!({ "filename": filename }), "File uploaded successfully")
        }
        Ok(false) => Envelope::failure("Failed to upload file", empty()),
        Err(e) => {
            error!("Failed to upload {} to {}: {}", filename, req.location, e);
            Envelope::from_error(&e, empty())
        }
    }
}

async fn remove_staged_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Could not remove staged upload {}: {}", path.display(), e);
    }
}

/// Delete a file staged by [`get_file`] and its per-download directory.
/// Anything that is not such a staged file is refused.
pub async fn cleanup_staged(state: &AppState, path: &Path) -> Envelope<Value> {
    let tmp_root = match tokio::fs::canonicalize(state.settings.tmp_dir()).await {
        Ok(root) => root,
        Err(e) => {
            error!("Download staging directory unavailable: {}", e);
            return invalid_path(path.display());
        }
    };
    let Some((file, dir)) = confined(&tmp_root, path)
        .await
        .and_then(|file| staged_download_dir(&tmp_root, &file).map(|dir| (file, dir)))
    else {
        return invalid_path(path.display());
    };

    if let Err(e) = tokio::fs::remove_file(&file).await {
        error!("Error cleaning up file {}: {}", file.display(), e);
        return Envelope::failure(format!("Cleanup failed: {}", e), empty());
    }
    debug!("Cleaned up temporary file: {}", file.display());
    // only succeeds when the directory is now empty
    let _ = tokio::fs::remove_dir(&dir).await;
    Envelope::success(empty(), "")
}

// ── Path operations ──────────────────────────────────────────────────────────

pub async fn mkdir(state: &AppState, req: PathRequest) -> Envelope<Value> {
    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        return Envelope::failure(NOT_LOGGED_IN, empty());
    };

    match session.make_directory(&req.path).await {
        Ok(true) => {
            info!("Created directory {}", req.path);
            Envelope::success(empty(), "Directory created successfully")
        }
        Ok(false) => {
            error!("Failed to create directory {}", req.path);
            Envelope::failure("Failed to create directory", empty())
        }
        Err(e) => Envelope::from_error(&e, empty()),
    }
}

pub async fn remove(state: &AppState, req: PathRequest) -> Envelope<Value> {
    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        return Envelope::failure(NOT_LOGGED_IN, empty());
    };

    if !is_normalised(&req.path) {
        return invalid_path(&req.path);
    }

    match session.remove_path(&req.path).await {
        Ok(true) => {
            info!("Removed {}", req.path);
            Envelope::success(empty(), "File/directory removed successfully")
        }
        Ok(false) => {
            error!("Failed to remove {}", req.path);
            let failure = Envelope::failure("Failed to remove or path protected", empty());
            match session.check_removable(&req.path) {
                Err(e) => failure.with_kind(e.kind),
                Ok(()) => failure,
            }
        }
        Err(e) => Envelope::from_error(&e, empty()),
    }
}

pub async fn rename(state: &AppState, req: PathOperationRequest) -> Envelope<Value> {
    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        return Envelope::failure(NOT_LOGGED_IN, empty());
    };

    if let Some(bad) = [&req.old_path, &req.new_path].into_iter().find(|p| !is_normalised(p)) {
        return invalid_path(bad);
    }

    match session.rename_path(&req.old_path, &req.new_path).await {
        Ok(true) => Envelope::success(empty(), "File/directory renamed successfully"),
        Ok(false) => Envelope::failure("Failed to rename", empty()),
        Err(e) => {
            error!("Failed to rename {} to {}: {}", req.old_path, req.new_path, e);
            Envelope::from_error(&e, empty())
        }
    }
}

// ── System ───────────────────────────────────────────────────────────────────

pub async fn get_history(state: &AppState, req: PathRequest) -> Envelope<Vec<String>> {
    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        return Envelope::failure(NOT_LOGGED_IN, Vec::new());
    };
    match session.command_history().await {
        Ok(lines) => Envelope::success(lines, ""),
        Err(e) => Envelope::from_error(&e, Vec::new()),
    }
}

pub async fn get_df(state: &AppState, req: PathRequest) -> Envelope<Vec<String>> {
    let Some(session) = session_for(state, &req.host_ip, &req.username).await else {
        return Envelope::failure(NOT_LOGGED_IN, Vec::new());
    };
    match session.disk_usage().await {
        Ok(lines) => Envelope::success(lines, ""),
        Err(e) => Envelope::from_error(&e, Vec::new()),
    }
}
