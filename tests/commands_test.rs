use remotefs::commands::{self, *};
use remotefs::{AppState, Settings};
use rfs_sftp::sftp::testing::{MemoryConnector, MemoryRemote};
use rfs_sftp::sftp::{EntryType, ErrorKind};
use std::sync::Arc;

struct Harness {
    state: AppState,
    remote: MemoryRemote,
    connector: Arc<MemoryConnector>,
    _staging: tempfile::TempDir,
}

fn harness() -> Harness {
    let staging = tempfile::tempdir().unwrap();
    let remote = MemoryRemote::new();
    remote
        .add_dir("/home")
        .add_dir("/home/alice")
        .add_file("/home/alice/app.log", b"line one\n")
        .add_dir("/etc")
        .set_history("ls\n#1700000000\ncd /home\n");

    let settings = Settings {
        tmp_path: format!("{}/dtmp/", staging.path().display()),
        upload_tmp_path: format!("{}/utmp/", staging.path().display()),
        share_path: format!("{}/share/", staging.path().display()),
        protected_prefixes: vec!["/etc".into()],
        ..Settings::default()
    };
    settings.ensure_directories().unwrap();

    let connector = Arc::new(MemoryConnector::new(remote.clone()).with_password("pw"));
    let state = AppState::with_connector(settings, connector.clone());
    Harness {
        state,
        remote,
        connector,
        _staging: staging,
    }
}

fn login_req(password: &str) -> LoginRequest {
    serde_json::from_value(serde_json::json!({
        "hostIp": "host:2222",
        "username": "alice",
        "password": password,
    }))
    .unwrap()
}

fn path_req(path: &str) -> PathRequest {
    PathRequest {
        host_ip: "host:2222".into(),
        username: "alice".into(),
        path: path.into(),
    }
}

fn list_req(location: &str) -> ListFilesRequest {
    ListFilesRequest {
        host_ip: "host:2222".into(),
        username: "alice".into(),
        location: location.into(),
    }
}

#[tokio::test]
async fn login_returns_deterministic_key() {
    let h = harness();
    let first = commands::login(&h.state, login_req("pw")).await;
    assert!(first.status);
    assert_eq!(first.msg, "Login successful");
    assert_eq!(first.data["key"], "alice@host:2222");
    assert_eq!(first.data["hostIp"], "host:2222");

    let second = commands::login(&h.state, login_req("pw")).await;
    assert_eq!(second.data["key"], first.data["key"]);
    assert_eq!(h.connector.connect_calls(), 1);
}

#[tokio::test]
async fn wrong_password_is_reported() {
    let h = harness();
    let env = commands::login(&h.state, login_req("nope")).await;
    assert!(!env.status);
    assert!(env.msg.starts_with("Login failed: "));
    assert_eq!(env.error_kind, Some(ErrorKind::PermissionDenied));
    assert_eq!(commands::list_sessions(&h.state).await.data.active_connections, 0);
}

#[tokio::test]
async fn operations_require_login() {
    let h = harness();
    let env = commands::list_files(&h.state, list_req("/home")).await;
    assert!(!env.status);
    assert_eq!(env.msg, NOT_LOGGED_IN);
    assert!(env.data.is_empty());

    let env = commands::mkdir(&h.state, path_req("/home/alice/x")).await;
    assert_eq!(env.msg, NOT_LOGGED_IN);
}

#[tokio::test]
async fn mkdir_list_remove_round() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let env = commands::mkdir(&h.state, path_req("/home/alice/x")).await;
    assert!(env.status, "{}", env.msg);
    assert_eq!(env.msg, "Directory created successfully");

    let listing = commands::list_files(&h.state, list_req("/home/alice")).await;
    let x = listing.data.iter().find(|e| e.name == "x").unwrap();
    assert_eq!(x.entry_type, EntryType::Directory);
    assert_eq!(x.path, "/home/alice/x");

    let env = commands::remove(&h.state, path_req("/home/alice/x")).await;
    assert!(env.status);
    assert_eq!(env.msg, "File/directory removed successfully");

    let listing = commands::list_files(&h.state, list_req("/home/alice")).await;
    assert!(listing.data.iter().all(|e| e.name != "x"));
}

#[tokio::test]
async fn protected_remove_never_reaches_the_host() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let env = commands::remove(&h.state, path_req("/etc")).await;
    assert!(!env.status);
    assert_eq!(env.msg, "Failed to remove or path protected");
    assert_eq!(env.error_kind, Some(ErrorKind::PermissionDenied));
    assert_eq!(h.remote.transport_calls(), 0);
    assert!(h.remote.exists("/etc"));
}

#[tokio::test]
async fn aliased_remove_paths_are_refused() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    for path in ["//etc", "/./etc", "/home/alice/../../etc", "etc", "/home//alice"] {
        let env = commands::remove(&h.state, path_req(path)).await;
        assert!(!env.status, "{}", path);
        assert_eq!(env.msg, format!("Invalid path: {}", path));
        assert_eq!(env.error_kind, Some(ErrorKind::PermissionDenied));
    }
    assert_eq!(h.remote.transport_calls(), 0);
    assert!(h.remote.exists("/etc"));
    assert!(h.remote.exists("/home/alice"));
}

#[tokio::test]
async fn aliased_rename_paths_are_refused() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let env = commands::rename(
        &h.state,
        PathOperationRequest {
            host_ip: "host:2222".into(),
            username: "alice".into(),
            old_path: "/home/alice/app.log".into(),
            new_path: "/home/alice/../../etc/app.log".into(),
        },
    )
    .await;
    assert!(!env.status);
    assert_eq!(env.error_kind, Some(ErrorKind::PermissionDenied));
    assert_eq!(h.remote.transport_calls(), 0);
    assert!(h.remote.exists("/home/alice/app.log"));
}

#[tokio::test]
async fn rename_into_protected_prefix_is_allowed() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let env = commands::rename(
        &h.state,
        PathOperationRequest {
            host_ip: "host:2222".into(),
            username: "alice".into(),
            old_path: "/home/alice/app.log".into(),
            new_path: "/etc/app.log".into(),
        },
    )
    .await;
    assert!(env.status);
    assert!(h.remote.exists("/etc/app.log"));
}

#[tokio::test]
async fn listing_errors_use_original_messages() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let env = commands::list_files(&h.state, list_req("/missing")).await;
    assert_eq!(env.msg, "Directory not found: /missing");
    assert_eq!(env.error_kind, Some(ErrorKind::NotFound));

    h.remote.add_dir("/root").deny("/root");
    let env = commands::list_files(&h.state, list_req("/root")).await;
    assert_eq!(env.msg, "Permission denied for /root");
}

#[tokio::test]
async fn download_then_cleanup() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let req = GetFileRequest {
        host_ip: "host:2222".into(),
        username: "alice".into(),
        remote_path: "/home/alice/app.log".into(),
    };
    let env = commands::get_file(&h.state, req).await;
    let staged = env.data.unwrap();
    assert_eq!(staged.file_name, "app.log");
    assert_eq!(std::fs::read(&staged.local_path).unwrap(), b"line one\n");

    let cleanup = commands::cleanup_staged(&h.state, &staged.local_path).await;
    assert!(cleanup.status, "{}", cleanup.msg);
    assert!(!staged.local_path.exists());
    assert_eq!(std::fs::read_dir(h.state.settings.tmp_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_download_leaves_staging_empty() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let req = GetFileRequest {
        host_ip: "host:2222".into(),
        username: "alice".into(),
        remote_path: "/var/log/app.log".into(),
    };
    let env = commands::get_file(&h.state, req).await;
    assert!(!env.status);
    assert_eq!(env.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(std::fs::read_dir(h.state.settings.tmp_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn upload_removes_staged_copy() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let local = h.state.settings.upload_tmp_dir().join("notes.md");
    std::fs::write(&local, b"# notes").unwrap();
    let env = commands::upload_file(
        &h.state,
        UploadRequest {
            host_ip: "host:2222".into(),
            username: "alice".into(),
            location: "/home/alice".into(),
            local_path: local.clone(),
        },
    )
    .await;

    assert!(env.status, "{}", env.msg);
    assert_eq!(env.data["filename"], "notes.md");
    assert_eq!(h.remote.file_contents("/home/alice/notes.md").unwrap(), b"# notes");
    assert!(!local.exists());
}

#[tokio::test]
async fn upload_outside_staging_is_refused() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let elsewhere = tempfile::tempdir().unwrap();
    let precious = elsewhere.path().join("precious.txt");
    std::fs::write(&precious, b"keep me").unwrap();

    // directly outside, and escaping the staging directory through `..`
    let upload_dir = h.state.settings.upload_tmp_dir();
    let mut escaped = upload_dir.clone();
    for _ in upload_dir.components().skip(1) {
        escaped.push("..");
    }
    escaped.push(precious.strip_prefix("/").unwrap());
    for local_path in [precious.clone(), escaped] {
        let env = commands::upload_file(
            &h.state,
            UploadRequest {
                host_ip: "host:2222".into(),
                username: "alice".into(),
                location: "/nonexistent".into(),
                local_path,
            },
        )
        .await;
        assert!(!env.status);
        assert_eq!(env.error_kind, Some(ErrorKind::PermissionDenied));
    }

    assert_eq!(std::fs::read(&precious).unwrap(), b"keep me");
    assert_eq!(h.remote.transport_calls(), 0);
}

#[tokio::test]
async fn cleanup_outside_staging_is_refused() {
    let h = harness();

    let elsewhere = tempfile::tempdir().unwrap();
    let victim = elsewhere.path().join("victim.txt");
    std::fs::write(&victim, b"x").unwrap();
    let env = commands::cleanup_staged(&h.state, &victim).await;
    assert!(!env.status);
    assert_eq!(env.error_kind, Some(ErrorKind::PermissionDenied));
    assert!(victim.exists());
    assert!(elsewhere.path().exists());

    // inside tmpPath but not in a per-download directory
    let loose = h.state.settings.tmp_dir().join("loose.txt");
    std::fs::write(&loose, b"x").unwrap();
    let env = commands::cleanup_staged(&h.state, &loose).await;
    assert!(!env.status);
    assert!(loose.exists());
}

#[tokio::test]
async fn history_and_df() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let history = commands::get_history(&h.state, path_req("")).await;
    assert_eq!(history.data, vec!["ls", "cd /home"]);

    let df = commands::get_df(&h.state, path_req("")).await;
    assert!(df.status);
    assert!(df.data[0].starts_with("Filesystem"));
}

#[tokio::test]
async fn logout_then_shutdown() {
    let h = harness();
    commands::login(&h.state, login_req("pw")).await;

    let sessions = commands::list_sessions(&h.state).await;
    assert_eq!(sessions.data.active_connections, 1);
    assert_eq!(sessions.data.connections[0].username, "alice");

    let logout = LogoutRequest {
        key: "alice@host:2222".into(),
        host_ip: "host:2222".into(),
        username: "alice".into(),
    };
    assert_eq!(commands::logout(&h.state, logout.clone()).await.msg, "Logout successful");
    assert_eq!(commands::logout(&h.state, logout).await.msg, "Client not found");
    assert_eq!(h.remote.close_count(), 1);

    commands::login(&h.state, login_req("pw")).await;
    h.state.shutdown().await;
    h.state.shutdown().await;
    assert_eq!(h.remote.close_count(), 2);
    assert_eq!(commands::list_sessions(&h.state).await.data.active_connections, 0);
}
