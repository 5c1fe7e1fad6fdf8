//! Golden path against a real OpenSSH server.
//!
//!   docker compose -f crates/rfs-sftp/e2e/docker-compose.yml up -d
//!   cargo test -p rfs-sftp --features docker-e2e -- --ignored
//!
//! Target overridable with RFS_E2E_HOST / RFS_E2E_USER / RFS_E2E_PASSWORD.

#![cfg(feature = "docker-e2e")]

use rfs_sftp::sftp::*;
use std::sync::Arc;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn registry() -> ConnectionRegistry {
    let connector = Arc::new(Ssh2Connector::new(TransportTuning::default()));
    ConnectionRegistry::new(connector, PathGuard::new(["/etc", "/usr", "/bin"]))
}

#[tokio::test]
#[ignore]
async fn login_mkdir_list_remove() {
    let identity = ConnectionIdentity::parse(
        &env_or("RFS_E2E_HOST", "127.0.0.1:2222"),
        &env_or("RFS_E2E_USER", "alice"),
    )
    .unwrap();
    let registry = registry();
    let (key, session) = registry
        .add(identity.clone(), Credentials::password(env_or("RFS_E2E_PASSWORD", "alice-e2e")))
        .await
        .unwrap();

    let home = format!("/config/rfs-e2e-{}", std::process::id());
    assert!(session.make_directory(&home).await.unwrap());

    let listing = session.list_directory("/config").await.unwrap();
    let entry = listing.iter().find(|e| e.path == home).unwrap();
    assert_eq!(entry.entry_type, EntryType::Directory);

    let staging = tempfile::tempdir().unwrap();
    let local = staging.path().join("hello.txt");
    std::fs::write(&local, b"hello").unwrap();
    assert!(session.upload_file(&local, &home).await.unwrap());
    let fetched = session
        .download_file(&format!("{home}/hello.txt"), staging.path())
        .await
        .unwrap();
    assert_eq!(std::fs::read(fetched).unwrap(), b"hello");

    assert!(session.remove_path(&home).await.unwrap());
    let err = session.list_directory(&home).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    assert!(!session.remove_path("/etc").await.unwrap());
    assert!(!session.disk_usage().await.unwrap().is_empty());

    assert!(registry.remove(&key).await);
}

#[tokio::test]
#[ignore]
async fn wrong_password_is_permission_denied() {
    let identity = ConnectionIdentity::parse(
        &env_or("RFS_E2E_HOST", "127.0.0.1:2222"),
        &env_or("RFS_E2E_USER", "alice"),
    )
    .unwrap();
    let registry = registry();
    let err = registry
        .add(identity, Credentials::password("definitely-wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
    assert!(registry.is_empty().await);
}
