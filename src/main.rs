use anyhow::{Context, Result};
use remotefs::{logging, AppState, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("loading settings")?;
    logging::init(&settings)?;
    settings.ensure_directories()?;

    info!(
        "remotefs v{} ready, {} protected prefixes, staging in {}",
        env!("CARGO_PKG_VERSION"),
        settings.protected_prefixes.len(),
        settings.tmp_path
    );

    let state = AppState::new(settings).shared();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    state.shutdown().await;
    Ok(())
}
