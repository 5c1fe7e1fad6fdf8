use crate::config::Settings;
use rfs_sftp::sftp::{ConnectionRegistry, Connector, Ssh2Connector};
use std::sync::Arc;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub settings: Settings,
    pub registry: ConnectionRegistry,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Real SSH connections tuned from `settings.transport`.
    pub fn new(settings: Settings) -> Self {
        let connector = Arc::new(Ssh2Connector::new(settings.transport.clone()));
        Self::with_connector(settings, connector)
    }

    pub fn with_connector(settings: Settings, connector: Arc<dyn Connector>) -> Self {
        let registry = ConnectionRegistry::new(connector, settings.path_guard());
        Self { settings, registry }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Close every session. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down, closing remote sessions");
        self.registry.shutdown().await;
    }
}
