//! # remotefs
//!
//! Process-level wiring around `rfs-sftp`: settings, logging, the shared
//! application state and the request-layer commands.

pub mod commands;
pub mod config;
pub mod logging;
pub mod state;

pub use config::Settings;
pub use state::{AppState, SharedState};
