//! Application settings.
//!
//! Defaults, then the JSON file named by `CONFIG_PATH`
//! (`./config/config.json` when unset), then `RFS_*` environment variables.

use anyhow::{Context, Result};
use rfs_sftp::sftp::{PathGuard, TransportTuning, DEFAULT_PROTECTED_PREFIXES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "./config/config.json";

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_tmp_path() -> String {
    "./dtmp/".into()
}
fn default_upload_tmp_path() -> String {
    "./utmp/".into()
}
fn default_share_path() -> String {
    "./share/".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_protected_prefixes() -> Vec<String> {
    DEFAULT_PROTECTED_PREFIXES.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_tmp_path", alias = "tmp_path")]
    pub tmp_path: String,
    #[serde(default = "default_upload_tmp_path", alias = "upload_tmp_path")]
    pub upload_tmp_path: String,
    #[serde(default = "default_share_path", alias = "share_path")]
    pub share_path: String,
    #[serde(default = "default_log_level", alias = "log_level")]
    pub log_level: String,
    #[serde(default, alias = "log_format")]
    pub log_format: LogFormat,
    #[serde(default = "default_protected_prefixes", alias = "protected_prefixes")]
    pub protected_prefixes: Vec<String>,
    #[serde(default)]
    pub transport: TransportTuning,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tmp_path: default_tmp_path(),
            upload_tmp_path: default_upload_tmp_path(),
            share_path: default_share_path(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            protected_prefixes: default_protected_prefixes(),
            transport: TransportTuning::default(),
        }
    }
}

impl Settings {
    /// Load from `CONFIG_PATH` (or the default location) plus environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// A missing file means defaults; an unreadable or malformed one is an
    /// error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str::<Settings>(&content)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Settings::default()
        };
        settings.apply_env()?;
        settings.normalise_paths();
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("RFS_TMP_PATH") {
            self.tmp_path = v;
        }
        if let Ok(v) = std::env::var("RFS_UPLOAD_TMP_PATH") {
            self.upload_tmp_path = v;
        }
        if let Ok(v) = std::env::var("RFS_SHARE_PATH") {
            self.share_path = v;
        }
        if let Ok(v) = std::env::var("RFS_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("RFS_LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Ok(v) = std::env::var("RFS_PROTECTED_PREFIXES") {
            self.protected_prefixes = split_list(&v);
        }
        Ok(())
    }

    fn normalise_paths(&mut self) {
        for p in [&mut self.tmp_path, &mut self.upload_tmp_path, &mut self.share_path] {
            if !p.ends_with('/') {
                p.push('/');
            }
        }
    }

    pub fn path_guard(&self) -> PathGuard {
        PathGuard::new(self.protected_prefixes.iter().cloned())
    }

    pub fn tmp_dir(&self) -> PathBuf {
        PathBuf::from(&self.tmp_path)
    }

    pub fn upload_tmp_dir(&self) -> PathBuf {
        PathBuf::from(&self.upload_tmp_path)
    }

    /// Create the download, upload and share working directories.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.tmp_path, &self.upload_tmp_path, &self.share_path] {
            std::fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir))?;
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: &[&str] = &[
        "RFS_TMP_PATH",
        "RFS_UPLOAD_TMP_PATH",
        "RFS_SHARE_PATH",
        "RFS_LOG_LEVEL",
        "RFS_LOG_FORMAT",
        "RFS_PROTECTED_PREFIXES",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_file_gives_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.tmp_path, "./dtmp/");
        assert_eq!(settings.log_format, LogFormat::Text);
        assert!(settings.protected_prefixes.contains(&"/etc".to_string()));
        assert!(settings.transport.compress);
    }

    #[test]
    #[serial]
    fn file_values_are_normalised() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"tmp_path": "/var/tmp/dl", "logLevel": "debug", "protectedPrefixes": ["/data"], "transport": {"compress": false}}"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.tmp_path, "/var/tmp/dl/");
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.protected_prefixes, vec!["/data"]);
        assert!(!settings.transport.compress);
        assert_eq!(settings.transport.timeout_secs, 30);
    }

    #[test]
    #[serial]
    fn malformed_file_is_an_error() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("parsing config file"));
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        clear_env();
        std::env::set_var("RFS_LOG_LEVEL", "warn");
        std::env::set_var("RFS_SHARE_PATH", "/srv/share");
        std::env::set_var("RFS_LOG_FORMAT", "json");
        std::env::set_var("RFS_PROTECTED_PREFIXES", "/etc, /usr ,");
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.json"));
        clear_env();

        let settings = settings.unwrap();
        assert_eq!(settings.log_level, "warn");
        assert_eq!(settings.share_path, "/srv/share/");
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.protected_prefixes, vec!["/etc", "/usr"]);
        assert!(!settings.path_guard().is_allowed("/usr/bin"));
    }

    #[test]
    #[serial]
    fn bad_log_format_in_environment() {
        clear_env();
        std::env::set_var("RFS_LOG_FORMAT", "yaml");
        let result = Settings::load_from(Path::new("/nonexistent/config.json"));
        clear_env();
        assert!(result.is_err());
    }

    #[test]
    fn ensure_directories_creates_all() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().display().to_string();
        let settings = Settings {
            tmp_path: format!("{base}/d/"),
            upload_tmp_path: format!("{base}/u/"),
            share_path: format!("{base}/s/"),
            ..Settings::default()
        };
        settings.ensure_directories().unwrap();
        assert!(root.path().join("d").is_dir());
        assert!(root.path().join("u").is_dir());
        assert!(root.path().join("s").is_dir());
    }
}
