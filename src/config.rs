use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

/// Runtime settings.
///
/// Loaded from the YAML file named by `WEBSTEP_CONFIG` (all keys optional),
/// then overridden by `LISTEN` and `WEBSTEP_ROOT`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Directory served by the file handler.
    pub root: PathBuf,
    pub keep_alive_secs: u64,
    /// Blocking worker threads for handlers.
    pub workers: usize,
    pub max_connections: usize,
    pub max_line_length: usize,
    pub max_body_length: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            root: PathBuf::from("."),
            keep_alive_secs: 6,
            workers: 4,
            max_connections: 1024,
            max_line_length: 8 * 1024,
            max_body_length: 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os("WEBSTEP_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }
        if let Some(root) = std::env::var_os("WEBSTEP_ROOT") {
            cfg.root = PathBuf::from(root);
        }

        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn level(&self) -> anyhow::Result<tracing::Level> {
        tracing::Level::from_str(&self.log_level)
            .map_err(|_| anyhow::anyhow!("unknown log level '{}'", self.log_level))
    }
}
