//! Client configuration from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::payload::PayloadLocation;

/// Client configuration. File: ~/.config/bpsock/config.toml or /etc/bpsock/config.toml.
/// Env overrides: BPSOCK_PAYLOAD_LOCATION, BPSOCK_RECEIVE_POLL_SECS, BPSOCK_PAYLOAD_THRESHOLD,
/// BPSOCK_SCRATCH_DIR, BPSOCK_LOOP_WAIT_SECS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Where sockets put received payloads by default (default memory).
    #[serde(default)]
    pub payload_location: PayloadLocation,
    /// Engine wait per attempt when receiving without a timeout (default 60).
    #[serde(default = "default_receive_poll_secs")]
    pub receive_poll_secs: u64,
    /// Receive loops hand payloads of at least this many bytes over as files (default 64 KiB).
    #[serde(default = "default_payload_threshold")]
    pub payload_threshold: usize,
    /// Directory for receive loop scratch files (default: system temp dir).
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Bounded wait of one receive loop iteration (default 1).
    #[serde(default = "default_loop_wait_secs")]
    pub loop_wait_secs: u64,
}

fn default_receive_poll_secs() -> u64 {
    60
}
fn default_payload_threshold() -> usize {
    64 * 1024
}
fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}
fn default_loop_wait_secs() -> u64 {
    1
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            payload_location: PayloadLocation::default(),
            receive_poll_secs: default_receive_poll_secs(),
            payload_threshold: default_payload_threshold(),
            scratch_dir: default_scratch_dir(),
            loop_wait_secs: default_loop_wait_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    /// Poll window of indefinite receives; never below one second.
    pub fn receive_poll(&self) -> Duration {
        Duration::from_secs(self.receive_poll_secs.max(1))
    }

    /// Bounded wait of a receive loop iteration; never below one second.
    pub fn loop_wait(&self) -> Duration {
        Duration::from_secs(self.loop_wait_secs.max(1))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("BPSOCK_PAYLOAD_LOCATION") {
            match parse_location(&s) {
                Some(l) => self.payload_location = l,
                None => warn!(value = %s, "ignoring BPSOCK_PAYLOAD_LOCATION"),
            }
        }
        if let Some(s) = var("BPSOCK_RECEIVE_POLL_SECS") {
            if let Ok(v) = s.parse() {
                self.receive_poll_secs = v;
            }
        }
        if let Some(s) = var("BPSOCK_PAYLOAD_THRESHOLD") {
            if let Ok(v) = s.parse() {
                self.payload_threshold = v;
            }
        }
        if let Some(s) = var("BPSOCK_SCRATCH_DIR") {
            if !s.is_empty() {
                self.scratch_dir = PathBuf::from(s);
            }
        }
        if let Some(s) = var("BPSOCK_LOOP_WAIT_SECS") {
            if let Ok(v) = s.parse() {
                self.loop_wait_secs = v;
            }
        }
    }
}

fn parse_location(s: &str) -> Option<PayloadLocation> {
    match s.trim().to_ascii_lowercase().as_str() {
        "memory" => Some(PayloadLocation::Memory),
        "file" => Some(PayloadLocation::File),
        "temporary_file" | "temporary-file" => Some(PayloadLocation::TemporaryFile),
        _ => None,
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> ClientConfig {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/bpsock/config.toml"));
    }
    out.push(PathBuf::from("/etc/bpsock/config.toml"));
    out
}

fn load_file() -> Option<ClientConfig> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match ClientConfig::from_file(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring config file");
            None
        }
    }
}
