//! Load bridge config from file and environment.

use std::path::{Path, PathBuf};

use evbridge_core::BridgeConfig;
use tracing::warn;

/// File: ~/.config/evbridge/config.toml or /etc/evbridge/config.toml.
/// Env overrides: EVBRIDGE_ERROR_BUFFER_CAPACITY, EVBRIDGE_IMMEDIATE_DELAY_MS, EVBRIDGE_LOG.
pub fn load() -> BridgeConfig {
    let config = load_file().unwrap_or_default();
    apply_env(config, |name| std::env::var(name).ok())
}

/// Apply environment overrides read through `lookup`. Unparsable values are ignored.
pub fn apply_env(mut config: BridgeConfig, lookup: impl Fn(&str) -> Option<String>) -> BridgeConfig {
    if let Some(s) = lookup("EVBRIDGE_ERROR_BUFFER_CAPACITY") {
        match s.parse::<usize>() {
            Ok(n) if n > 0 => config.error_buffer_capacity = n,
            _ => warn!(value = %s, "ignoring EVBRIDGE_ERROR_BUFFER_CAPACITY"),
        }
    }
    if let Some(s) = lookup("EVBRIDGE_IMMEDIATE_DELAY_MS") {
        match s.parse::<u64>() {
            Ok(ms) => config.immediate_delay_ms = ms,
            Err(_) => warn!(value = %s, "ignoring EVBRIDGE_IMMEDIATE_DELAY_MS"),
        }
    }
    if let Some(s) = lookup("EVBRIDGE_LOG") {
        if !s.trim().is_empty() {
            config.log_filter = s;
        }
    }
    config
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/evbridge/config.toml"));
    }
    out.push(PathBuf::from("/etc/evbridge/config.toml"));
    out
}

fn load_file() -> Option<BridgeConfig> {
    // First existing file wins, even when it fails to parse.
    let path = config_paths().into_iter().find(|p| p.exists())?;
    read_file(&path)
}

fn read_file(path: &Path) -> Option<BridgeConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config");
            return None;
        }
    };
    match parse(&text) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            None
        }
    }
}

pub fn parse(text: &str) -> Result<BridgeConfig, toml::de::Error> {
    toml::from_str(text)
}
