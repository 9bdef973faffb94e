//! Bridge settings. Hosts load these from a file and the environment; see `evbridge-linux`.

use std::time::Duration;

use serde::Deserialize;

use crate::transfer::DEFAULT_ERROR_BUFFER_CAPACITY;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Capacity of each transfer's error buffer (default 256).
    #[serde(default = "default_error_buffer_capacity")]
    pub error_buffer_capacity: usize,
    /// Delay used when the engine asks for an immediate timeout (default 0: next loop tick).
    #[serde(default)]
    pub immediate_delay_ms: u64,
    /// Cancel the pending timer once no transfer is left after a socket event (default true).
    #[serde(default = "default_cancel_timer_when_idle")]
    pub cancel_timer_when_idle: bool,
    /// Tracing filter directive used by the host when `RUST_LOG` is unset (default "info").
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_error_buffer_capacity() -> usize {
    DEFAULT_ERROR_BUFFER_CAPACITY
}
fn default_cancel_timer_when_idle() -> bool {
    true
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl BridgeConfig {
    pub fn immediate_delay(&self) -> Duration {
        Duration::from_millis(self.immediate_delay_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            error_buffer_capacity: default_error_buffer_capacity(),
            immediate_delay_ms: 0,
            cancel_timer_when_idle: default_cancel_timer_when_idle(),
            log_filter: default_log_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.error_buffer_capacity, 256);
        assert_eq!(config.immediate_delay(), Duration::ZERO);
        assert!(config.cancel_timer_when_idle);
        assert_eq!(config.log_filter, "info");
    }
}
