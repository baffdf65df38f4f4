//! Tank node configuration with TOML file support.

use serde::{Deserialize, Serialize};

use crate::TankError;

/// Configuration for a tank node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TankConfig {
    /// Address of the broker endpoint.
    #[serde(default = "default_broker_addr")]
    pub broker_addr: String,

    /// Address to bind the local endpoint on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Simulation tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How long the ring token is held before being passed on.
    #[serde(default = "default_token_hold_ms")]
    pub token_hold_ms: u64,

    /// Upper bound on locally spawned fish.
    #[serde(default = "default_max_fish")]
    pub max_fish: usize,

    /// Whether to wrap the transport in the link-encryption layer.
    #[serde(default)]
    pub secure: bool,
}

fn default_broker_addr() -> String {
    "127.0.0.1:4711".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_token_hold_ms() -> u64 {
    2_000
}

fn default_max_fish() -> usize {
    5
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            broker_addr: default_broker_addr(),
            bind_addr: default_bind_addr(),
            tick_interval_ms: default_tick_interval_ms(),
            token_hold_ms: default_token_hold_ms(),
            max_fish: default_max_fish(),
            secure: false,
        }
    }
}

impl TankConfig {
    /// Parse a config from TOML text; missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, TankError> {
        toml::from_str(text).map_err(|e| TankError::Config(e.to_string()))
    }
}
