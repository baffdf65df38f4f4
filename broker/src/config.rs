//! Broker configuration with TOML file support.

use serde::{Deserialize, Serialize};

use crate::BrokerError;

/// Configuration for the membership broker.
///
/// Can be loaded from a TOML file via [`BrokerConfig::from_toml_str`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Address to bind the broker endpoint on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// How long a registration stays valid without renewal.
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    /// Interval of the lease sweep that evicts lapsed members.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Upper bound on concurrently processed inbound messages.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:4711".to_string()
}

fn default_lease_duration_ms() -> u64 {
    10_000
}

fn default_sweep_interval_ms() -> u64 {
    2_000
}

fn default_worker_count() -> usize {
    10
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            lease_duration_ms: default_lease_duration_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            worker_count: default_worker_count(),
        }
    }
}

impl BrokerConfig {
    /// Parse a config from TOML text; missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, BrokerError> {
        toml::from_str(text).map_err(|e| BrokerError::Config(e.to_string()))
    }
}
