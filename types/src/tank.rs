//! Broker-assigned tank identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity of a tank node, assigned by the broker on registration.
///
/// Identities are of the form `tank<N>` with a monotonically increasing
/// counter; they are unique and never reused while the tank is active.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TankId(String);

impl TankId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Build the identity for the `n`-th registered tank.
    pub fn numbered(n: u64) -> Self {
        Self(format!("tank{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TankId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
