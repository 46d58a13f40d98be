//! Inner host definitions

use serde::{Deserialize, Serialize};

/// One host inside the facility, reachable only through the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// IP address, host name or URL
    pub address: String,
    /// Display name
    pub label: String,
}

impl Target {
    pub fn new(address: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            label: label.into(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.address)
    }
}
