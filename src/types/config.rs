//! Resolved run configuration

use std::time::Duration;

use crate::types::Target;

/// Read-only input to the run scheduler, built once by the settings layer
#[derive(Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Human-readable VPN site name
    pub vpn_name: String,
    /// VPN site URL or IP address
    pub vpn_address: String,
    pub username: String,
    pub password: String,
    /// Inner hosts, probed in this order; may be empty
    pub targets: Vec<Target>,
    /// Cycles to run; -1 runs until stopped
    pub cycle_count: i64,
    /// Pause between cycles (seconds)
    pub delay_seconds: u64,
    /// Mute audible alerts
    pub quiet: bool,
    /// Echo attempts per probe
    pub probe_attempts: u32,
}

impl RunConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    /// The VPN site as a probe target
    pub fn site(&self) -> Target {
        Target::new(self.vpn_address.clone(), self.vpn_name.clone())
    }

    pub fn is_unbounded(&self) -> bool {
        self.cycle_count < 0
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("vpn_name", &self.vpn_name)
            .field("vpn_address", &self.vpn_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("targets", &self.targets)
            .field("cycle_count", &self.cycle_count)
            .field("delay_seconds", &self.delay_seconds)
            .field("quiet", &self.quiet)
            .field("probe_attempts", &self.probe_attempts)
            .finish()
    }
}
