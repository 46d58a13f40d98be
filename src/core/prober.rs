//! Reachability probes
//!
//! A probe is `attempts` independent echo requests. Timeouts, unreachable
//! hosts and names that do not resolve all count as failed attempts; a probe
//! never errors.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::types::ProbeResult;
use crate::PROBE_TIMEOUT_MS;

/// Extra time allowed for the ping process itself beyond its echo timeout
const PING_PROCESS_SLACK: Duration = Duration::from_secs(2);

/// Issues reachability probes
#[async_trait]
pub trait Prober: Send + Sync {
    /// Run `attempts` echo requests against `address`
    async fn probe(&self, address: &str, attempts: u32) -> ProbeResult;

    /// Does `address` resolve to a network location?
    async fn resolves(&self, address: &str) -> bool;
}

/// Prober using the system `ping` command, one echo per attempt
#[derive(Debug, Clone)]
pub struct PingProber {
    timeout: Duration,
}

impl Default for PingProber {
    fn default() -> Self {
        Self::new(Duration::from_millis(PROBE_TIMEOUT_MS))
    }
}

impl PingProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Arguments for a single echo request
    fn ping_args(&self, host: &str) -> Vec<String> {
        if cfg!(windows) {
            vec![
                "-n".to_string(),
                "1".to_string(),
                "-w".to_string(),
                self.timeout.as_millis().to_string(),
                host.to_string(),
            ]
        } else {
            let secs = self.timeout.as_secs().max(1);
            vec![
                "-c".to_string(),
                "1".to_string(),
                "-W".to_string(),
                secs.to_string(),
                host.to_string(),
            ]
        }
    }

    async fn echo(&self, host: &str) -> bool {
        let mut command = Command::new("ping");
        command
            .args(self.ping_args(host))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout + PING_PROCESS_SLACK, command.output()).await {
            Ok(Ok(output)) => {
                // Windows ping exits 0 on "Destination host unreachable" replies
                let replied = !cfg!(windows)
                    || String::from_utf8_lossy(&output.stdout).contains("TTL=");
                output.status.success() && replied
            }
            Ok(Err(e)) => {
                debug!("ping {} could not run: {}", host, e);
                false
            }
            Err(_) => {
                debug!("ping {} timed out", host);
                false
            }
        }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str, attempts: u32) -> ProbeResult {
        let host = host_of(address);
        let mut succeeded = 0;
        for _ in 0..attempts {
            if self.echo(host).await {
                succeeded += 1;
            }
        }
        debug!("probe {}: {}/{}", host, succeeded, attempts);
        ProbeResult::from_counts(attempts, succeeded)
    }

    async fn resolves(&self, address: &str) -> bool {
        let host = host_of(address);
        if host.is_empty() {
            return false;
        }
        match tokio::net::lookup_host((host, 0)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!("lookup {} failed: {}", host, e);
                false
            }
        }
    }
}

/// Host part of an address that may be given as a URL
pub fn host_of(address: &str) -> &str {
    let rest = address.trim();
    let rest = match rest.find("://") {
        Some(i) => &rest[i + 3..],
        None => rest,
    };
    let rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let rest = rest.rsplit('@').next().unwrap_or(rest);

    if let Some(inner) = rest.strip_prefix('[') {
        // [v6]:port
        return inner.split(']').next().unwrap_or(inner);
    }
    match rest.split_once(':') {
        // Exactly one colon is host:port; more is a bare IPv6 address
        Some((host, port)) if !port.contains(':') => host,
        _ => rest,
    }
}
