//! Audible alerts for failed checks

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;

use crate::ALERT_BEEP_GAP_MS;

/// How loudly to complain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// VPN site probe, tunnel open or tunnel close failed
    Major,
    /// One inner target was not Good
    Minor,
}

impl Severity {
    /// Terminal bells rung for this severity
    pub fn beeps(&self) -> u32 {
        match self {
            Severity::Major => 3,
            Severity::Minor => 1,
        }
    }
}

/// Receives "a failure occurred" signals
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, severity: Severity);
}

/// Rings the terminal bell unless muted
#[derive(Debug, Clone)]
pub struct Sounder {
    quiet: bool,
    gap: Duration,
}

impl Sounder {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            gap: Duration::from_millis(ALERT_BEEP_GAP_MS),
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[async_trait]
impl AlertSink for Sounder {
    async fn alert(&self, severity: Severity) {
        if self.quiet {
            return;
        }
        for _ in 0..severity.beeps() {
            print!("\x07"); // Terminal bell
            let _ = std::io::stdout().flush();
            tokio::time::sleep(self.gap).await;
        }
    }
}
