//! Per-cycle result records

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::types::{ErrorKind, ProbeOutcome, ProbeResult, SessionState, Target};

/// Probe result for one inner target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: Target,
    pub result: ProbeResult,
}

/// Count of inner targets per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTally {
    pub good: usize,
    pub warn: usize,
    pub fail: usize,
}

/// Everything observed during one test cycle.
///
/// Built once by the cycle orchestrator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// 1-based cycle number
    pub cycle_index: u64,
    /// When the cycle started
    pub timestamp: DateTime<Local>,
    /// When the cycle finished
    pub completed_at: DateTime<Local>,
    /// The VPN site (address + display name)
    pub site: Target,
    /// Probe of the VPN site across the open Internet
    pub internet_result: ProbeResult,
    pub tunnel_opened: bool,
    /// Set when open() was attempted and failed
    pub tunnel_open_error: Option<ErrorKind>,
    /// Inner probes, in target-list order
    pub inner_results: Vec<TargetResult>,
    /// Set when close() was attempted and confirmed
    pub tunnel_closed: bool,
    /// Set when close() was attempted and not confirmed
    pub tunnel_close_error: Option<ErrorKind>,
    /// Stop was requested while this cycle ran; later steps were skipped
    pub cancelled: bool,
}

impl CycleRecord {
    /// Was open() attempted at all?
    pub fn open_attempted(&self) -> bool {
        self.tunnel_opened || self.tunnel_open_error.is_some()
    }

    /// Was close() attempted at all?
    pub fn close_attempted(&self) -> bool {
        self.tunnel_closed || self.tunnel_close_error.is_some()
    }

    /// Inner target outcome counts
    pub fn tally(&self) -> TargetTally {
        let mut tally = TargetTally::default();
        for entry in &self.inner_results {
            match entry.result.outcome() {
                ProbeOutcome::Good => tally.good += 1,
                ProbeOutcome::Warn => tally.warn += 1,
                ProbeOutcome::Fail => tally.fail += 1,
            }
        }
        tally
    }

    /// True when every attempted step succeeded
    pub fn is_clean(&self) -> bool {
        self.internet_result.is_good()
            && self.tunnel_opened
            && self.tunnel_closed
            && self.inner_results.iter().all(|entry| entry.result.is_good())
    }
}

/// Outcome of a whole run that ended without a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Cycles that produced a record
    pub cycles_run: u64,
    /// Ended by operator interrupt rather than cycle budget
    pub cancelled: bool,
    /// Automaton state after the shutdown sequence
    pub final_state: SessionState,
}
