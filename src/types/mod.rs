//! Core types for vpnmon

mod probe;
mod target;
mod state;
mod record;
mod error;
mod config;

pub use probe::{ProbeOutcome, ProbeResult};
pub use target::Target;
pub use state::SessionState;
pub use record::{CycleRecord, TargetResult, RunSummary, TargetTally};
pub use error::{ErrorKind, FatalError};
pub use config::RunConfig;
