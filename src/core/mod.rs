//! Core modules for vpnmon

pub mod alert;
pub mod config;
pub mod console;
pub mod cycle;
pub mod datalog;
pub mod mock;
pub mod prober;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod vpncli;

pub use alert::{AlertSink, Severity, Sounder};
pub use config::{load_targets, parse_targets, Overrides, Settings};
pub use console::{Console, ExpectError, ProcessConsole};
pub use cycle::run_cycle;
pub use datalog::{AppendOutcome, Datalog};
pub use prober::{PingProber, Prober};
pub use report::{ConsoleReport, ReportSink, Reporter};
pub use scheduler::RunScheduler;
pub use session::{Credentials, SessionAutomaton, SessionTimeouts};
pub use vpncli::{CliLauncher, VpnCliLauncher};
