//! vpnmon: unattended monitor for a remote facility reached over a VPN
//!
//! Each test cycle probes the VPN site across the open Internet, opens the
//! tunnel by driving the vendor's interactive CLI, probes the hosts inside the
//! facility, closes the tunnel and reports the results.
//!
//! Layering: `types` holds plain records, `core` holds the prober, the
//! session automaton, the cycle orchestrator and the run scheduler.

pub mod core;
pub mod types;

// =============================================================================
// PROBING
// =============================================================================

/// Default echo attempts per probe, for the VPN site and every inner target
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 4;

/// Per-attempt echo timeout (milliseconds)
pub const PROBE_TIMEOUT_MS: u64 = 1000;

/// Inner targets probed at once; probes share the tunnel with everything else
pub const PROBE_CONCURRENCY: usize = 2;

// =============================================================================
// VENDOR CLI TIMING [empirical]
// =============================================================================

/// Upper bound for any prompt during open() (seconds).
/// Success usually takes ~15 s; errors and client self-updates can take far longer.
pub const PROMPT_TIMEOUT_SECS: u64 = 120;

/// Upper bound for the disconnect confirmation during close() (seconds)
pub const CLOSE_TIMEOUT_SECS: u64 = 10;

/// Pause before every command sent to the vendor CLI (milliseconds).
/// Commands sent back-to-back are sometimes ignored.
pub const CLI_COMMAND_DELAY_MS: u64 = 500;

// =============================================================================
// RUN DEFAULTS
// =============================================================================

/// Default number of test cycles (-1 = until stopped)
pub const DEFAULT_CYCLES: i64 = 200;

/// Default delay between test cycles (seconds)
pub const DEFAULT_DELAY_SECS: u64 = 1800;

/// Default human-readable VPN site name
pub const DEFAULT_VPN_NAME: &str = "VPN Gateway";

/// Default parameters file
pub const DEFAULT_PARAMS_FILE: &str = "vpnmon_params.csv";

/// Default targets file
pub const DEFAULT_TARGETS_FILE: &str = "vpnmon_targets.csv";

/// Default datalog file
pub const DEFAULT_DATALOG_FILE: &str = "vpnmon_datalog.csv";

// =============================================================================
// DATALOG + ALERTS
// =============================================================================

/// Write attempts while another program holds the datalog
pub const DATALOG_WRITE_RETRIES: u32 = 5;

/// Pause between datalog write attempts (seconds)
pub const DATALOG_RETRY_DELAY_SECS: u64 = 15;

/// Gap between consecutive terminal bells (milliseconds)
pub const ALERT_BEEP_GAP_MS: u64 = 300;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
