//! Scripted stand-ins for the network, the vendor CLI and the sinks
//!
//! Lets the automaton, orchestrator and scheduler run end to end without a
//! VPN, a vendor client or a terminal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::alert::{AlertSink, Severity};
use crate::core::console::{Console, ExpectError, OutputBuffer};
use crate::core::prober::Prober;
use crate::core::report::ReportSink;
use crate::core::vpncli::CliLauncher;
use crate::types::{CycleRecord, ErrorKind, FatalError, ProbeResult, RunSummary};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// PROBER
// =============================================================================

/// Prober answering from a script instead of the network.
///
/// Addresses without a script answer every attempt.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    /// Successes per call; the last entry repeats
    answers: Mutex<HashMap<String, Vec<u32>>>,
    unresolvable: HashSet<String>,
    cancel_on: HashMap<String, CancellationToken>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every probe of `address` gets `succeeded` answers
    pub fn answer(self, address: &str, succeeded: u32) -> Self {
        self.answer_sequence(address, vec![succeeded])
    }

    /// Successive probes of `address` get successive answers
    pub fn answer_sequence(self, address: &str, succeeded: Vec<u32>) -> Self {
        lock(&self.answers).insert(address.to_string(), succeeded);
        self
    }

    /// Name lookup of `address` fails
    pub fn unresolvable(mut self, address: &str) -> Self {
        self.unresolvable.insert(address.to_string());
        self
    }

    /// Probing `address` raises `signal`, as an operator Ctrl-C mid-probe would
    pub fn cancel_when_probed(mut self, address: &str, signal: CancellationToken) -> Self {
        self.cancel_on.insert(address.to_string(), signal);
        self
    }

    /// Addresses probed so far, in call order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &str, attempts: u32) -> ProbeResult {
        lock(&self.calls).push(address.to_string());
        if let Some(signal) = self.cancel_on.get(address) {
            signal.cancel();
        }
        let succeeded = {
            let mut answers = lock(&self.answers);
            match answers.get_mut(address) {
                Some(script) if script.len() > 1 => script.remove(0),
                Some(script) => script.first().copied().unwrap_or(attempts),
                None => attempts,
            }
        };
        // Let sibling probes interleave like real network waits
        tokio::task::yield_now().await;
        ProbeResult::from_counts(attempts, succeeded)
    }

    async fn resolves(&self, address: &str) -> bool {
        !self.unresolvable.contains(address)
    }
}

// =============================================================================
// VENDOR CLI
// =============================================================================

/// How the fake vendor CLI behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeCliMode {
    /// Everything works
    Healthy,
    /// Existing client instances cannot be terminated
    KillFails,
    /// The CLI binary cannot be started
    SpawnFails,
    /// The CLI starts but never prints its prompt
    Silent,
    /// A previous session was left connected; disconnect works
    AlreadyConnected,
    /// A previous session was left connected; disconnect hangs
    StuckConnected,
    /// The site name does not resolve for the client
    Unreachable,
    /// Another vendor application holds the client
    OtherClientRunning,
    /// Credentials are refused
    LoginRejected,
    /// The connect command is never answered
    ConnectHangs,
    /// Banner acceptance reports a driver failure
    DriverError,
    /// The tunnel comes up after the banner but the client never says so
    BannerHangs,
    /// Connects fine, but disconnect is never confirmed
    DisconnectHangs,
}

/// Counters observed by tests
#[derive(Debug, Default)]
pub struct FakeCliStats {
    kills: AtomicUsize,
    spawns: AtomicUsize,
    live: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeCliStats {
    /// terminate_existing() calls
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Successful spawn() calls
    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Console handles not yet terminated or dropped
    pub fn live_consoles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FakeHost {
    mode: Mutex<FakeCliMode>,
    /// Tunnel state lives in the client's agent, not in one CLI process
    tunnel: AtomicBool,
    /// Bumped whenever every CLI process on the host is killed
    generation: AtomicUsize,
    /// Raised when a `connect` command arrives
    cancel_on_connect: Mutex<Option<CancellationToken>>,
    stats: FakeCliStats,
}

/// Scripted vendor CLI; clones share one simulated host
#[derive(Debug, Clone)]
pub struct FakeVpnCli {
    host: Arc<FakeHost>,
}

impl FakeVpnCli {
    pub fn new(mode: FakeCliMode) -> Self {
        let tunnel = matches!(
            mode,
            FakeCliMode::AlreadyConnected | FakeCliMode::StuckConnected
        );
        Self {
            host: Arc::new(FakeHost {
                mode: Mutex::new(mode),
                tunnel: AtomicBool::new(tunnel),
                generation: AtomicUsize::new(0),
                cancel_on_connect: Mutex::new(None),
                stats: FakeCliStats::default(),
            }),
        }
    }

    /// Change behavior from now on
    pub fn set_mode(&self, mode: FakeCliMode) {
        *lock(&self.host.mode) = mode;
    }

    /// Sending `connect` raises `token`, as an operator Ctrl-C mid-open would
    pub fn cancel_on_connect(self, token: CancellationToken) -> Self {
        *lock(&self.host.cancel_on_connect) = Some(token);
        self
    }

    pub fn stats(&self) -> &FakeCliStats {
        &self.host.stats
    }

    /// Is the simulated tunnel up?
    pub fn tunnel_up(&self) -> bool {
        self.host.tunnel.load(Ordering::SeqCst)
    }

    /// Kill every CLI process, leaving the tunnel as it is
    pub fn kill_consoles(&self) {
        self.host.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn mode(&self) -> FakeCliMode {
        *lock(&self.host.mode)
    }
}

#[async_trait]
impl CliLauncher for FakeVpnCli {
    async fn terminate_existing(&self) -> std::io::Result<()> {
        self.host.stats.kills.fetch_add(1, Ordering::SeqCst);
        if self.mode() == FakeCliMode::KillFails {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "access denied",
            ));
        }
        self.kill_consoles();
        Ok(())
    }

    async fn spawn(&self) -> std::io::Result<Box<dyn Console>> {
        let mode = self.mode();
        if mode == FakeCliMode::SpawnFails {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "vpncli not found",
            ));
        }
        self.host.stats.spawns.fetch_add(1, Ordering::SeqCst);
        self.host.stats.live.fetch_add(1, Ordering::SeqCst);

        let mut buffer = OutputBuffer::new();
        if mode != FakeCliMode::Silent {
            buffer.push("Cisco AnyConnect Secure Mobility Client (version 4.10.07061) .\n\n");
            if self.tunnel_up() {
                buffer.push("  >> state: Connected\n");
            } else {
                buffer.push("  >> state: Disconnected\n  >> ready to connect.\n");
            }
            buffer.push("VPN> ");
        }
        Ok(Box::new(FakeConsole {
            cli: self.clone(),
            generation: self.host.generation.load(Ordering::SeqCst),
            exited: false,
            released: false,
            step: Step::Command,
            site: String::new(),
            buffer,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Command,
    Username,
    Password,
    Banner,
}

struct FakeConsole {
    cli: FakeVpnCli,
    generation: usize,
    exited: bool,
    released: bool,
    step: Step,
    site: String,
    buffer: OutputBuffer,
}

impl FakeConsole {
    fn alive(&self) -> bool {
        !self.exited && self.generation == self.cli.host.generation.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.cli.host.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn respond(&mut self, line: &str) {
        let mode = self.cli.mode();
        let stats = &self.cli.host.stats;
        match self.step {
            Step::Command => {
                if let Some(site) = line.strip_prefix("connect ") {
                    stats.connects.fetch_add(1, Ordering::SeqCst);
                    if let Some(token) = lock(&self.cli.host.cancel_on_connect).as_ref() {
                        token.cancel();
                    }
                    self.site = site.trim().to_string();
                    if self.cli.tunnel_up() {
                        self.buffer
                            .push("  >> notice: The VPN client is already connected.\nVPN> ");
                        return;
                    }
                    match mode {
                        FakeCliMode::Unreachable => self.buffer.push(
                            "  >> error: Connection attempt has failed due to unsuccessful domain name resolution.\nVPN> ",
                        ),
                        FakeCliMode::OtherClientRunning => self.buffer.push(
                            "  >> error: Connect not available. Another AnyConnect application is running\nVPN> ",
                        ),
                        FakeCliMode::ConnectHangs => {}
                        _ => {
                            self.buffer.push(&format!(
                                "  >> contacting host ({}) for login information...\n  >> Please enter your username and password.\nUsername: ",
                                self.site
                            ));
                            self.step = Step::Username;
                        }
                    }
                } else if line == "disconnect" {
                    stats.disconnects.fetch_add(1, Ordering::SeqCst);
                    if matches!(
                        mode,
                        FakeCliMode::StuckConnected | FakeCliMode::DisconnectHangs
                    ) {
                        return;
                    }
                    self.cli.host.tunnel.store(false, Ordering::SeqCst);
                    self.buffer
                        .push("  >> state: Disconnecting\n  >> state: Disconnected\nVPN> ");
                } else if line == "exit" {
                    self.exited = true;
                } else {
                    self.buffer.push("VPN> ");
                }
            }
            Step::Username => {
                self.buffer.push("Password: ");
                self.step = Step::Password;
            }
            Step::Password => {
                if mode == FakeCliMode::LoginRejected {
                    self.buffer.push("\n  >> Login failed.\nUsername: ");
                    self.step = Step::Username;
                } else {
                    self.buffer.push(
                        "\n  >> Please respond to banner.\n\nAuthorized use only.\n\naccept? [y/n]: ",
                    );
                    self.step = Step::Banner;
                }
            }
            Step::Banner => {
                self.step = Step::Command;
                if line != "y" {
                    self.buffer.push("  >> Connect aborted.\nVPN> ");
                } else if mode == FakeCliMode::BannerHangs {
                    self.cli.host.tunnel.store(true, Ordering::SeqCst);
                } else if mode == FakeCliMode::DriverError {
                    self.buffer.push(
                        "  >> error: The VPN client driver encountered an error. Please restart your system or device, then try again.\nVPN> ",
                    );
                } else {
                    self.cli.host.tunnel.store(true, Ordering::SeqCst);
                    self.buffer.push(&format!(
                        "  >> state: Connecting\n  >> state: Connected\n  >> Connected to {}.\nVPN> ",
                        self.site
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl Console for FakeConsole {
    async fn send_line(&mut self, line: &str) -> Result<(), ExpectError> {
        if !self.alive() {
            return Err(ExpectError::Eof);
        }
        self.respond(line);
        Ok(())
    }

    async fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<usize, ExpectError> {
        if let Some(index) = self.buffer.take_match(patterns) {
            return Ok(index);
        }
        if !self.alive() {
            self.buffer.abandon();
            return Err(ExpectError::Eof);
        }
        tokio::time::sleep(timeout).await;
        self.buffer.abandon();
        Err(ExpectError::Timeout(timeout))
    }

    fn before(&self) -> &str {
        self.buffer.before()
    }

    fn is_alive(&mut self) -> bool {
        self.alive()
    }

    async fn terminate(&mut self) {
        self.exited = true;
        self.release();
    }
}

impl Drop for FakeConsole {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// SINKS
// =============================================================================

#[derive(Debug, Default)]
struct SinkLog {
    records: Vec<CycleRecord>,
    waits: Vec<(u64, Duration)>,
    finished: Option<RunSummary>,
    closed: bool,
}

/// Report sink keeping everything in memory; clones share one log
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    cancel_after: Option<(usize, CancellationToken)>,
    fail_with: Option<ErrorKind>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise `signal` once `count` records have been reported
    pub fn cancel_after(mut self, count: usize, signal: CancellationToken) -> Self {
        self.cancel_after = Some((count, signal));
        self
    }

    /// Every report() fails with `kind`
    pub fn failing(mut self, kind: ErrorKind) -> Self {
        self.fail_with = Some(kind);
        self
    }

    pub fn records(&self) -> Vec<CycleRecord> {
        lock(&self.log).records.clone()
    }

    /// `(next cycle, delay)` for every announced wait
    pub fn waits(&self) -> Vec<(u64, Duration)> {
        lock(&self.log).waits.clone()
    }

    pub fn finished(&self) -> Option<RunSummary> {
        lock(&self.log).finished
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.log).closed
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn report(&mut self, record: &CycleRecord) -> Result<(), FatalError> {
        if let Some(kind) = self.fail_with {
            return Err(FatalError::new(kind, "recording sink told to fail"));
        }
        let count = {
            let mut log = lock(&self.log);
            log.records.push(record.clone());
            log.records.len()
        };
        if let Some((after, signal)) = &self.cancel_after {
            if count >= *after {
                signal.cancel();
            }
        }
        Ok(())
    }

    fn waiting(&mut self, next_cycle: u64, delay: Duration) {
        lock(&self.log).waits.push((next_cycle, delay));
    }

    fn finished(&mut self, summary: &RunSummary) {
        lock(&self.log).finished = Some(*summary);
    }

    async fn close(&mut self) {
        lock(&self.log).closed = true;
    }
}

/// Alert sink counting alerts per severity; clones share counters
#[derive(Debug, Clone, Default)]
pub struct CountingAlerts {
    major: Arc<AtomicUsize>,
    minor: Arc<AtomicUsize>,
}

impl CountingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn major(&self) -> usize {
        self.major.load(Ordering::SeqCst)
    }

    pub fn minor(&self) -> usize {
        self.minor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSink for CountingAlerts {
    async fn alert(&self, severity: Severity) {
        match severity {
            Severity::Major => self.major.fetch_add(1, Ordering::SeqCst),
            Severity::Minor => self.minor.fetch_add(1, Ordering::SeqCst),
        };
    }
}
