//! Session automaton: opens and closes the tunnel through the vendor CLI
//!
//! State transitions:
//! - CLOSED → OPENING → OPEN: open() saw every expected prompt in time
//! - OPENING → FAILED: timeout, unexpected reply or spawn failure
//! - OPEN → CLOSING → CLOSED: close(), confirmed or not
//! - FAILED → CLOSING → CLOSED: close() disconnects through a fresh CLI,
//!   errors ignored
//!
//! Every wait is bounded. A bound exceeded is a definite failure with an
//! `ErrorKind`; callers never see a pending or unknown outcome.

use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;

use crate::core::console::{Console, ExpectError};
use crate::core::vpncli::CliLauncher;
use crate::types::{ErrorKind, RunConfig, SessionState};
use crate::{CLI_COMMAND_DELAY_MS, CLOSE_TIMEOUT_SECS, PROMPT_TIMEOUT_SECS};

lazy_static! {
    /// Ready prompt
    static ref RE_PROMPT: Regex = Regex::new(r"VPN>").unwrap();

    // Replies to `connect`
    static ref RE_USERNAME: Regex = Regex::new(r"Username:").unwrap();
    static ref RE_ALREADY_CONNECTED: Regex = Regex::new(r"(?i)already connected").unwrap();
    static ref RE_UNRESOLVED: Regex = Regex::new(r"unsuccessful domain name").unwrap();
    static ref RE_NOT_AVAILABLE: Regex = Regex::new(r"Connect not available").unwrap();
    static ref RE_UNVERIFIED: Regex = Regex::new(r"cannot verify server").unwrap();

    // Replies to the credentials
    static ref RE_PASSWORD: Regex = Regex::new(r"Password:").unwrap();
    static ref RE_ACCEPT: Regex = Regex::new(r"accept\?").unwrap();
    static ref RE_LOGIN_FAILED: Regex = Regex::new(r"Login failed").unwrap();

    // Replies to the banner acceptance
    static ref RE_CONNECTED: Regex = Regex::new(r"state: Connected").unwrap();
    static ref RE_DISCONNECTED: Regex = Regex::new(r"state: Disconnected").unwrap();
    static ref RE_TRY_AGAIN: Regex = Regex::new(r"Please try connecting again").unwrap();
    static ref RE_DRIVER_ERROR: Regex = Regex::new(r"driver encountered an error").unwrap();
}

/// Wait bounds for the vendor CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Any single prompt during open()
    pub prompt: Duration,
    /// Disconnect confirmation during close()
    pub close: Duration,
    /// Pause before each command
    pub command_delay: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            prompt: Duration::from_secs(PROMPT_TIMEOUT_SECS),
            close: Duration::from_secs(CLOSE_TIMEOUT_SECS),
            command_delay: Duration::from_millis(CLI_COMMAND_DELAY_MS),
        }
    }
}

/// What open() sends to the client
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub vpn_address: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            vpn_address: config.vpn_address.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("vpn_address", &self.vpn_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Owner of the one vendor CLI process
pub struct SessionAutomaton {
    launcher: Box<dyn CliLauncher>,
    credentials: Credentials,
    timeouts: SessionTimeouts,
    console: Option<Box<dyn Console>>,
    state: SessionState,
    /// Client output preceding the last failure
    diagnostic: String,
}

impl SessionAutomaton {
    pub fn new(launcher: Box<dyn CliLauncher>, credentials: Credentials) -> Self {
        Self::with_timeouts(launcher, credentials, SessionTimeouts::default())
    }

    pub fn with_timeouts(
        launcher: Box<dyn CliLauncher>,
        credentials: Credentials,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            launcher,
            credentials,
            timeouts,
            console: None,
            state: SessionState::Closed,
            diagnostic: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Client output captured when the last operation failed
    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    /// Open the tunnel.
    ///
    /// Ends in `Open` on success or `Failed` on any error. If the automaton is
    /// not `Closed` it is closed first.
    pub async fn open(&mut self) -> Result<(), ErrorKind> {
        if self.state != SessionState::Closed {
            warn!("open() called in state {}; closing first", self.state);
            let _ = self.close().await;
        }

        self.state = SessionState::Opening;
        self.diagnostic.clear();
        match self.open_sequence().await {
            Ok(()) => {
                info!("tunnel open to {}", self.credentials.vpn_address);
                self.state = SessionState::Open;
                Ok(())
            }
            Err(kind) => {
                warn!("open() failed: {}", kind);
                if !self.diagnostic.trim().is_empty() {
                    warn!(
                        "---- client output ----\n{}\n---- end client output ----",
                        self.diagnostic.trim_end()
                    );
                }
                self.release().await;
                self.state = SessionState::Failed;
                Err(kind)
            }
        }
    }

    /// Close the tunnel.
    ///
    /// Always ends in `Closed` with the process handle released. Returns
    /// `CloseUnconfirmed` when the disconnect could not be confirmed in time.
    /// From `Failed` the disconnect is attempted but never reported as an
    /// error. A no-op on an already closed automaton.
    pub async fn close(&mut self) -> Result<(), ErrorKind> {
        let was = self.state;
        if was == SessionState::Closed && self.console.is_none() {
            return Ok(());
        }

        self.state = SessionState::Closing;
        let result = if was == SessionState::Failed {
            // A late open() failure can leave the tunnel up in the client's agent
            self.release().await;
            if let Err(kind) = self.disconnect_sequence().await {
                debug!("disconnect after failed open: {}", kind);
            }
            Ok(())
        } else {
            self.disconnect_sequence().await
        };
        self.release().await;
        self.state = SessionState::Closed;

        match result {
            Ok(()) => {
                info!("tunnel closed");
                Ok(())
            }
            Err(kind) => {
                warn!("close() not confirmed: {}", kind);
                Err(kind)
            }
        }
    }

    async fn open_sequence(&mut self) -> Result<(), ErrorKind> {
        if let Err(e) = self.launcher.terminate_existing().await {
            self.diagnostic = e.to_string();
            return Err(ErrorKind::TerminateExistingSessionFailed);
        }

        match self.launcher.spawn().await {
            Ok(console) => self.console = Some(console),
            Err(e) => {
                self.diagnostic = e.to_string();
                return Err(ErrorKind::SpawnFailed);
            }
        }

        self.expect(&[&*RE_PROMPT], self.timeouts.prompt)
            .await
            .map_err(|_| ErrorKind::CliUnusable)?;

        self.connect().await?;
        self.login().await?;
        self.accept_banner().await
    }

    /// Send `connect` and wait for the username prompt, recovering once from
    /// a session that was left connected
    async fn connect(&mut self) -> Result<(), ErrorKind> {
        let command = format!("connect {}", self.credentials.vpn_address);
        let mut recovered = false;
        loop {
            self.command(&command).await?;
            let reply = self
                .expect(
                    &[
                        &*RE_USERNAME,
                        &*RE_ALREADY_CONNECTED,
                        &*RE_UNRESOLVED,
                        &*RE_NOT_AVAILABLE,
                        &*RE_UNVERIFIED,
                    ],
                    self.timeouts.prompt,
                )
                .await;
            match reply {
                Ok(0) => return Ok(()),
                Ok(1) if !recovered => {
                    info!("client reports an existing connection; disconnecting first");
                    recovered = true;
                    // The notice is followed by a prompt that must not confirm the disconnect
                    self.expect(&[&*RE_PROMPT], self.timeouts.prompt)
                        .await
                        .map_err(|e| classify(e, ErrorKind::ConnectTimeout))?;
                    self.disconnect(self.timeouts.close)
                        .await
                        .map_err(|_| ErrorKind::DisconnectFailed)?;
                }
                Ok(1) => return Err(self.refused(ErrorKind::DisconnectFailed)),
                Ok(2) => return Err(self.refused(ErrorKind::SiteUnreachable)),
                Ok(3) => return Err(self.refused(ErrorKind::AnotherClientRunning)),
                Ok(_) => return Err(self.refused(ErrorKind::ServerUnverified)),
                Err(ExpectError::Timeout(_)) => return Err(ErrorKind::ConnectTimeout),
                Err(_) => return Err(ErrorKind::UnexpectedResponse),
            }
        }
    }

    async fn login(&mut self) -> Result<(), ErrorKind> {
        let username = self.credentials.username.clone();
        self.command(&username).await?;
        self.expect(&[&*RE_PASSWORD], self.timeouts.prompt)
            .await
            .map_err(|e| classify(e, ErrorKind::CredentialsTimeout))?;

        let password = self.credentials.password.clone();
        self.command(&password).await?;
        match self
            .expect(&[&*RE_ACCEPT, &*RE_LOGIN_FAILED], self.timeouts.prompt)
            .await
        {
            Ok(0) => Ok(()),
            Ok(_) => Err(self.refused(ErrorKind::LoginRejected)),
            Err(e) => Err(classify(e, ErrorKind::CredentialsTimeout)),
        }
    }

    async fn accept_banner(&mut self) -> Result<(), ErrorKind> {
        self.command("y").await?;
        match self
            .expect(
                &[&*RE_CONNECTED, &*RE_TRY_AGAIN, &*RE_DRIVER_ERROR],
                self.timeouts.prompt,
            )
            .await
        {
            Ok(0) => {}
            Ok(1) => return Err(self.refused(ErrorKind::ConnectRetryRequested)),
            Ok(_) => return Err(self.refused(ErrorKind::DriverError)),
            Err(e) => return Err(classify(e, ErrorKind::BannerTimeout)),
        }

        let site = Regex::new(&format!(
            "Connected to {}",
            regex::escape(&self.credentials.vpn_address)
        ))
        .map_err(|_| ErrorKind::UnexpectedResponse)?;
        self.expect(&[&site], self.timeouts.prompt)
            .await
            .map_err(|_| ErrorKind::UnexpectedResponse)?;
        self.expect(&[&*RE_PROMPT], self.timeouts.prompt)
            .await
            .map_err(|_| ErrorKind::UnexpectedResponse)?;
        Ok(())
    }

    async fn disconnect_sequence(&mut self) -> Result<(), ErrorKind> {
        let alive = match self.console.as_mut() {
            Some(console) => console.is_alive(),
            None => false,
        };
        if !alive {
            // The tunnel outlives the CLI process; a fresh CLI can still end it
            debug!("client process gone; starting a new one to disconnect");
            self.release().await;
            let console = self
                .launcher
                .spawn()
                .await
                .map_err(|_| ErrorKind::CloseUnconfirmed)?;
            self.console = Some(console);
            self.expect(&[&*RE_PROMPT], self.timeouts.close)
                .await
                .map_err(|_| ErrorKind::CloseUnconfirmed)?;
        }

        self.disconnect(self.timeouts.close)
            .await
            .map_err(|_| ErrorKind::CloseUnconfirmed)?;

        // Exit failures are irrelevant once disconnected; release() kills the process
        let _ = self.command("exit").await;
        Ok(())
    }

    /// Send `disconnect` and wait for the client to report the tunnel down,
    /// then for its prompt, both within `bound`
    async fn disconnect(&mut self, bound: Duration) -> Result<(), ErrorKind> {
        self.command("disconnect").await?;
        let deadline = tokio::time::Instant::now() + bound;
        self.expect(&[&*RE_DISCONNECTED], bound)
            .await
            .map_err(|e| classify(e, ErrorKind::CloseUnconfirmed))?;
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.expect(&[&*RE_PROMPT], left)
            .await
            .map_err(|e| classify(e, ErrorKind::CloseUnconfirmed))?;
        Ok(())
    }

    /// Pause, then send one command line
    async fn command(&mut self, line: &str) -> Result<(), ErrorKind> {
        tokio::time::sleep(self.timeouts.command_delay).await;
        let console = self.console.as_mut().ok_or(ErrorKind::UnexpectedResponse)?;
        console
            .send_line(line)
            .await
            .map_err(|_| ErrorKind::UnexpectedResponse)
    }

    async fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<usize, ExpectError> {
        let console = self.console.as_mut().ok_or(ExpectError::Eof)?;
        let result = console.expect(patterns, timeout).await;
        if result.is_err() {
            self.diagnostic = console.before().to_string();
        }
        result
    }

    /// The client answered with a failure reply; keep what led up to it
    fn refused(&mut self, kind: ErrorKind) -> ErrorKind {
        if let Some(console) = self.console.as_ref() {
            self.diagnostic = console.before().to_string();
        }
        kind
    }

    /// Drop the process handle and any stray CLI instance
    async fn release(&mut self) {
        if let Some(mut console) = self.console.take() {
            console.terminate().await;
        }
        if let Err(e) = self.launcher.terminate_existing().await {
            debug!("stray client cleanup failed: {}", e);
        }
    }
}

/// Timeouts map to the step's own kind; anything else is unexpected
fn classify(error: ExpectError, on_timeout: ErrorKind) -> ErrorKind {
    match error {
        ExpectError::Timeout(_) => on_timeout,
        ExpectError::Eof | ExpectError::Io(_) => ErrorKind::UnexpectedResponse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::{FakeCliMode, FakeVpnCli};

    fn fast() -> SessionTimeouts {
        SessionTimeouts {
            prompt: Duration::from_millis(50),
            close: Duration::from_millis(50),
            command_delay: Duration::ZERO,
        }
    }

    fn automaton(cli: &FakeVpnCli) -> SessionAutomaton {
        let credentials = Credentials {
            vpn_address: "vpn.example.org".to_string(),
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        SessionAutomaton::with_timeouts(Box::new(cli.clone()), credentials, fast())
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let cli = FakeVpnCli::new(FakeCliMode::Healthy);
        assert_eq!(automaton(&cli).state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_open_then_close() {
        let cli = FakeVpnCli::new(FakeCliMode::Healthy);
        let mut session = automaton(&cli);

        assert_eq!(session.open().await, Ok(()));
        assert_eq!(session.state(), SessionState::Open);
        assert!(cli.tunnel_up());

        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!cli.tunnel_up());
        assert_eq!(cli.stats().live_consoles(), 0);
    }

    #[tokio::test]
    async fn test_close_when_closed_is_noop() {
        let cli = FakeVpnCli::new(FakeCliMode::Healthy);
        let mut session = automaton(&cli);
        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(cli.stats().spawns(), 0);
    }

    #[tokio::test]
    async fn test_terminate_failure_is_fatal() {
        let cli = FakeVpnCli::new(FakeCliMode::KillFails);
        let mut session = automaton(&cli);
        let err = session.open().await.unwrap_err();
        assert_eq!(err, ErrorKind::TerminateExistingSessionFailed);
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let cli = FakeVpnCli::new(FakeCliMode::SpawnFails);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Err(ErrorKind::SpawnFailed));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_silent_cli_is_unusable() {
        let cli = FakeVpnCli::new(FakeCliMode::Silent);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Err(ErrorKind::CliUnusable));
        assert_eq!(cli.stats().live_consoles(), 0);
    }

    #[tokio::test]
    async fn test_already_connected_recovers() {
        let cli = FakeVpnCli::new(FakeCliMode::AlreadyConnected);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Ok(()));
        assert_eq!(cli.stats().connects(), 2);
        assert_eq!(cli.stats().disconnects(), 1);
    }

    #[tokio::test]
    async fn test_stuck_connection_is_fatal() {
        let cli = FakeVpnCli::new(FakeCliMode::StuckConnected);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Err(ErrorKind::DisconnectFailed));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(cli.stats().connects(), 1);
        assert_eq!(cli.stats().disconnects(), 1);
    }

    #[tokio::test]
    async fn test_per_cycle_open_failures() {
        for (mode, expected) in [
            (FakeCliMode::Unreachable, ErrorKind::SiteUnreachable),
            (FakeCliMode::LoginRejected, ErrorKind::LoginRejected),
            (FakeCliMode::ConnectHangs, ErrorKind::ConnectTimeout),
            (FakeCliMode::DriverError, ErrorKind::DriverError),
        ] {
            let cli = FakeVpnCli::new(mode);
            let mut session = automaton(&cli);
            assert_eq!(session.open().await, Err(expected), "mode {:?}", mode);
            assert!(!expected.is_fatal());
            assert_eq!(session.state(), SessionState::Failed);
        }
    }

    #[tokio::test]
    async fn test_failed_close_reaches_closed() {
        let cli = FakeVpnCli::new(FakeCliMode::LoginRejected);
        let mut session = automaton(&cli);
        assert!(session.open().await.is_err());
        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_after_late_open_failure_disconnects() {
        let cli = FakeVpnCli::new(FakeCliMode::BannerHangs);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Err(ErrorKind::BannerTimeout));
        assert!(cli.tunnel_up());

        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!cli.tunnel_up());
        assert_eq!(cli.stats().disconnects(), 1);
        assert_eq!(cli.stats().live_consoles(), 0);
    }

    #[tokio::test]
    async fn test_close_after_failed_open_ignores_disconnect_errors() {
        let cli = FakeVpnCli::new(FakeCliMode::SpawnFails);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Err(ErrorKind::SpawnFailed));
        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_unconfirmed_close_still_releases() {
        let cli = FakeVpnCli::new(FakeCliMode::DisconnectHangs);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Ok(()));
        assert_eq!(session.close().await, Err(ErrorKind::CloseUnconfirmed));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(cli.stats().live_consoles(), 0);
    }

    #[tokio::test]
    async fn test_close_respawns_when_cli_died() {
        let cli = FakeVpnCli::new(FakeCliMode::Healthy);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Ok(()));
        cli.kill_consoles();

        assert_eq!(session.close().await, Ok(()));
        assert!(!cli.tunnel_up());
        assert_eq!(cli.stats().spawns(), 2);
    }

    #[tokio::test]
    async fn test_reopen_from_open_closes_first() {
        let cli = FakeVpnCli::new(FakeCliMode::Healthy);
        let mut session = automaton(&cli);
        assert_eq!(session.open().await, Ok(()));
        assert_eq!(session.open().await, Ok(()));
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(cli.stats().live_consoles(), 1);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            vpn_address: "vpn".to_string(),
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }
}
