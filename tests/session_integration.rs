//! Integration tests for the session automaton
//!
//! Drives open()/close() against the scripted vendor CLI and, on Unix, against
//! a real child process emulating the vendor prompts.

use std::time::Duration;

use pretty_assertions::assert_eq;
use vpnmon::core::mock::{FakeCliMode, FakeVpnCli};
use vpnmon::core::{Credentials, SessionAutomaton, SessionTimeouts};
use vpnmon::types::{ErrorKind, SessionState};

fn credentials(address: &str) -> Credentials {
    Credentials {
        vpn_address: address.to_string(),
        username: "alice".to_string(),
        password: "hunter2".to_string(),
    }
}

fn fast() -> SessionTimeouts {
    SessionTimeouts {
        prompt: Duration::from_millis(50),
        close: Duration::from_millis(50),
        command_delay: Duration::ZERO,
    }
}

fn automaton(cli: &FakeVpnCli) -> SessionAutomaton {
    SessionAutomaton::with_timeouts(Box::new(cli.clone()), credentials("vpn.example.org"), fast())
}

/// open() ends in Open or Failed, never Opening, for every client behavior
#[tokio::test]
async fn test_open_always_settles() {
    for mode in [
        FakeCliMode::Healthy,
        FakeCliMode::KillFails,
        FakeCliMode::SpawnFails,
        FakeCliMode::Silent,
        FakeCliMode::AlreadyConnected,
        FakeCliMode::StuckConnected,
        FakeCliMode::Unreachable,
        FakeCliMode::OtherClientRunning,
        FakeCliMode::LoginRejected,
        FakeCliMode::ConnectHangs,
        FakeCliMode::DriverError,
        FakeCliMode::BannerHangs,
        FakeCliMode::DisconnectHangs,
    ] {
        let cli = FakeVpnCli::new(mode);
        let mut session = automaton(&cli);
        let result = session.open().await;
        assert!(session.state().is_settled(), "mode {:?}", mode);
        match result {
            Ok(()) => assert_eq!(session.state(), SessionState::Open, "mode {:?}", mode),
            Err(_) => assert_eq!(session.state(), SessionState::Failed, "mode {:?}", mode),
        }

        // close() from either terminal state always reaches Closed
        let _ = session.close().await;
        assert_eq!(session.state(), SessionState::Closed, "mode {:?}", mode);
        assert_eq!(cli.stats().live_consoles(), 0, "mode {:?}", mode);
    }
}

#[tokio::test]
async fn test_other_client_running_is_per_cycle() {
    let cli = FakeVpnCli::new(FakeCliMode::OtherClientRunning);
    let mut session = automaton(&cli);
    let err = session.open().await.unwrap_err();
    assert_eq!(err, ErrorKind::AnotherClientRunning);
    assert!(!err.is_fatal());
    assert!(session.diagnostic().contains("error:"));
}

#[tokio::test]
async fn test_recovers_after_client_behavior_changes() {
    let cli = FakeVpnCli::new(FakeCliMode::LoginRejected);
    let mut session = automaton(&cli);
    assert_eq!(session.open().await, Err(ErrorKind::LoginRejected));

    cli.set_mode(FakeCliMode::Healthy);
    // open() closes a Failed automaton itself before trying again
    assert_eq!(session.open().await, Ok(()));
    assert_eq!(session.close().await, Ok(()));
    assert_eq!(cli.stats().live_consoles(), 0);
}

/// Thousands of sequential open/close cycles leave nothing behind
#[tokio::test]
async fn test_many_cycles_do_not_leak() {
    let cli = FakeVpnCli::new(FakeCliMode::Healthy);
    let mut session = automaton(&cli);

    for cycle in 0..5000 {
        assert_eq!(session.open().await, Ok(()), "open in cycle {}", cycle);
        assert_eq!(session.close().await, Ok(()), "close in cycle {}", cycle);
        assert_eq!(cli.stats().live_consoles(), 0, "cycle {}", cycle);
    }

    assert_eq!(cli.stats().spawns(), 5000);
    assert_eq!(cli.stats().connects(), 5000);
    assert_eq!(cli.stats().disconnects(), 5000);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!cli.tunnel_up());
}

#[cfg(unix)]
mod process {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};
    use vpnmon::core::VpnCliLauncher;

    /// Shell stand-in for the vendor CLI, prompts printed without newlines.
    ///
    /// `$1` is a marker file standing for the tunnel, which outlives any one
    /// CLI process. `slow.example` confirms the banner too late and
    /// `stuck.example` never answers a disconnect.
    const FAKE_VPNCLI: &str = r#"
tunnel=$1
printf 'Cisco AnyConnect Secure Mobility Client (version 4.10.07061) .\n\n'
if [ -f "$tunnel" ]; then
  printf '  >> state: Connected\nVPN> '
else
  printf '  >> state: Disconnected\n  >> ready to connect.\nVPN> '
fi
state=cmd
site=
while IFS= read -r line; do
  case "$state:$line" in
    "cmd:connect "*)
      site=${line#connect }
      if [ -f "$tunnel" ]; then
        printf '  >> notice: The VPN client is already connected.\nVPN> '
      elif [ "$site" = "nowhere.invalid" ]; then
        printf '  >> error: Connection attempt has failed due to unsuccessful domain name resolution.\nVPN> '
      else
        printf '  >> contacting host (%s) for login information...\nUsername: ' "$site"
        state=user
      fi
      ;;
    "cmd:disconnect")
      if [ "$site" = "stuck.example" ]; then
        sleep 5
      fi
      rm -f "$tunnel"
      printf '  >> state: Disconnecting\n  >> state: Disconnected\nVPN> '
      ;;
    "cmd:exit")
      exit 0
      ;;
    user:*)
      printf 'Password: '
      state=pass
      ;;
    pass:hunter2)
      printf '\n  >> Please respond to banner.\n\nAuthorized use only.\n\naccept? [y/n]: '
      state=banner
      ;;
    pass:*)
      printf '\n  >> Login failed.\nUsername: '
      state=user
      ;;
    banner:y)
      : > "$tunnel"
      if [ "$site" = "slow.example" ]; then
        sleep 3
      fi
      printf '  >> state: Connecting\n  >> state: Connected\n  >> Connected to %s.\nVPN> ' "$site"
      state=cmd
      ;;
    *)
      printf 'VPN> '
      state=cmd
      ;;
  esac
done
"#;

    struct Host {
        script: PathBuf,
        tunnel: PathBuf,
    }

    impl Host {
        fn new(name: &str) -> Self {
            let base = std::env::temp_dir().join(format!("vpnmon-{}-{}", name, std::process::id()));
            let script = base.with_extension("sh");
            let tunnel = base.with_extension("tunnel");
            std::fs::write(&script, FAKE_VPNCLI).unwrap();
            let _ = std::fs::remove_file(&tunnel);
            Self { script, tunnel }
        }

        fn tunnel_up(&self) -> bool {
            self.tunnel.exists()
        }

        fn automaton(&self, address: &str, timeouts: SessionTimeouts) -> SessionAutomaton {
            let launcher = VpnCliLauncher::new("sh")
                .with_args(vec![display(&self.script), display(&self.tunnel)])
                .with_client_processes(Vec::new());
            SessionAutomaton::with_timeouts(Box::new(launcher), credentials(address), timeouts)
        }
    }

    impl Drop for Host {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.script);
            let _ = std::fs::remove_file(&self.tunnel);
        }
    }

    fn display(path: &Path) -> String {
        path.display().to_string()
    }

    fn patient() -> SessionTimeouts {
        SessionTimeouts {
            prompt: Duration::from_secs(5),
            close: Duration::from_secs(5),
            command_delay: Duration::from_millis(10),
        }
    }

    fn hasty() -> SessionTimeouts {
        SessionTimeouts {
            prompt: Duration::from_millis(800),
            close: Duration::from_millis(800),
            command_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_real_process_open_close() {
        let host = Host::new("open-close");
        let mut session = host.automaton("vpn.example.org", patient());

        assert_eq!(session.open().await, Ok(()));
        assert_eq!(session.state(), SessionState::Open);
        assert!(host.tunnel_up());
        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!host.tunnel_up());
    }

    #[tokio::test]
    async fn test_real_process_unresolved_site() {
        let host = Host::new("unresolved");
        let mut session = host.automaton("nowhere.invalid", patient());

        assert_eq!(session.open().await, Err(ErrorKind::SiteUnreachable));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.diagnostic().contains("Connection attempt has failed"));
        assert_eq!(session.close().await, Ok(()));
    }

    /// A banner confirmed too late leaves the tunnel up; close() must end it
    #[tokio::test]
    async fn test_real_process_close_after_banner_timeout() {
        let host = Host::new("slow-banner");
        let mut session = host.automaton("slow.example", hasty());

        assert_eq!(session.open().await, Err(ErrorKind::BannerTimeout));
        assert!(host.tunnel_up());

        assert_eq!(session.close().await, Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!host.tunnel_up());
    }

    /// The prompt after the already-connected notice does not confirm a disconnect
    #[tokio::test]
    async fn test_real_process_stuck_connection_is_fatal() {
        let host = Host::new("stuck");
        std::fs::write(&host.tunnel, "").unwrap();
        let mut session = host.automaton("stuck.example", hasty());

        let err = session.open().await.unwrap_err();
        assert_eq!(err, ErrorKind::DisconnectFailed);
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.close().await, Ok(()));
    }

    #[tokio::test]
    async fn test_real_process_already_connected_recovers() {
        let host = Host::new("left-connected");
        std::fs::write(&host.tunnel, "").unwrap();
        let mut session = host.automaton("vpn.example.org", patient());

        assert_eq!(session.open().await, Ok(()));
        assert!(host.tunnel_up());
        assert_eq!(session.close().await, Ok(()));
        assert!(!host.tunnel_up());
    }

    #[tokio::test]
    async fn test_real_process_missing_binary() {
        let launcher = VpnCliLauncher::new("/nonexistent/vpnmon-test/vpncli")
            .with_client_processes(Vec::new());
        let mut session =
            SessionAutomaton::with_timeouts(Box::new(launcher), credentials("vpn.example.org"), fast());
        assert_eq!(session.open().await, Err(ErrorKind::SpawnFailed));
        assert_eq!(session.close().await, Ok(()));
    }
}
