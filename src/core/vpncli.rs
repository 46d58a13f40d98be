//! Vendor VPN client integration
//!
//! The vendor allows a single client application per host, so every open()
//! starts by force-terminating any running UI or CLI instance.

use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::core::console::{Console, ProcessConsole};

/// Starts vendor CLI processes
#[async_trait]
pub trait CliLauncher: Send + Sync {
    /// Force-terminate every running vendor UI/CLI instance.
    /// Finding nothing to terminate is success.
    async fn terminate_existing(&self) -> std::io::Result<()>;

    /// Start one interactive vendor CLI
    async fn spawn(&self) -> std::io::Result<Box<dyn Console>>;
}

#[cfg(windows)]
const DEFAULT_CLI: &str =
    r"C:\Program Files (x86)\Cisco\Cisco AnyConnect Secure Mobility Client\vpncli.exe";
#[cfg(not(windows))]
const DEFAULT_CLI: &str = "/opt/cisco/anyconnect/bin/vpn";

#[cfg(windows)]
const CLIENT_PROCESSES: &[&str] = &["vpnui.exe", "vpncli.exe"];
#[cfg(not(windows))]
const CLIENT_PROCESSES: &[&str] = &["vpnui", "vpn"];

/// Launcher for the installed vendor CLI
#[derive(Debug, Clone)]
pub struct VpnCliLauncher {
    program: PathBuf,
    args: Vec<String>,
    /// Process image names killed by `terminate_existing`
    client_processes: Vec<String>,
}

impl Default for VpnCliLauncher {
    fn default() -> Self {
        Self::new(default_cli_path())
    }
}

impl VpnCliLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            client_processes: CLIENT_PROCESSES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Extra arguments passed to the CLI
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Replace the list of process names terminated before each open()
    pub fn with_client_processes(mut self, names: Vec<String>) -> Self {
        self.client_processes = names;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

/// Platform install location of the vendor CLI
pub fn default_cli_path() -> PathBuf {
    PathBuf::from(DEFAULT_CLI)
}

fn kill_command(image: &str) -> Command {
    #[cfg(windows)]
    {
        let mut command = Command::new("taskkill");
        command.args(["/f", "/im", image]);
        command
    }
    #[cfg(not(windows))]
    {
        let mut command = Command::new("pkill");
        command.args(["-x", image]);
        command
    }
}

#[async_trait]
impl CliLauncher for VpnCliLauncher {
    async fn terminate_existing(&self) -> std::io::Result<()> {
        for image in &self.client_processes {
            // Exit status only says whether something matched
            let output = kill_command(image).output().await?;
            debug!("terminate {}: {}", image, output.status);
        }
        Ok(())
    }

    async fn spawn(&self) -> std::io::Result<Box<dyn Console>> {
        let console = ProcessConsole::spawn(&self.program, &self.args)?;
        Ok(Box::new(console))
    }
}
