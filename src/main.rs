//! vpnmon CLI
//!
//! Usage:
//!   vpnmon --vpnurlip vpn.example.org --username alice --password secret
//!   vpnmon --params site_a.csv --cycles -1 --delay 600
//!   vpnmon --json --quiet                       # JSON lines, no bells

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use log::debug;

use vpnmon::core::{
    load_targets, ConsoleReport, Credentials, Datalog, Overrides, PingProber, Reporter,
    RunScheduler, SessionAutomaton, Settings, VpnCliLauncher,
};
use vpnmon::types::{FatalError, RunSummary};
use vpnmon::{DEFAULT_PARAMS_FILE, VERSION};

#[derive(Parser, Debug)]
#[command(
    name = "vpnmon",
    version = VERSION,
    about = "VPN Monitoring Tool - periodically test a VPN site and the hosts behind it",
    long_about = "vpnmon runs test cycles against a VPN site.\n\n\
                  Each cycle pings the VPN site, opens the VPN by driving the\n\
                  vendor client CLI, pings every target through the tunnel and\n\
                  closes the VPN again. Results go to the console and to a CSV\n\
                  datalog.\n\n\
                  Settings come from built-in defaults, then the params file,\n\
                  then these options. Stop at any time with Control-C; the VPN\n\
                  is closed and the datalog released before exit."
)]
struct Args {
    /// VPN site human-readable name
    #[arg(long)]
    vpnname: Option<String>,

    /// VPN site URL or IP address
    #[arg(long)]
    vpnurlip: Option<String>,

    /// VPN account username
    #[arg(long, visible_alias = "user")]
    username: Option<String>,

    /// VPN account password
    #[arg(long, visible_alias = "pass")]
    password: Option<String>,

    /// CSV file of targets to ping through the VPN (address,name)
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Number of test cycles to run (-1 = until stopped)
    #[arg(long, allow_negative_numbers = true)]
    cycles: Option<i64>,

    /// Seconds between test cycles
    #[arg(long)]
    delay: Option<u64>,

    /// CSV file for the datalog
    #[arg(long)]
    datalog: Option<PathBuf>,

    /// Echo attempts per ping test
    #[arg(long)]
    attempts: Option<u32>,

    /// Path of the vendor VPN client CLI
    #[arg(long)]
    vpncli: Option<PathBuf>,

    /// Parameters file (name,value per line)
    #[arg(long, default_value = DEFAULT_PARAMS_FILE)]
    params: PathBuf,

    /// Do not make sounds for test failures
    #[arg(long)]
    quiet: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,

    /// Debug logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            vpn_name: self.vpnname.clone(),
            vpn_address: self.vpnurlip.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            targets_file: self.targets.clone(),
            cycles: self.cycles,
            delay_seconds: self.delay,
            datalog_file: self.datalog.clone(),
            quiet: self.quiet,
            probe_attempts: self.attempts,
            vpncli: self.vpncli.clone(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
    if args.no_color {
        colored::control::set_override(false);
    }

    match run(&args).await {
        Ok(summary) => debug!("run finished: {:?}", summary),
        Err(e) => {
            eprintln!("{}", e.to_string().red().bold());
            if !e.detail.is_empty() {
                eprintln!("{}", e.detail);
            }
            eprintln!("vpnmon fatal error exit.");
            std::process::exit(1);
        }
    }
}

async fn run(args: &Args) -> Result<RunSummary, FatalError> {
    let mut settings = Settings::load(&args.params)?;
    settings.apply_overrides(args.overrides())?;
    debug!("settings: {:?}", settings);

    let targets = load_targets(&settings.targets_file)?;
    let datalog_file = settings.datalog_file.clone();
    let launcher = VpnCliLauncher::new(settings.vpncli.clone());
    let config = settings.into_run_config(targets)?;
    let datalog = Datalog::open(datalog_file)?;

    let console = ConsoleReport::new(config.cycle_count)
        .json(args.json)
        .color(!args.no_color);
    let sink = Reporter::new(console, datalog);
    let automaton = SessionAutomaton::new(Box::new(launcher), Credentials::from_config(&config));

    RunScheduler::new(config, automaton, Arc::new(PingProber::default()), Box::new(sink))
        .run()
        .await
}
