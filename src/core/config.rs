//! Settings resolution
//!
//! Built-in defaults, then the optional parameters file, then command-line
//! overrides. The result is validated into a [`RunConfig`].

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::core::vpncli::default_cli_path;
use crate::types::{ErrorKind, FatalError, RunConfig, Target};
use crate::{
    DEFAULT_CYCLES, DEFAULT_DATALOG_FILE, DEFAULT_DELAY_SECS, DEFAULT_PROBE_ATTEMPTS,
    DEFAULT_TARGETS_FILE, DEFAULT_VPN_NAME,
};

/// Every operational parameter, before validation
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub vpn_name: String,
    pub vpn_address: String,
    pub username: String,
    pub password: String,
    pub targets_file: PathBuf,
    pub cycles: i64,
    pub delay_seconds: u64,
    pub datalog_file: PathBuf,
    pub quiet: bool,
    pub probe_attempts: u32,
    pub vpncli: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vpn_name: DEFAULT_VPN_NAME.to_string(),
            vpn_address: String::new(),
            username: String::new(),
            password: String::new(),
            targets_file: PathBuf::from(DEFAULT_TARGETS_FILE),
            cycles: DEFAULT_CYCLES,
            delay_seconds: DEFAULT_DELAY_SECS,
            datalog_file: PathBuf::from(DEFAULT_DATALOG_FILE),
            quiet: false,
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            vpncli: default_cli_path(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("vpn_name", &self.vpn_name)
            .field("vpn_address", &self.vpn_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("targets_file", &self.targets_file)
            .field("cycles", &self.cycles)
            .field("delay_seconds", &self.delay_seconds)
            .field("datalog_file", &self.datalog_file)
            .field("quiet", &self.quiet)
            .field("probe_attempts", &self.probe_attempts)
            .field("vpncli", &self.vpncli)
            .finish()
    }
}

/// Command-line values; `None` keeps the current setting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub vpn_name: Option<String>,
    pub vpn_address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub targets_file: Option<PathBuf>,
    pub cycles: Option<i64>,
    pub delay_seconds: Option<u64>,
    pub datalog_file: Option<PathBuf>,
    pub quiet: bool,
    pub probe_attempts: Option<u32>,
    pub vpncli: Option<PathBuf>,
}

impl Settings {
    /// Defaults overlaid with the parameters file at `path`, if it exists
    pub fn load(path: &Path) -> Result<Self, FatalError> {
        let mut settings = Self::default();
        match std::fs::read_to_string(path) {
            Ok(text) => settings.apply_params(&text)?,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                info!("running without a vpnmon params file ({})", path.display());
            }
            Err(e) => {
                return Err(FatalError::new(
                    ErrorKind::ParamsUnreadable,
                    format!("{}: {}", path.display(), e),
                ))
            }
        }
        Ok(settings)
    }

    /// Apply `name,value` lines. Unknown names and blank lines are ignored.
    pub fn apply_params(&mut self, text: &str) -> Result<(), FatalError> {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, value) = match line.split_once(',') {
                Some((name, value)) => (name.trim().to_ascii_lowercase(), value.trim()),
                None => {
                    debug!("params line without a value ignored: {}", line);
                    continue;
                }
            };
            match name.as_str() {
                "vpnname" => self.vpn_name = value.to_string(),
                "vpnurlip" => self.vpn_address = value.to_string(),
                "username" => self.username = value.to_string(),
                "password" => self.password = value.to_string(),
                "targets" => self.targets_file = PathBuf::from(value),
                "cycles" => self.cycles = parse_number(&name, value)?,
                "delay" => self.delay_seconds = parse_number(&name, value)?,
                "datalog" => self.datalog_file = PathBuf::from(value),
                "quiet" => self.quiet = parse_flag(&name, value)?,
                "attempts" => self.probe_attempts = parse_attempts(value)?,
                "vpncli" => self.vpncli = PathBuf::from(value),
                other => debug!("unknown parameter ignored: {}", other),
            }
        }
        Ok(())
    }

    /// Overlay command-line values
    pub fn apply_overrides(&mut self, overrides: Overrides) -> Result<(), FatalError> {
        if let Some(v) = overrides.vpn_name {
            self.vpn_name = v;
        }
        if let Some(v) = overrides.vpn_address {
            self.vpn_address = v;
        }
        if let Some(v) = overrides.username {
            self.username = v;
        }
        if let Some(v) = overrides.password {
            self.password = v;
        }
        if let Some(v) = overrides.targets_file {
            self.targets_file = v;
        }
        if let Some(v) = overrides.cycles {
            self.cycles = v;
        }
        if let Some(v) = overrides.delay_seconds {
            self.delay_seconds = v;
        }
        if let Some(v) = overrides.datalog_file {
            self.datalog_file = v;
        }
        if overrides.quiet {
            self.quiet = true;
        }
        if let Some(v) = overrides.probe_attempts {
            if v == 0 {
                return Err(FatalError::new(ErrorKind::InvalidSetting, "attempts must be at least 1"));
            }
            self.probe_attempts = v;
        }
        if let Some(v) = overrides.vpncli {
            self.vpncli = v;
        }
        Ok(())
    }

    /// Validate mandatory fields and attach the target list
    pub fn into_run_config(self, targets: Vec<Target>) -> Result<RunConfig, FatalError> {
        if self.vpn_address.trim().is_empty() {
            return Err(ErrorKind::MissingVpnAddress.into());
        }
        if self.username.is_empty() {
            return Err(ErrorKind::MissingUsername.into());
        }
        if self.password.is_empty() {
            return Err(ErrorKind::MissingPassword.into());
        }
        Ok(RunConfig {
            vpn_name: self.vpn_name,
            vpn_address: self.vpn_address.trim().to_string(),
            username: self.username,
            password: self.password,
            targets,
            cycle_count: self.cycles,
            delay_seconds: self.delay_seconds,
            quiet: self.quiet,
            probe_attempts: self.probe_attempts,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, FatalError> {
    value
        .parse()
        .map_err(|_| FatalError::new(ErrorKind::InvalidSetting, format!("{} = {:?} is not a number", name, value)))
}

fn parse_attempts(value: &str) -> Result<u32, FatalError> {
    match parse_number::<u32>("attempts", value)? {
        0 => Err(FatalError::new(ErrorKind::InvalidSetting, "attempts must be at least 1")),
        n => Ok(n),
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, FatalError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        _ => Err(FatalError::new(
            ErrorKind::InvalidSetting,
            format!("{} = {:?} is not true/false", name, value),
        )),
    }
}

/// Read the targets file. A missing file means no inner targets.
pub fn load_targets(path: &Path) -> Result<Vec<Target>, FatalError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_targets(&text)),
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            info!("running without a vpnmon targets file ({})", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(FatalError::new(
            ErrorKind::TargetsUnreadable,
            format!("{}: {}", path.display(), e),
        )),
    }
}

/// `address,label` per line; only the first two fields count
pub fn parse_targets(text: &str) -> Vec<Target> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.trim().splitn(3, ',');
            let address = fields.next()?.trim();
            if address.is_empty() {
                return None;
            }
            let label = fields.next().map(str::trim).filter(|l| !l.is_empty()).unwrap_or(address);
            Some(Target::new(address, label))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.vpn_name, "VPN Gateway");
        assert_eq!(settings.cycles, 200);
        assert_eq!(settings.delay_seconds, 1800);
        assert_eq!(settings.probe_attempts, 4);
        assert!(!settings.quiet);
    }

    #[test]
    fn test_params_case_insensitive_and_unknown_ignored() {
        let mut settings = Settings::default();
        settings
            .apply_params("VPNURLIP,vpn.example.org\nColor,blue\n\nCycles,-1\nquiet,True\n")
            .unwrap();
        assert_eq!(settings.vpn_address, "vpn.example.org");
        assert_eq!(settings.cycles, -1);
        assert!(settings.quiet);
    }

    #[test]
    fn test_params_only_first_comma_splits() {
        let mut settings = Settings::default();
        settings.apply_params("password,a,b,c\r\n").unwrap();
        assert_eq!(settings.password, "a,b,c");
    }

    #[test]
    fn test_bad_number_is_invalid_setting() {
        let mut settings = Settings::default();
        let err = settings.apply_params("delay,soon").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSetting);

        let err = settings.apply_params("attempts,0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSetting);
    }

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets("10.0.0.5,files\n\n10.0.0.6\nhttps://intranet/,Intranet,extra\n");
        assert_eq!(
            targets,
            vec![
                Target::new("10.0.0.5", "files"),
                Target::new("10.0.0.6", "10.0.0.6"),
                Target::new("https://intranet/", "Intranet"),
            ]
        );
    }

    #[test]
    fn test_missing_mandatory_fields() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.clone().into_run_config(vec![]).unwrap_err().kind,
            ErrorKind::MissingVpnAddress
        );
        settings.vpn_address = "vpn.example.org".to_string();
        assert_eq!(
            settings.clone().into_run_config(vec![]).unwrap_err().kind,
            ErrorKind::MissingUsername
        );
        settings.username = "alice".to_string();
        assert_eq!(
            settings.clone().into_run_config(vec![]).unwrap_err().kind,
            ErrorKind::MissingPassword
        );
        settings.password = "hunter2".to_string();
        let config = settings.into_run_config(vec![]).unwrap();
        assert_eq!(config.cycle_count, 200);
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut settings = Settings::default();
        settings.password = "hunter2".to_string();
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }
}
