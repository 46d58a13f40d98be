//! Error taxonomy
//!
//! Every failure vpnmon can observe maps to exactly one `ErrorKind`.
//! Fatal kinds end the run; the rest are recorded in the cycle and reported.
//! Messages and details never carry the VPN password.

use serde::{Deserialize, Serialize};

/// Classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    // =========================================================================
    // E1xx: Configuration and local resources (fatal)
    // =========================================================================
    /// Parameters file present but unreadable
    ParamsUnreadable,
    /// A setting has a value of the wrong type
    InvalidSetting,
    /// No VPN site address configured
    MissingVpnAddress,
    /// No VPN username configured
    MissingUsername,
    /// No VPN password configured
    MissingPassword,
    /// Targets file present but unreadable
    TargetsUnreadable,
    /// Datalog cannot be created or written
    DatalogUnwritable,
    /// VPN site address does not resolve
    VpnAddressUnresolvable,

    // =========================================================================
    // E2xx: Tunnel open
    // =========================================================================
    /// Could not end an already running vendor UI/CLI (fatal)
    TerminateExistingSessionFailed,
    /// Could not start the vendor CLI process (fatal)
    SpawnFailed,
    /// Vendor CLI started but never offered its prompt (fatal)
    CliUnusable,
    /// Client was already connected and would not disconnect (fatal)
    DisconnectFailed,
    /// VPN site name did not resolve for the client
    SiteUnreachable,
    /// Client refused to connect because another vendor application runs
    AnotherClientRunning,
    /// Client could not verify the server certificate
    ServerUnverified,
    /// No answer to the connect command
    ConnectTimeout,
    /// Username/password not accepted
    LoginRejected,
    /// No answer after the credentials were sent
    CredentialsTimeout,
    /// Client asked to try connecting again
    ConnectRetryRequested,
    /// Client driver error, host needs a restart
    DriverError,
    /// No answer after the banner was accepted
    BannerTimeout,
    /// Client output matched none of the expected replies
    UnexpectedResponse,

    // =========================================================================
    // E3xx: Tunnel close
    // =========================================================================
    /// Disconnect was not confirmed in time; the handle was released anyway
    CloseUnconfirmed,
}

impl ErrorKind {
    /// Get the code string (for logging and the datalog)
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParamsUnreadable => "E101_PARAMS_UNREADABLE",
            Self::InvalidSetting => "E102_INVALID_SETTING",
            Self::MissingVpnAddress => "E103_MISSING_VPN_ADDRESS",
            Self::MissingUsername => "E104_MISSING_USERNAME",
            Self::MissingPassword => "E105_MISSING_PASSWORD",
            Self::TargetsUnreadable => "E106_TARGETS_UNREADABLE",
            Self::DatalogUnwritable => "E107_DATALOG_UNWRITABLE",
            Self::VpnAddressUnresolvable => "E108_VPN_ADDRESS_UNRESOLVABLE",
            Self::TerminateExistingSessionFailed => "E201_TERMINATE_EXISTING_FAILED",
            Self::SpawnFailed => "E202_SPAWN_FAILED",
            Self::CliUnusable => "E203_CLI_UNUSABLE",
            Self::DisconnectFailed => "E204_DISCONNECT_FAILED",
            Self::SiteUnreachable => "E210_SITE_UNREACHABLE",
            Self::AnotherClientRunning => "E211_ANOTHER_CLIENT_RUNNING",
            Self::ServerUnverified => "E212_SERVER_UNVERIFIED",
            Self::ConnectTimeout => "E213_CONNECT_TIMEOUT",
            Self::LoginRejected => "E214_LOGIN_REJECTED",
            Self::CredentialsTimeout => "E215_CREDENTIALS_TIMEOUT",
            Self::ConnectRetryRequested => "E216_CONNECT_RETRY_REQUESTED",
            Self::DriverError => "E217_DRIVER_ERROR",
            Self::BannerTimeout => "E218_BANNER_TIMEOUT",
            Self::UnexpectedResponse => "E219_UNEXPECTED_RESPONSE",
            Self::CloseUnconfirmed => "E301_CLOSE_UNCONFIRMED",
        }
    }

    /// Fixed human-readable message shown on the console
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParamsUnreadable => "Failed to read the vpnmon params file",
            Self::InvalidSetting => "A vpnmon parameter has an invalid value",
            Self::MissingVpnAddress => "Cannot run without a VPN site URL or IP address",
            Self::MissingUsername => "Cannot run without a VPN username",
            Self::MissingPassword => "Cannot run without a VPN password",
            Self::TargetsUnreadable => "Failed to read the vpnmon targets file",
            Self::DatalogUnwritable => "Failed to access the vpnmon datalog file",
            Self::VpnAddressUnresolvable => "The VPN site address does not resolve",
            Self::TerminateExistingSessionFailed => "Unable to end an existing VPN client UI or CLI",
            Self::SpawnFailed => "Unable to start the VPN client CLI",
            Self::CliUnusable => "Unable to use the VPN client CLI",
            Self::DisconnectFailed => "Unable to disconnect a VPN session left open",
            Self::SiteUnreachable => "Unable to contact the VPN site",
            Self::AnotherClientRunning => "Another VPN client UI or CLI is running",
            Self::ServerUnverified => "The VPN client cannot verify the VPN server",
            Self::ConnectTimeout => "The VPN site is not responding",
            Self::LoginRejected => "VPN username/password was not accepted",
            Self::CredentialsTimeout => "VPN credentials response timeout",
            Self::ConnectRetryRequested => "Unable to establish a connection this time",
            Self::DriverError => "The VPN client driver encountered an error; restart the system",
            Self::BannerTimeout => "Banner accept response timeout",
            Self::UnexpectedResponse => "Unexpected response from the VPN client CLI",
            Self::CloseUnconfirmed => "Unable to confirm the VPN disconnect",
        }
    }

    /// Fatal kinds terminate the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ParamsUnreadable
                | Self::InvalidSetting
                | Self::MissingVpnAddress
                | Self::MissingUsername
                | Self::MissingPassword
                | Self::TargetsUnreadable
                | Self::DatalogUnwritable
                | Self::VpnAddressUnresolvable
                | Self::TerminateExistingSessionFailed
                | Self::SpawnFailed
                | Self::CliUnusable
                | Self::DisconnectFailed
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// A condition that ends the run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct FatalError {
    pub kind: ErrorKind,
    /// Diagnostic context (file path, client output); never the password
    pub detail: String,
}

impl FatalError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<ErrorKind> for FatalError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_kinds() {
        assert!(ErrorKind::TerminateExistingSessionFailed.is_fatal());
        assert!(ErrorKind::SpawnFailed.is_fatal());
        assert!(ErrorKind::CliUnusable.is_fatal());
        assert!(ErrorKind::DisconnectFailed.is_fatal());
    }

    #[test]
    fn test_per_cycle_kinds_are_not_fatal() {
        for kind in [
            ErrorKind::SiteUnreachable,
            ErrorKind::ConnectTimeout,
            ErrorKind::LoginRejected,
            ErrorKind::BannerTimeout,
            ErrorKind::UnexpectedResponse,
            ErrorKind::CloseUnconfirmed,
        ] {
            assert!(!kind.is_fatal(), "{} should not be fatal", kind.code());
        }
    }

    #[test]
    fn test_fatal_error_displays_code_and_message() {
        let err = FatalError::new(ErrorKind::SpawnFailed, "No such file or directory");
        assert_eq!(
            err.to_string(),
            "E202_SPAWN_FAILED: Unable to start the VPN client CLI"
        );
    }
}
