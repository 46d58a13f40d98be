//! Session automaton state definitions

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

/// The five possible states of the VPN session automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No tunnel, no vendor CLI process held
    Closed,
    /// open() in flight
    Opening,
    /// Tunnel up, vendor CLI waiting at its prompt
    Open,
    /// close() in flight
    Closing,
    /// open() or close() failed; only close() leaves this state
    Failed,
}

impl SessionState {
    /// Terminal states are the only ones observable between operations
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SessionState::Closed | SessionState::Open | SessionState::Failed
        )
    }

    /// State name painted for the terminal
    pub fn painted(&self) -> ColoredString {
        let name = self.to_string();
        match self {
            SessionState::Closed => name.normal(),
            SessionState::Opening | SessionState::Closing => name.yellow(),
            SessionState::Open => name.green(),
            SessionState::Failed => name.red().bold(),
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Closed => "CLOSED",
            SessionState::Opening => "OPENING",
            SessionState::Open => "OPEN",
            SessionState::Closing => "CLOSING",
            SessionState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_states_are_not_settled() {
        assert!(!SessionState::Opening.is_settled());
        assert!(!SessionState::Closing.is_settled());
        assert!(SessionState::Closed.is_settled());
        assert!(SessionState::Open.is_settled());
        assert!(SessionState::Failed.is_settled());
    }

    #[test]
    fn test_serializes_screaming_case() {
        let json = serde_json::to_string(&SessionState::Closed).unwrap();
        assert_eq!(json, "\"CLOSED\"");
    }
}
