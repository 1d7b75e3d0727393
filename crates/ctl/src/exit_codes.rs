//! Exit codes for `lumixctl`.
//!
//! Stable so scripts can tell a missing camera from a store failure.

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments
    InvalidArguments = 2,
    /// Shared preferences could not be read or written
    StoreFailed = 3,
    /// Streaming notification could not be posted
    NotifyFailed = 4,
    /// No matching camera is connected
    NoCamera = 5,
    /// Activation or deactivation failed
    ActivationFailed = 6,
    /// Activation needs approval or a reboot before it takes effect
    ActivationPending = 7,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::StoreFailed => write!(f, "preference store failed"),
            ExitCode::NotifyFailed => write!(f, "notification failed"),
            ExitCode::NoCamera => write!(f, "no camera"),
            ExitCode::ActivationFailed => write!(f, "activation failed"),
            ExitCode::ActivationPending => write!(f, "activation pending"),
        }
    }
}
