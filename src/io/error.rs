// src/io/error.rs
//
// Failure taxonomy for the serial link.
// Read timeouts and undecodable bytes are normal line noise and have no variant here.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// `connect` was issued without a port selected
    #[error("No COM port selected.")]
    PortUnavailable,

    /// `connect` was issued while a link is already open
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    /// The device could not be opened (busy, permission denied, missing)
    #[error("Error opening {port}: {cause}")]
    OpenFailed { port: String, cause: String },

    /// Unexpected I/O failure in the middle of a session
    #[error("Serial error: {0}")]
    ReadFailed(String),

    /// Session state lock was poisoned by a panicking thread
    #[error("Session state poisoned: {0}")]
    Poisoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_operator_wording() {
        assert_eq!(LinkError::PortUnavailable.to_string(), "No COM port selected.");
        let err = LinkError::OpenFailed {
            port: "COM7".to_string(),
            cause: "Access is denied.".to_string(),
        };
        assert_eq!(err.to_string(), "Error opening COM7: Access is denied.");
        assert_eq!(
            LinkError::ReadFailed("device reports readiness".to_string()).to_string(),
            "Serial error: device reports readiness"
        );
    }
}
