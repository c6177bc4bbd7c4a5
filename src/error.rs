//! Error types for the tracker
//!
//! Every failure is returned to the caller; nothing in the crate retries
//! internally. The categories mirror the stages a call can fail at: getting a
//! connection, running the four-bucket transaction, running a single command,
//! validating input, or loading configuration.

use thiserror::Error;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum Error {
    /// Dialing, authenticating, or selecting the database failed
    ///
    /// Fatal to that acquisition attempt. The connection that failed is
    /// discarded, never returned to the pool.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The MULTI/EXEC batch of a record call failed to execute or commit
    ///
    /// The store applies the batch all-or-nothing, so either all four
    /// buckets were updated or none were.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Caller supplied an argument the tracker cannot act on
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A single non-transactional command failed
    #[error("Store command error: {0}")]
    StoreCommandError(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// True when the error was caused by the caller's input
    ///
    /// The HTTP layer maps these to 400 and everything else to 500.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = Error::TransactionError("EXEC aborted".to_string());
        assert_eq!(err.to_string(), "Transaction error: EXEC aborted");

        let err = Error::InvalidArgument("no operands".to_string());
        assert_eq!(err.to_string(), "Invalid argument: no operands");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(Error::InvalidArgument("x".into()).is_client_error());
        assert!(!Error::ConnectionError("x".into()).is_client_error());
        assert!(!Error::StoreCommandError("x".into()).is_client_error());
        assert!(!Error::TransactionError("x".into()).is_client_error());
        assert!(!Error::ConfigError("x".into()).is_client_error());
    }
}
