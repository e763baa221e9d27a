/*!
 * Error types for Tripwire
 */

use std::io;
use thiserror::Error;
use tripwire_core_breaker::CoordinationError;

pub type Result<T> = std::result::Result<T, TripwireError>;

#[derive(Debug, Error)]
pub enum TripwireError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML for the expected schema
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Shared state could not be read, written or locked
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

impl TripwireError {
    /// Check if this error is a configuration problem (fatal at startup)
    pub fn is_config(&self) -> bool {
        matches!(self, TripwireError::Config(_) | TripwireError::ConfigParse(_))
    }

    /// Check if retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TripwireError::Coordination(e) => matches!(e, CoordinationError::LockTimeout { .. }),
            TripwireError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_display_messages() {
        let err = TripwireError::Config("redb backend requires a path".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: redb backend requires a path"
        );

        let err: TripwireError = CoordinationError::AlreadyLocked {
            name: "db".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            CoordinationError::AlreadyLocked {
                name: "db".to_string()
            }
            .to_string()
        );
    }

    #[test]
    fn test_parse_error_converts() {
        let parse = toml::from_str::<toml::Table>("[unterminated").unwrap_err();
        let err: TripwireError = parse.into();
        assert!(err.is_config());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        let timeout: TripwireError = CoordinationError::LockTimeout {
            name: "db".to_string(),
            waited: Duration::from_secs(1),
        }
        .into();
        assert!(timeout.is_transient());

        let backend: TripwireError = CoordinationError::Backend("disk full".to_string()).into();
        assert!(!backend.is_transient());

        let io_err: TripwireError = io::Error::new(io::ErrorKind::TimedOut, "slow disk").into();
        assert!(io_err.is_transient());
    }
}
