//! Error types and handling for ringseq

use thiserror::Error;

/// Result type alias for ringseq operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Main error type for ringseq
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// The barrier was alerted while (or before) waiting.
    ///
    /// This is the cooperative shutdown path, not a bug: blocked waits fail
    /// fast with it and consumption loops exit after their completion hook.
    #[error("Barrier alerted")]
    Alerted,

    /// Invalid configuration parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Claiming the next slot would overwrite an entry a gating consumer
    /// has not processed yet
    #[error("Insufficient capacity: gating consumers have not caught up")]
    InsufficientCapacity,
}

static_assertions::assert_impl_all!(RingError: Send, Sync, std::error::Error);

impl RingError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Check if this error is the shutdown signal
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::Alerted)
    }

    /// Check if this error is recoverable by retrying later
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientCapacity)
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::RingError::config(format!($($arg)*))
    };
}
