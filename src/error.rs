//! Unified error handling for the bookd crate
//!
//! Domain-specific errors ([`BookingError`], [`StoreError`],
//! [`ServerError`]) stay typed at their module boundaries; this module
//! provides a unified `Error` enum for code that crosses those boundaries
//! (store construction, server startup), plus a coarse classification
//! used to decide whether a failure is worth retrying.

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::booking::coordinator::BookingError;
pub use crate::booking::server::ServerError;
pub use crate::store::StoreError;

/// Classification of errors for handling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport failures talking to the store, or server socket trouble.
    Network,

    /// Lock-state outcomes: conflicts, forbidden releases, missing
    /// resources.
    Booking,

    /// Configuration and validation errors.
    Config,

    /// Other/unknown errors.
    Other,
}

/// Unified error type for the bookd crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Booking decision outcomes.
    #[error("booking error: {0}")]
    Booking(#[from] BookingError),

    /// Store adapter failures.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Server assembly and runtime failures.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context.
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is recoverable (can be retried).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Booking(BookingError::Store(e)) => e.is_retryable(),
            // Conflicts resolve only when the caller re-runs the whole
            // read-decide-write cycle, not by replaying the same write.
            Self::Booking(_) => false,
            Self::Store(e) => e.is_retryable(),
            // A crashed serve loop may come back on restart; a bad bind
            // address or config will not.
            Self::Server(ServerError::Serve(_)) => true,
            Self::Server(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Booking(BookingError::Store(_)) | Self::Store(_) => ErrorCategory::Network,
            Self::Booking(_) => ErrorCategory::Booking,
            Self::Server(ServerError::Config(_)) | Self::Config(_) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Network,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context.
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;
