//! Error handling for the book club election engine
//!
//! Two families live in one enum: domain rejections, which are user-facing and
//! must not be retried without changing the input, and infrastructure failures
//! coming from the store, which callers may retry when transient.

use uuid::Uuid;

/// Result type alias for the election engine
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the election engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Another election is still open
    #[error("An election is already open: {election_id}")]
    ElectionAlreadyOpen { election_id: Uuid },

    /// Nothing passed the eligibility filter
    #[error("No nominations are eligible for the ballot")]
    NoEligibleCandidates,

    /// A tally was requested against a ballot with no books
    #[error("Election {election_id} has an empty ballot")]
    EmptyBallot { election_id: Uuid },

    /// Votes cannot be cast against a closed election
    #[error("Election {election_id} is already closed")]
    ElectionClosed { election_id: Uuid },

    /// The voted book is not on the election's ballot
    #[error("Book {book_id} is not on the ballot of election {election_id}")]
    BookNotOnBallot { election_id: Uuid, book_id: Uuid },

    /// The role resolver placed the voter in neither circle
    #[error("Voter {voter_id} belongs to no voting circle")]
    InvalidRoleWeight { voter_id: String },

    /// There is no open election to act on
    #[error("No election is currently open")]
    NoOpenElection,

    #[error("Election not found: {election_id}")]
    ElectionNotFound { election_id: Uuid },

    #[error("Book not found: {book_id}")]
    BookNotFound { book_id: Uuid },

    /// Nominations are frozen while an election runs
    #[error("Nominations are closed while an election is active")]
    NominationsClosed,

    /// Quadratic points budget exceeded
    #[error("Vote budget exceeded: spent {spent}, allowed {allowed}")]
    VoteBudgetExceeded { spent: f64, allowed: f64 },

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Persistence errors, propagated unchanged
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this is a user-facing domain rejection rather than an
    /// infrastructure failure
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            Self::Store(_) | Self::Serialization(_) | Self::Config { .. } | Self::Internal { .. }
        )
    }

    /// Whether the operation may succeed if retried unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Convenience macro for validation errors
#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::Error::validation($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::validation(format!($fmt, $($arg)*))
    };
}
