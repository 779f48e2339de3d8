//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed argument, rejected before any state is touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Amount must be strictly positive
    #[error("Invalid amount: {0} (must be greater than zero)")]
    InvalidAmount(i64),

    /// Days must be zero or positive and yield a representable date
    #[error("Invalid days: {0}")]
    InvalidDays(i64),

    /// Source and destination accounts are the same
    #[error("Cannot transfer to self")]
    SelfTransfer,

    /// Caller's organization or role does not permit the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Account balance would go negative
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount the operation needs
        required: u64,
        /// Amount currently held
        available: u64,
    },

    /// Total supply would go negative
    #[error("Insufficient supply: required {required}, available {available}")]
    InsufficientSupply {
        /// Amount the operation needs
        required: u64,
        /// Current supply
        available: u64,
    },

    /// A document required by the operation does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Governance token has already voted on the proposal
    #[error("Token {token_id} already voted on proposal {proposal_id}")]
    AlreadyVoted {
        /// Proposal id
        proposal_id: String,
        /// Governance token id
        token_id: String,
    },

    /// Document is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Stored document carries a different docType than requested
    #[error("docType must be {expected}, found {found}")]
    DocTypeMismatch {
        /// Requested docType
        expected: &'static str,
        /// docType present in the stored bytes
        found: String,
    },

    /// Invariant violation (balance does not match buckets, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Client-facing category of the error
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Validation(_)
            | Error::InvalidAmount(_)
            | Error::InvalidDays(_)
            | Error::SelfTransfer
            | Error::DocTypeMismatch { .. } => "validation",
            Error::Unauthorized(_) => "unauthorized",
            Error::InsufficientFunds { .. } | Error::InsufficientSupply { .. } => {
                "insufficient_balance"
            }
            Error::NotFound(_) => "not_found",
            Error::AlreadyVoted { .. } | Error::InvalidState(_) => "conflict",
            Error::InvariantViolation(_)
            | Error::Serialization(_)
            | Error::Storage(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Other(_) => "internal",
        }
    }

    /// True for errors raised by contract validation rather than infrastructure
    pub fn is_client_error(&self) -> bool {
        self.error_type() != "internal"
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
