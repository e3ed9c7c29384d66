//! Error types for the ledger

use crate::types::AccountId;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input, rejected before touching the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Debit would take the balance below zero
    #[error("Insufficient points balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Points the debit needs
        required: i64,
        /// Points currently on the account
        available: i64,
    },

    /// Idempotent operation already recorded (guard key exists)
    #[error("Already applied: {0}")]
    AlreadyApplied(String),

    /// Referee already has a referrer
    #[error("Account {0} has already been referred")]
    AlreadyReferred(AccountId),

    /// Referee and referrer are the same account
    #[error("Accounts cannot refer themselves")]
    SelfReferral,

    /// Referral token does not resolve to an account
    #[error("Unknown referral token: {0}")]
    UnknownReferralToken(String),

    /// Caller lacks the privilege for this path
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Durable store is busy or unreachable; safe to retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Non-retryable storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invariant violation (balance drift, broken hash chain, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether resending the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }

    /// Stable machine-readable code, used for metrics labels and API bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::AccountNotFound(_) => "account_not_found",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::AlreadyApplied(_) => "already_applied",
            Error::AlreadyReferred(_) => "already_referred",
            Error::SelfReferral => "self_referral",
            Error::UnknownReferralToken(_) => "unknown_referral_token",
            Error::Authorization(_) => "authorization_error",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Storage(_) => "storage_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Config(_) => "configuration_error",
            Error::Io(_) => "io_error",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain | ErrorKind::IOError => {
                Error::StoreUnavailable(err.to_string())
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}
