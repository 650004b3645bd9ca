//! Error types for tenantry operations

use std::fmt;
use thiserror::Error;

/// Why a single field failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorReason {
    /// A not-null field carried `Value::Null`.
    NullNotAllowed,
    /// String or byte field shorter than its declared minimum.
    TooShort { min: usize },
    /// String or byte field longer than its declared maximum.
    TooLong { max: usize },
    /// Tenant key or identifier field was empty.
    EmptyIdentifier,
    /// Value variant does not match the declared field kind.
    TypeMismatch { expected: &'static str },
    /// Wrong number of key or value fields supplied.
    ArityMismatch { expected: usize, got: usize },
}

impl fmt::Display for FieldErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullNotAllowed => write!(f, "null not allowed"),
            Self::TooShort { min } => write!(f, "shorter than minimum length {}", min),
            Self::TooLong { max } => write!(f, "longer than maximum length {}", max),
            Self::EmptyIdentifier => write!(f, "identifier must not be empty"),
            Self::TypeMismatch { expected } => write!(f, "expected a {} value", expected),
            Self::ArityMismatch { expected, got } => {
                write!(f, "expected {} fields, got {}", expected, got)
            }
        }
    }
}

/// Validation failure for one field of a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Field '{field}' invalid: {reason}")]
pub struct FieldError {
    pub field: String,
    pub reason: FieldErrorReason,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: FieldErrorReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }
}

/// Storage layer errors reported by a connection scope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Unique key violation on {table}: {key}")]
    UniqueViolation { table: String, key: String },

    #[error("Constraint violation on {table}: {reason}")]
    ConstraintViolation { table: String, reason: String },

    #[error("Connection unavailable: {reason}")]
    ConnectionUnavailable { reason: String },

    #[error("Statement failed on {table}: {reason}")]
    StatementFailed { table: String, reason: String },

    #[error("Unknown table: {table}")]
    UnknownTable { table: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },
}

/// Master error type for record store operations.
///
/// The variants follow the failure taxonomy callers branch on:
/// validation and contract errors are raised before any I/O and are never
/// worth retrying, uniqueness means the caller picked the wrong write
/// primitive, and only `Transient` is safe to retry with backoff.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] FieldError),

    #[error("Uniqueness violation on {table}: {key}")]
    UniquenessViolation { table: String, key: String },

    #[error("Constraint violation on {table}: {reason}")]
    Constraint { table: String, reason: String },

    #[error("Transient storage error: {reason}")]
    Transient { reason: String },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Contract violation: {reason}")]
    ContractViolation { reason: String },

    #[error("Corrupt record in {table}: {source}")]
    CorruptRecord {
        table: String,
        #[source]
        source: FieldError,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Create a contract violation error.
    pub fn contract(reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            reason: reason.into(),
        }
    }

    /// Returns true if the caller may retry the operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true for key collisions on insert.
    pub fn is_uniqueness_violation(&self) -> bool {
        matches!(self, Self::UniquenessViolation { .. })
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation { table, key } => {
                Self::UniquenessViolation { table, key }
            }
            StorageError::ConstraintViolation { table, reason } => {
                Self::Constraint { table, reason }
            }
            StorageError::ConnectionUnavailable { reason } => Self::Transient { reason },
            other => Self::Storage(other),
        }
    }
}

/// Result type alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================
