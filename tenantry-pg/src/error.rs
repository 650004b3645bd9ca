//! Mapping PostgreSQL and pool failures onto the store's error taxonomy.

use deadpool_postgres::PoolError;
use tenantry_core::{ConfigError, StorageError, StoreError};
use tokio_postgres::error::SqlState;

/// Classify a statement failure on `table`.
pub fn classify(table: &str, err: tokio_postgres::Error) -> StoreError {
    if let Some(db) = err.as_db_error() {
        let detail = db.detail().unwrap_or_else(|| db.message());
        return classify_code(table, db.code(), detail);
    }

    let io = std::error::Error::source(&err)
        .map(|source| source.is::<std::io::Error>())
        .unwrap_or(false);
    if err.is_closed() || io {
        tracing::warn!(table, error = %err, "connection lost");
        return StoreError::Transient {
            reason: err.to_string(),
        };
    }

    tracing::error!(table, error = ?err, "statement failed");
    StorageError::StatementFailed {
        table: table.to_string(),
        reason: err.to_string(),
    }
    .into()
}

/// Classify a server-reported SQLSTATE.
pub fn classify_code(table: &str, code: &SqlState, detail: &str) -> StoreError {
    let storage = if *code == SqlState::UNIQUE_VIOLATION {
        StorageError::UniqueViolation {
            table: table.to_string(),
            key: detail.to_string(),
        }
    } else if *code == SqlState::NOT_NULL_VIOLATION || *code == SqlState::CHECK_VIOLATION {
        StorageError::ConstraintViolation {
            table: table.to_string(),
            reason: detail.to_string(),
        }
    } else if *code == SqlState::UNDEFINED_TABLE {
        StorageError::UnknownTable {
            table: table.to_string(),
        }
    } else if is_retryable(code) {
        tracing::warn!(table, code = code.code(), detail, "retryable database error");
        return StoreError::Transient {
            reason: format!("{} ({})", detail, code.code()),
        };
    } else {
        tracing::error!(table, code = code.code(), detail, "database error");
        StorageError::StatementFailed {
            table: table.to_string(),
            reason: format!("{} ({})", detail, code.code()),
        }
    };
    storage.into()
}

/// Connection exceptions, serialization failures, deadlocks, admin
/// shutdown and connection exhaustion.
fn is_retryable(code: &SqlState) -> bool {
    code.code().starts_with("08")
        || *code == SqlState::T_R_SERIALIZATION_FAILURE
        || *code == SqlState::T_R_DEADLOCK_DETECTED
        || *code == SqlState::ADMIN_SHUTDOWN
        || *code == SqlState::CRASH_SHUTDOWN
        || *code == SqlState::CANNOT_CONNECT_NOW
        || *code == SqlState::TOO_MANY_CONNECTIONS
}

/// Classify a failure to obtain a pooled connection.
pub fn classify_pool(err: PoolError) -> StoreError {
    tracing::error!("Connection pool error: {:?}", err);
    let reason = err.to_string();

    match err {
        PoolError::Timeout(_) | PoolError::Closed => {
            StorageError::ConnectionUnavailable { reason }.into()
        }
        PoolError::Backend(inner) => classify("<pool>", inner),
        _ => ConfigError::InvalidValue {
            field: "pool".to_string(),
            value: String::new(),
            reason,
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation() {
        let err = classify_code("nonce", &SqlState::UNIQUE_VIOLATION, "Key (nonce)=(..) exists");
        assert!(err.is_uniqueness_violation());
    }

    #[test]
    fn test_check_and_not_null_are_constraints() {
        for code in [SqlState::CHECK_VIOLATION, SqlState::NOT_NULL_VIOLATION] {
            let err = classify_code("profile", &code, "bad row");
            assert!(matches!(err, StoreError::Constraint { .. }));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_retryable_codes_are_transient() {
        for code in [
            SqlState::from_code("08006"),
            SqlState::T_R_SERIALIZATION_FAILURE,
            SqlState::T_R_DEADLOCK_DETECTED,
            SqlState::ADMIN_SHUTDOWN,
        ] {
            assert!(classify_code("inbox", &code, "x").is_transient(), "{:?}", code);
        }
    }

    #[test]
    fn test_undefined_table() {
        let err = classify_code("inbox", &SqlState::UNDEFINED_TABLE, "relation does not exist");
        assert_eq!(
            err,
            StoreError::Storage(StorageError::UnknownTable {
                table: "inbox".to_string()
            })
        );
    }

    #[test]
    fn test_other_codes_are_not_retryable() {
        let err = classify_code("inbox", &SqlState::SYNTAX_ERROR, "syntax error");
        assert!(matches!(
            err,
            StoreError::Storage(StorageError::StatementFailed { .. })
        ));
    }

    #[test]
    fn test_pool_timeout_and_close_are_transient() {
        let err = classify_pool(PoolError::Timeout(deadpool_postgres::TimeoutType::Wait));
        assert!(err.is_transient());
        assert!(classify_pool(PoolError::Closed).is_transient());
    }
}
