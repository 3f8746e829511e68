// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for UDOM
//!
//! All driver-specific errors are mapped to these unified error types
//! so callers handle failures the same way regardless of backend.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all UDOM operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum UdomError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Connection pool exhausted after {timeout_ms}ms")]
    PoolTimeout { timeout_ms: u64 },

    #[error("Constraint violation on '{entity}': {message}")]
    ConstraintViolation { entity: String, message: String },

    #[error("UQL syntax error at position {position}: {message}")]
    UqlSyntax { message: String, position: usize },

    #[error("Transaction state error: {message}")]
    TransactionState { message: String },

    #[error("Transaction aborted: {message}")]
    TransactionAbort { message: String },

    #[error("Operation not supported: {message}")]
    NotSupported { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Execution error: {message}")]
    Execution { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl UdomError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn constraint(entity: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            entity: entity.into(),
            message: msg.into(),
        }
    }

    pub fn uql_syntax(msg: impl Into<String>, position: usize) -> Self {
        Self::UqlSyntax {
            message: msg.into(),
            position,
        }
    }

    pub fn transaction_state(msg: impl Into<String>) -> Self {
        Self::TransactionState { message: msg.into() }
    }

    pub fn transaction_abort(msg: impl Into<String>) -> Self {
        Self::TransactionAbort { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation { message: msg.into() }
    }

    /// Whether a bounded internal retry is permitted for this failure.
    /// Parse/validation/state errors are surfaced immediately, never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::PoolTimeout { .. }
        )
    }

    /// Classifies a sqlx error for the given entity into the unified taxonomy.
    pub(crate) fn from_sqlx(entity: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout { timeout_ms: 0 },
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::connection_failed(err.to_string())
            }
            sqlx::Error::Database(db) => {
                if db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation()
                {
                    Self::constraint(entity, db.to_string())
                } else {
                    Self::execution(db.to_string())
                }
            }
            other => Self::execution(other.to_string()),
        }
    }

    /// Classifies a MongoDB driver error for the given entity.
    pub(crate) fn from_mongo(entity: &str, err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};
        match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000 => {
                Self::constraint(entity, we.message.clone())
            }
            ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => {
                Self::connection_failed(err.to_string())
            }
            ErrorKind::Authentication { .. } => Self::connection_failed(err.to_string()),
            _ => Self::execution(err.to_string()),
        }
    }

    /// Classifies a tiberius error for the given entity.
    pub(crate) fn from_tiberius(entity: &str, err: tiberius::error::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("duplicate key")
            || lower.contains("unique")
            || lower.contains("constraint")
        {
            Self::constraint(entity, msg)
        } else if lower.contains("connection") || lower.contains("io error") {
            Self::connection_failed(msg)
        } else {
            Self::execution(msg)
        }
    }
}

/// Result type alias for UDOM operations
pub type UdomResult<T> = Result<T, UdomError>;
