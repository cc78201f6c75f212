use std::fmt;

use serde::{Deserialize, Serialize};

/// The four record store operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend refused the operation.
    #[error("{op} on {table} rejected: {reason}")]
    Rejected {
        table: String,
        op: StoreOp,
        reason: String,
    },

    /// A uniqueness or shape constraint was violated.
    #[error("constraint violation on {table}: {reason}")]
    Constraint { table: String, reason: String },

    /// An update or delete was issued without any filter condition.
    #[error("refusing unfiltered {op} on {table}")]
    UnfilteredWrite { table: String, op: StoreOp },

    /// A row or fixture could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading or writing a fixture file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal state is unusable (e.g. a poisoned lock).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn rejected(table: impl Into<String>, op: StoreOp, reason: impl Into<String>) -> Self {
        Self::Rejected {
            table: table.into(),
            op,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
