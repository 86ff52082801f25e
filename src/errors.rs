//! Typed error hierarchy for the task board.
//!
//! `BoardError` is returned by the store and the request handlers. Every
//! variant maps onto one [`ErrorKind`], which the API renders alongside a
//! human-readable message. Startup and CLI code use `anyhow` instead.

use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Unauthorized,
    Forbidden,
    Conflict,
    Transient,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage temporarily unavailable: {0}")]
    Transient(String),

    /// A column's orders were not exactly `0..count` before commit; the
    /// transaction was rolled back.
    #[error("Order of {column} in workspace {workspace_id} is inconsistent: {detail}")]
    ConsistencyFault {
        workspace_id: String,
        column: String,
        detail: String,
    },

    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient(_) => ErrorKind::Transient,
            Self::ConsistencyFault { .. }
            | Self::Database(_)
            | Self::LockPoisoned
            | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::Transient(err.to_string())
            }
            _ => Self::Database(err),
        }
    }
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;
