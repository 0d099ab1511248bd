use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ChildStatus, RunState};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid parameters: {}", .0.join("; "))]
    InvalidParameters(Vec<String>),

    #[error("Child order {run_id}#{index} already recorded")]
    DuplicateChildOrder { run_id: String, index: u32 },

    #[error("Child order {run_id}#{index} was never recorded")]
    UnknownChildOrder { run_id: String, index: u32 },

    #[error("Child order {run_id}#{index}: illegal transition {from} -> {to}")]
    InvalidTransition {
        run_id: String,
        index: u32,
        from: ChildStatus,
        to: ChildStatus,
    },

    #[error("Run {run_id}: illegal transition {from} -> {to}")]
    InvalidRunTransition {
        run_id: String,
        from: RunState,
        to: RunState,
    },

    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Run {run_id} is already {state}")]
    AlreadyTerminal { run_id: String, state: RunState },

    #[error("Exchange API error: {0}")]
    Gateway(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Caller-facing classification of an [`Error`]. Each class has a stable
/// code string, an HTTP status and a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameters,
    RunNotFound,
    AlreadyTerminal,
    /// Duplicate/unknown child or illegal transition. A bug, never user input.
    LedgerViolation,
    Gateway,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::RunNotFound => "run_not_found",
            ErrorKind::AlreadyTerminal => "already_terminal",
            ErrorKind::LedgerViolation => "ledger_violation",
            ErrorKind::Gateway => "gateway_error",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "invalid_parameters" => ErrorKind::InvalidParameters,
            "run_not_found" => ErrorKind::RunNotFound,
            "already_terminal" => ErrorKind::AlreadyTerminal,
            "ledger_violation" => ErrorKind::LedgerViolation,
            "gateway_error" => ErrorKind::Gateway,
            _ => ErrorKind::Internal,
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidParameters => 400,
            ErrorKind::RunNotFound => 404,
            ErrorKind::AlreadyTerminal => 409,
            ErrorKind::LedgerViolation => 500,
            ErrorKind::Gateway => 502,
            ErrorKind::Internal => 500,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::InvalidParameters => 2,
            ErrorKind::RunNotFound => 3,
            ErrorKind::AlreadyTerminal => 4,
            ErrorKind::LedgerViolation => 5,
            ErrorKind::Gateway => 6,
            ErrorKind::Internal => 1,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameters(_) => ErrorKind::InvalidParameters,
            Error::RunNotFound(_) => ErrorKind::RunNotFound,
            Error::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            Error::DuplicateChildOrder { .. }
            | Error::UnknownChildOrder { .. }
            | Error::InvalidTransition { .. }
            | Error::InvalidRunTransition { .. } => ErrorKind::LedgerViolation,
            Error::Gateway(_) | Error::Http(_) | Error::WebSocket(_) => ErrorKind::Gateway,
            _ => ErrorKind::Internal,
        }
    }

    /// Individual messages for `InvalidParameters`, the display string otherwise.
    pub fn details(&self) -> Vec<String> {
        match self {
            Error::InvalidParameters(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidParameters(vec![message.into()])
    }
}
