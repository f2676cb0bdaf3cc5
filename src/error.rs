//! Error types for streakust
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad input, future task, malformed import)
//! - 4: Operation failed (local I/O, lock contention, remote failure)

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::TaskId;

/// Exit codes for the streakust CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for streakust operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Task {id} is scheduled for {date}, which is in the future")]
    FutureTask { id: TaskId, date: NaiveDate },

    #[error("Invalid import file: {0}")]
    Format(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Operation failures (exit code 4)
    #[error("Remote mirror error: {0}")]
    Remote(String),

    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_)
            | Error::FutureTask { .. }
            | Error::Format(_)
            | Error::TaskNotFound(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            Error::Remote(_)
            | Error::Notify(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Whether the error comes from the remote mirror and should only degrade sync
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote(_) | Error::Notify(_))
    }
}

/// Result type alias for streakust operations
pub type Result<T> = std::result::Result<T, Error>;
