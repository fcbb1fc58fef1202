//! Error types for the device bridge engine, plus stderr classification.

use std::fmt;
use thiserror::Error;

/// Main error type for bridge and transfer operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tool not installed: {0}")]
    ToolMissing(String),

    #[error("Command `{command}` failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {0}")]
    Timeout(String),

    #[error("Unexpected command output: {0}")]
    InvalidOutput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl serde::Serialize for BridgeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Why a pull from the device failed, derived from the bridge's stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullFailure {
    PermissionDenied,
    DiskFull,
    SourceNotFound,
    Generic(String),
}

impl fmt::Display for PullFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullFailure::PermissionDenied => f.write_str("Permission denied"),
            PullFailure::DiskFull => f.write_str("Disk full"),
            PullFailure::SourceNotFound => f.write_str("File not found on device"),
            PullFailure::Generic(message) => f.write_str(message),
        }
    }
}

/// Why a remote delete failed, derived from the bridge's stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteFailure {
    NotFound,
    PermissionDenied,
    ReadOnlyFilesystem,
    Generic(String),
}

impl fmt::Display for DeleteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteFailure::NotFound => f.write_str("File not found on device"),
            DeleteFailure::PermissionDenied => f.write_str("Permission denied"),
            DeleteFailure::ReadOnlyFilesystem => f.write_str("Read-only file system"),
            DeleteFailure::Generic(message) => f.write_str(message),
        }
    }
}

/// Last non-empty line of a process's stderr, or `fallback` if there is none.
fn last_line_or(text: &str, fallback: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or(fallback)
        .to_string()
}

pub fn classify_pull_error(stderr: &str) -> PullFailure {
    let lower = stderr.to_lowercase();

    if lower.contains("permission denied") {
        PullFailure::PermissionDenied
    } else if lower.contains("no space left") || lower.contains("disk full") {
        PullFailure::DiskFull
    } else if lower.contains("no such file") || lower.contains("does not exist") {
        PullFailure::SourceNotFound
    } else {
        PullFailure::Generic(last_line_or(stderr, "Transfer failed"))
    }
}

pub fn classify_delete_error(stderr: &str) -> DeleteFailure {
    let lower = stderr.to_lowercase();

    if lower.contains("no such file") || lower.contains("does not exist") {
        DeleteFailure::NotFound
    } else if lower.contains("permission denied") || lower.contains("operation not permitted") {
        DeleteFailure::PermissionDenied
    } else if lower.contains("read-only file system") {
        DeleteFailure::ReadOnlyFilesystem
    } else {
        DeleteFailure::Generic(last_line_or(stderr, "Delete failed"))
    }
}
