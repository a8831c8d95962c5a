//! Error types for evq.
//!
//! Every fallible engine operation eventually maps into [`Error`], which
//! carries:
//! - a stable numeric code for machine parsing
//! - a category for grouping
//! - a recoverability hint used by the write and upload paths to decide
//!   whether to continue with the next file or give up on the current one
//!
//! Errors serialize to structured JSON through [`StructuredError`]:
//! ```json
//! {
//!   "code": 21,
//!   "category": "storage",
//!   "message": "object of 600000 bytes exceeds the maximum of 524288 bytes",
//!   "recoverable": false
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for evq operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file or preset errors.
    Config,
    /// Batch file and directory management errors.
    Storage,
    /// Block format and decoding errors.
    Format,
    /// Upload pipeline errors.
    Upload,
    /// Background lane / worker lifecycle errors.
    Runtime,
    /// Raw I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Format => write!(f, "format"),
            ErrorCategory::Upload => write!(f, "upload"),
            ErrorCategory::Runtime => write!(f, "runtime"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for evq.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid performance profile: {0}")]
    InvalidProfile(String),

    // Storage errors (20-29)
    #[error("storage error: {0}")]
    Storage(String),

    #[error("object of {size} bytes exceeds the maximum of {max} bytes")]
    ObjectTooLarge { size: u64, max: u64 },

    #[error("directory unavailable: {path}")]
    DirectoryUnavailable { path: String },

    // Format errors (30-39)
    #[error("malformed batch: {0}")]
    Format(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    // Upload errors (40-49)
    #[error("upload could not be initiated: {0}")]
    UploadNotInitiated(String),

    // Runtime errors (50-59)
    #[error("lane '{name}' is no longer running")]
    LaneClosed { name: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the stable error code.
    ///
    /// - 10-19: configuration
    /// - 20-29: storage
    /// - 30-39: format
    /// - 40-49: upload
    /// - 50-59: runtime
    /// - 60-69: I/O
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidProfile(_) => 11,
            Error::Storage(_) => 20,
            Error::ObjectTooLarge { .. } => 21,
            Error::DirectoryUnavailable { .. } => 22,
            Error::Format(_) => 30,
            Error::Encryption(_) => 31,
            Error::UploadNotInitiated(_) => 41,
            Error::LaneClosed { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidProfile(_) => ErrorCategory::Config,
            Error::Storage(_) | Error::ObjectTooLarge { .. } | Error::DirectoryUnavailable { .. } => {
                ErrorCategory::Storage
            }
            Error::Format(_) | Error::Encryption(_) => ErrorCategory::Format,
            Error::UploadNotInitiated(_) => ErrorCategory::Upload,
            Error::LaneClosed { .. } => ErrorCategory::Runtime,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether retrying the same operation later may succeed.
    ///
    /// Non-recoverable errors mean the data involved should be dropped
    /// instead of retried (oversized objects, malformed batches).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::InvalidProfile(_) => true,

            Error::Storage(_) => true,
            Error::ObjectTooLarge { .. } => false,
            Error::DirectoryUnavailable { .. } => true,

            Error::Format(_) => false,
            Error::Encryption(_) => false,

            Error::UploadNotInitiated(_) => false,

            Error::LaneClosed { .. } => false,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }
}

/// Structured error payload for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context: HashMap::new(),
        }
    }
}

impl StructuredError {
    /// Attach a context value (e.g. the file the error relates to).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":{},"message":"serialization failed"}}"#,
                self.code
            )
        })
    }
}
