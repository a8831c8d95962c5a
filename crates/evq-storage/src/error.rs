//! Storage error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::block::BlockError;

/// Errors from batch file storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object of {size} bytes exceeds the maximum of {max} bytes")]
    ObjectTooLarge { size: u64, max: u64 },

    #[error("malformed batch {name}: {source}")]
    Format {
        name: String,
        #[source]
        source: BlockError,
    },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("could not allocate a unique file name after {attempts} attempts")]
    NameCollision { attempts: u32 },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the file involved no longer exists (e.g. the OS purged the
    /// cache directory).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// True when a file could not be created because the name is taken.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::Io { source, .. } if source.kind() == std::io::ErrorKind::AlreadyExists)
    }
}

impl From<StorageError> for evq_common::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io { source, .. } => evq_common::Error::Io(source),
            StorageError::ObjectTooLarge { size, max } => {
                evq_common::Error::ObjectTooLarge { size, max }
            }
            StorageError::Format { .. } => evq_common::Error::Format(err.to_string()),
            StorageError::Encryption(msg) => evq_common::Error::Encryption(msg),
            StorageError::NameCollision { .. } => evq_common::Error::Storage(err.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
