//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::preset::PerformancePreset;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

impl From<ValidationError> for evq_common::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::SemanticError(_) | ValidationError::InvalidValue { .. } => {
                evq_common::Error::InvalidProfile(err.to_string())
            }
            other => evq_common::Error::Config(other.to_string()),
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate a performance preset semantically.
///
/// The read/write age ordering is the only thing preventing the upload worker
/// from reading a file the writer may still append to, so it is rejected
/// outright rather than clamped.
pub fn validate_preset(preset: &PerformancePreset) -> ValidationResult<()> {
    let storage = &preset.storage;
    let upload = &preset.upload;

    if storage.max_file_size == 0 {
        return Err(invalid("max_file_size", "must be greater than 0"));
    }
    if storage.max_object_size == 0 {
        return Err(invalid("max_object_size", "must be greater than 0"));
    }
    if storage.max_objects_in_file == 0 {
        return Err(invalid("max_objects_in_file", "must be greater than 0"));
    }
    if storage.max_object_size > storage.max_file_size {
        return Err(ValidationError::SemanticError(format!(
            "max_object_size ({}) exceeds max_file_size ({})",
            storage.max_object_size, storage.max_file_size
        )));
    }
    if storage.max_file_size > storage.max_directory_size {
        return Err(ValidationError::SemanticError(format!(
            "max_file_size ({}) exceeds max_directory_size ({})",
            storage.max_file_size, storage.max_directory_size
        )));
    }
    if storage.min_file_age_for_read <= storage.max_file_age_for_write {
        return Err(ValidationError::SemanticError(format!(
            "min_file_age_for_read ({:?}) must be greater than max_file_age_for_write ({:?})",
            storage.min_file_age_for_read, storage.max_file_age_for_write
        )));
    }
    if storage.max_file_age_for_read <= storage.min_file_age_for_read {
        return Err(ValidationError::SemanticError(format!(
            "max_file_age_for_read ({:?}) must be greater than min_file_age_for_read ({:?})",
            storage.max_file_age_for_read, storage.min_file_age_for_read
        )));
    }

    if upload.min_upload_delay > upload.max_upload_delay {
        return Err(ValidationError::SemanticError(format!(
            "min_upload_delay ({:?}) exceeds max_upload_delay ({:?})",
            upload.min_upload_delay, upload.max_upload_delay
        )));
    }
    if !(0.0..1.0).contains(&upload.upload_delay_change_rate) {
        return Err(invalid(
            "upload_delay_change_rate",
            format!(
                "must be in [0, 1), got {}",
                upload.upload_delay_change_rate
            ),
        ));
    }
    if upload.max_batches_per_upload == 0 {
        return Err(invalid("max_batches_per_upload", "must be greater than 0"));
    }

    Ok(())
}
