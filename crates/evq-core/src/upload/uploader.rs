//! Seam to the network transport.

use evq_storage::Event;
use thiserror::Error;

/// Outcome of delivering one batch, as classified by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// Accepted by the intake.
    Success { response_code: u16 },
    /// Not delivered; the batch is kept and retried in a later cycle.
    RetryableFailure {
        response_code: Option<u16>,
        reason: String,
    },
    /// Rejected for good; the batch is deleted so it cannot block the queue.
    NonRetryableFailure { response_code: u16, reason: String },
}

impl UploadStatus {
    pub fn needs_retry(&self) -> bool {
        matches!(self, UploadStatus::RetryableFailure { .. })
    }

    pub fn response_code(&self) -> Option<u16> {
        match self {
            UploadStatus::Success { response_code }
            | UploadStatus::NonRetryableFailure { response_code, .. } => Some(*response_code),
            UploadStatus::RetryableFailure { response_code, .. } => *response_code,
        }
    }

    /// Classify an HTTP status code the way intakes answer.
    ///
    /// 2xx is success; 408, 429 and 5xx are retryable; any other code is a
    /// permanent rejection.
    pub fn from_http_status(code: u16) -> Self {
        match code {
            200..=299 => UploadStatus::Success {
                response_code: code,
            },
            408 | 429 | 500..=599 => UploadStatus::RetryableFailure {
                response_code: Some(code),
                reason: format!("intake answered {}", code),
            },
            _ => UploadStatus::NonRetryableFailure {
                response_code: code,
                reason: format!("intake rejected the batch with {}", code),
            },
        }
    }
}

/// The upload could not even be attempted (e.g. the request could not be
/// built). The batch is dropped.
#[derive(Error, Debug)]
#[error("upload could not be initiated: {message}")]
pub struct UploadError {
    pub message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<UploadError> for evq_common::Error {
    fn from(err: UploadError) -> Self {
        evq_common::Error::UploadNotInitiated(err.message)
    }
}

/// Delivers one batch of events.
pub trait DataUploader: Send + Sync {
    fn upload(&self, events: &[Event]) -> Result<UploadStatus, UploadError>;
}
