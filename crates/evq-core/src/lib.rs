//! evq core library.
//!
//! Runtime pieces built on top of `evq-storage`:
//! - Serial lanes for ordered writes and consent migrations
//! - Per-feature storage wiring (two directories, consent routing)
//! - The upload worker with its delay, conditions and uploader seam
//! - Logging setup and read-only inspection helpers for the `evq` binary

pub mod exit_codes;
pub mod feature;
pub mod inspect;
pub mod lane;
pub mod logging;
pub mod upload;

pub use feature::{FeatureStorage, StorageContext};
pub use lane::Lane;
pub use upload::{
    CycleReport, DataUploadWorker, DataUploader, UploadConditions, UploadDelay, UploadError,
    UploadStatus,
};
