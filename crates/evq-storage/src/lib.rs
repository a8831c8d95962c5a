//! evq batch storage.
//!
//! Events are appended to batch files as TLV blocks. A [`FilesOrchestrator`]
//! owns one directory and decides which file to write to, which files are
//! ready for upload and which must be purged. Two orchestrators (unauthorized
//! and authorized) sit behind a [`ConsentAwareWriter`], which routes writes by
//! tracking consent and migrates pending data when consent is decided.
//!
//! # Modules
//!
//! - [`block`]: TLV block codec
//! - [`event`]: event reassembly from blocks
//! - [`directory`]: directory and batch file access
//! - [`orchestrator`]: batch file lifecycle
//! - [`metrics`]: batch deleted/closed metrics and telemetry sinks
//! - [`writer`], [`reader`]: appending events and reading batches
//! - [`consent`]: consent routing and data migration
//! - [`encryption`]: at-rest transform seam

pub mod block;
pub mod consent;
pub mod directory;
pub mod encryption;
pub mod error;
pub mod event;
pub mod file_name;
pub mod metrics;
pub mod orchestrator;
pub mod reader;
pub mod writer;

pub use block::{Block, BlockError, BlockReader, BlockType};
pub use consent::{ConsentAwareWriter, DataMigration};
pub use directory::{BatchFile, Directory};
pub use encryption::{DataEncryption, EncryptionError};
pub use error::{StorageError, StorageResult};
pub use event::{Event, EventReassembler, TryEventReassembler};
pub use metrics::{
    BatchClosedMetric, BatchDeletedMetric, BatchMetric, InMemoryTelemetry, MetricsData,
    NoopTelemetry, RemovalReason, Telemetry, TracingTelemetry,
};
pub use orchestrator::FilesOrchestrator;
pub use reader::{Batch, FileReader};
pub use writer::{FileWriter, SharedOrchestrator};
