//! Appending events to batch files.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::error;

use crate::block::{self, BlockType, BLOCK_HEADER_SIZE};
use crate::encryption::DataEncryption;
use crate::error::{StorageError, StorageResult};
use crate::orchestrator::FilesOrchestrator;

/// Orchestrator shared between a writer, a reader and migrations.
pub type SharedOrchestrator = Arc<Mutex<FilesOrchestrator>>;

pub(crate) fn lock_orchestrator(orchestrator: &SharedOrchestrator) -> MutexGuard<'_, FilesOrchestrator> {
    orchestrator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes one event (and its optional metadata) per call into the file the
/// orchestrator picks.
pub struct FileWriter {
    orchestrator: SharedOrchestrator,
    encryption: Option<Arc<dyn DataEncryption>>,
    force_new_file: bool,
}

impl FileWriter {
    pub fn new(orchestrator: SharedOrchestrator) -> Self {
        Self {
            orchestrator,
            encryption: None,
            force_new_file: false,
        }
    }

    pub fn with_encryption(mut self, encryption: Arc<dyn DataEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Start a new batch for every write instead of reusing files.
    pub fn with_force_new_file(mut self, force_new_file: bool) -> Self {
        self.force_new_file = force_new_file;
        self
    }

    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }

    /// Append `data` (preceded by `metadata` when given) as one write.
    ///
    /// Failures are logged and returned. Nothing is appended when any step
    /// fails, so a batch never holds a metadata block without its event.
    pub fn write(&self, data: &[u8], metadata: Option<&[u8]>) -> StorageResult<()> {
        let result = self.try_write(data, metadata);
        if let Err(e) = &result {
            error!(error = %e, "failed to write data");
        }
        result
    }

    fn try_write(&self, data: &[u8], metadata: Option<&[u8]>) -> StorageResult<()> {
        let event = self.transform(data)?;

        let mut orchestrator = lock_orchestrator(&self.orchestrator);
        let max_object_size = orchestrator.performance().max_object_size;
        let event_size = (BLOCK_HEADER_SIZE + event.len()) as u64;
        if event_size > max_object_size || event.len() > u32::MAX as usize {
            return Err(StorageError::ObjectTooLarge {
                size: event_size,
                max: max_object_size,
            });
        }

        let mut encoded = Vec::with_capacity(event_size as usize);
        if let Some(metadata) = metadata {
            let metadata = self.transform(metadata)?;
            encoded.extend(block::serialize(BlockType::EventMetadata, &metadata));
        }
        encoded.extend(block::serialize(BlockType::Event, &event));

        let write_size = encoded.len() as u64;
        let file = if self.force_new_file {
            orchestrator.get_new_writable_file(write_size)?
        } else {
            orchestrator.get_writable_file(write_size)?
        };
        file.append(&encoded)
    }

    fn transform(&self, value: &[u8]) -> StorageResult<Vec<u8>> {
        match &self.encryption {
            Some(encryption) => encryption
                .encrypt(value)
                .map_err(|e| StorageError::Encryption(e.to_string())),
            None => Ok(value.to_vec()),
        }
    }
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("encrypted", &self.encryption.is_some())
            .field("force_new_file", &self.force_new_file)
            .finish()
    }
}
