//! Reading batches back for upload.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::block::{BlockError, BlockReader};
use crate::directory::BatchFile;
use crate::encryption::DataEncryption;
use crate::error::{StorageError, StorageResult};
use crate::event::{Event, TryEventReassembler};
use crate::metrics::{RemovalReason, Telemetry};
use crate::writer::{lock_orchestrator, SharedOrchestrator};

/// A readable batch file and the events decoded from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub file: BatchFile,
    pub events: Vec<Event>,
}

impl Batch {
    pub fn name(&self) -> &str {
        self.file.name()
    }
}

/// Hands out readable files and decodes them into [`Batch`]es.
pub struct FileReader {
    orchestrator: SharedOrchestrator,
    encryption: Option<Arc<dyn DataEncryption>>,
    telemetry: Arc<dyn Telemetry>,
    /// Batches already consumed; never returned again even if their
    /// deletion failed. Pruned to the names still on disk on every listing.
    files_read: Mutex<HashSet<String>>,
}

impl FileReader {
    pub fn new(orchestrator: SharedOrchestrator, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            orchestrator,
            encryption: None,
            telemetry,
            files_read: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_encryption(mut self, encryption: Arc<dyn DataEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }

    /// Readable files, oldest first, at most `limit`.
    pub fn read_files(&self, limit: Option<usize>) -> Vec<BatchFile> {
        let orchestrator = lock_orchestrator(&self.orchestrator);
        let excluding = {
            let mut files_read = self.files_read();
            // Names no longer on disk cannot be handed out again.
            if !files_read.is_empty() {
                if let Ok(present) = orchestrator.directory().files() {
                    let present: HashSet<&str> = present.iter().map(|f| f.name()).collect();
                    files_read.retain(|name| present.contains(name.as_str()));
                }
            }
            files_read.clone()
        };
        let result = orchestrator.get_readable_files(&excluding, limit);
        drop(orchestrator);
        match result {
            Ok(files) => files,
            Err(e) => {
                self.telemetry
                    .error("Failed to obtain readable files", Some(&e.to_string()));
                Vec::new()
            }
        }
    }

    /// Decode `file` into a batch.
    ///
    /// Returns `None` when the file is gone. A file that cannot be decoded is
    /// deleted as [`RemovalReason::Invalid`] so it does not block the queue.
    pub fn read_batch(&self, file: &BatchFile) -> Option<Batch> {
        match self.decode(file) {
            Ok(events) => Some(Batch {
                file: file.clone(),
                events,
            }),
            Err(e) if e.is_not_found() => {
                debug!(file = %file.name(), "batch vanished before it was read");
                None
            }
            Err(e) => {
                warn!(file = %file.name(), error = %e, "dropping unreadable batch");
                self.telemetry
                    .error("Failed to read batch", Some(&e.to_string()));
                self.delete(file, RemovalReason::Invalid);
                None
            }
        }
    }

    /// Delete a consumed batch and stop handing it out.
    pub fn mark_batch_as_read(&self, batch: &Batch, reason: RemovalReason) {
        self.delete(&batch.file, reason);
    }

    /// Forget consumed batch names, e.g. after the directory was cleared.
    pub fn reset_files_read(&self) {
        self.files_read().clear();
    }

    fn delete(&self, file: &BatchFile, reason: RemovalReason) {
        if let Err(e) = lock_orchestrator(&self.orchestrator).delete(file, reason) {
            if !e.is_not_found() {
                self.telemetry
                    .error("Failed to delete batch", Some(&e.to_string()));
            }
        }
        self.files_read().insert(file.name().to_string());
    }

    fn decode(&self, file: &BatchFile) -> StorageResult<Vec<Event>> {
        let input = file.open()?;
        let format_error = |source: BlockError| StorageError::Format {
            name: file.name().to_string(),
            source,
        };

        let mut events = Vec::new();
        for event in TryEventReassembler::new(BlockReader::new(input)) {
            let event = event.map_err(format_error)?;
            events.push(self.decrypt(event)?);
        }
        Ok(events)
    }

    fn decrypt(&self, event: Event) -> StorageResult<Event> {
        let Some(encryption) = &self.encryption else {
            return Ok(event);
        };
        let decrypt = |value: &[u8]| {
            encryption
                .decrypt(value)
                .map_err(|e| StorageError::Encryption(e.to_string()))
        };
        Ok(Event {
            data: decrypt(&event.data)?,
            metadata: event.metadata.as_deref().map(decrypt).transpose()?,
        })
    }

    fn files_read(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.files_read
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("encrypted", &self.encryption.is_some())
            .field("files_read", &self.files_read().len())
            .finish()
    }
}
