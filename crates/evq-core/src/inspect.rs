//! Read-only views of batch directories and files for the `evq` binary.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use evq_common::time::{as_millis, elapsed_between};
use evq_common::{Error, Result};
use evq_config::StoragePerformance;
use evq_storage::file_name::creation_date_from;
use evq_storage::{BlockReader, Directory, TryEventReassembler};
use serde::Serialize;

/// Where a file stands in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    /// Young enough to still receive writes.
    Writable,
    /// Past the write window but not yet old enough to upload.
    Settling,
    Readable,
    /// Will be deleted unread on the next read pass.
    Obsolete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub name: String,
    pub size: u64,
    pub age_ms: u64,
    pub stage: FileStage,
    pub readable: bool,
}

/// Status of every batch file in `path`, oldest first.
pub fn directory_status(
    path: &Path,
    storage: &StoragePerformance,
    now: DateTime<Utc>,
) -> Result<Vec<FileStatus>> {
    let mut files = Directory::new(path).files()?;
    files.sort_by_key(|f| creation_date_from(f.name()));

    files
        .into_iter()
        .map(|file| {
            let age = elapsed_between(creation_date_from(file.name()), now);
            let stage = if age > storage.max_file_age_for_read {
                FileStage::Obsolete
            } else if age >= storage.min_file_age_for_read {
                FileStage::Readable
            } else if age <= storage.max_file_age_for_write {
                FileStage::Writable
            } else {
                FileStage::Settling
            };
            Ok(FileStatus {
                name: file.name().to_string(),
                size: file.size()?,
                age_ms: as_millis(age),
                stage,
                readable: stage == FileStage::Readable,
            })
        })
        .collect()
}

/// One decoded event, payloads hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectedEvent {
    pub index: usize,
    pub data_len: usize,
    pub data_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_hex: Option<String>,
}

/// Decode a batch file. Stops at the first malformed block and reports it
/// as [`Error::Format`] together with the events decoded before it.
pub fn inspect_file(path: &Path) -> Result<(Vec<InspectedEvent>, Option<Error>)> {
    let reader = BlockReader::new(BufReader::new(File::open(path)?));
    let mut events = Vec::new();
    for (index, event) in TryEventReassembler::new(reader).enumerate() {
        match event {
            Ok(event) => events.push(InspectedEvent {
                index,
                data_len: event.data.len(),
                data_hex: hex::encode(&event.data),
                metadata_hex: event.metadata.as_deref().map(hex::encode),
            }),
            Err(e) => {
                return Ok((
                    events,
                    Some(Error::Format(format!("{}: {}", path.display(), e))),
                ))
            }
        }
    }
    Ok((events, None))
}
