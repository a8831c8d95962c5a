//! Lifecycle of the batch files in one directory.
//!
//! The orchestrator decides which file a write goes to, which files are
//! ready to be read, and which files must go:
//!
//! - a file is reused for writing while it is young enough, has room for the
//!   write and has not reached its object limit
//! - a new file is only created after the directory has been purged back under
//!   its size budget (oldest first)
//! - files past `max_file_age_for_read` are deleted as obsolete whenever the
//!   readable set is computed
//! - files younger than `min_file_age_for_read` are never handed to a reader
//!
//! Every deletion and every closed batch is reported as a [`BatchMetric`]
//! when the orchestrator carries [`MetricsData`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evq_common::time::{as_millis, elapsed_between};
use evq_common::{AppStateCell, DateProvider};
use evq_config::StoragePerformance;
use tracing::{debug, info};

use crate::directory::{BatchFile, Directory};
use crate::error::{StorageError, StorageResult};
use crate::file_name::{creation_date_from, nanos_since_epoch};
use crate::metrics::{
    BatchClosedMetric, BatchDeletedMetric, BatchMetric, MetricsData, RemovalReason, Telemetry,
    UploaderDelay,
};

/// Attempts at finding a free file name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 16;

/// Bookkeeping for the file currently receiving writes.
#[derive(Debug, Clone)]
struct WritableBatch {
    name: String,
    objects_count: u64,
    /// Sum of requested write sizes; not re-read from disk.
    approximate_size: u64,
}

/// Manages the batch files of a single directory.
pub struct FilesOrchestrator {
    directory: Directory,
    performance: StoragePerformance,
    date_provider: Arc<dyn DateProvider>,
    telemetry: Arc<dyn Telemetry>,
    metrics_data: Option<MetricsData>,
    app_state: Arc<AppStateCell>,
    last_writable: Option<WritableBatch>,
    ignore_file_age_when_reading: bool,
}

impl FilesOrchestrator {
    pub fn new(
        directory: Directory,
        performance: StoragePerformance,
        date_provider: Arc<dyn DateProvider>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            directory,
            performance,
            date_provider,
            telemetry,
            metrics_data: None,
            app_state: Arc::new(AppStateCell::default()),
            last_writable: None,
            ignore_file_age_when_reading: false,
        }
    }

    /// Report batch metrics under this identity.
    pub fn with_metrics_data(mut self, metrics_data: MetricsData) -> Self {
        self.metrics_data = Some(metrics_data);
        self
    }

    /// Share the host's foreground/background state with deletion metrics.
    pub fn with_app_state(mut self, app_state: Arc<AppStateCell>) -> Self {
        self.app_state = app_state;
        self
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn performance(&self) -> &StoragePerformance {
        &self.performance
    }

    pub fn ignore_file_age_when_reading(&self) -> bool {
        self.ignore_file_age_when_reading
    }

    /// When set, readable files are returned regardless of their minimum age.
    /// Used by synchronous flushes.
    pub fn set_ignore_file_age_when_reading(&mut self, ignore: bool) {
        self.ignore_file_age_when_reading = ignore;
    }

    // Writing

    /// File that can take `write_size` more bytes, reusing the current one
    /// when possible. Object size limits are enforced by the writer.
    pub fn get_writable_file(&mut self, write_size: u64) -> StorageResult<BatchFile> {
        if let Some(file) = self.reuse_last_writable_file(write_size) {
            if let Some(last) = self.last_writable.as_mut() {
                last.objects_count += 1;
                last.approximate_size += write_size;
            }
            return Ok(file);
        }

        self.close_current_batch(false);
        self.create_new_writable_file(write_size)
    }

    /// Always start a new file, closing the current batch as forced.
    pub fn get_new_writable_file(&mut self, write_size: u64) -> StorageResult<BatchFile> {
        self.close_current_batch(true);
        self.create_new_writable_file(write_size)
    }

    fn reuse_last_writable_file(&self, write_size: u64) -> Option<BatchFile> {
        let last = self.last_writable.as_ref()?;
        if !self.directory.has_file(&last.name) {
            // Deleted by a reader, a purge or the OS.
            return None;
        }

        let file = self.directory.file(&last.name);
        let size = match file.size() {
            Ok(size) => size,
            Err(e) => {
                self.telemetry
                    .error("Failed to reuse last writable file", Some(&e.to_string()));
                return None;
            }
        };

        let age = elapsed_between(creation_date_from(&last.name), self.now());
        let recent_enough = age <= self.performance.max_file_age_for_write;
        let has_room = size.saturating_add(write_size) <= self.performance.max_file_size;
        let can_take_more = last.objects_count < self.performance.max_objects_in_file;

        (recent_enough && has_room && can_take_more).then_some(file)
    }

    fn create_new_writable_file(&mut self, write_size: u64) -> StorageResult<BatchFile> {
        // Purging lists the whole directory, so it only runs when a new file
        // is about to be created.
        self.purge_directory_if_needed()?;

        let mut nanos = nanos_since_epoch(self.now());
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = nanos.to_string();
            match self.directory.create_file(&name) {
                Ok(file) => {
                    debug!(
                        directory = %self.directory.path().display(),
                        file = %name,
                        "created batch file"
                    );
                    self.last_writable = Some(WritableBatch {
                        name,
                        objects_count: 1,
                        approximate_size: write_size,
                    });
                    return Ok(file);
                }
                // Another process created a batch in the same nanosecond.
                Err(e) if e.is_already_exists() => nanos = nanos.saturating_add(1),
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::NameCollision {
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    fn close_current_batch(&mut self, forced_new: bool) {
        if let Some(last) = self.last_writable.take() {
            self.send_batch_closed_metric(&last, forced_new);
        }
    }

    // Reading

    /// Files ready to be read, oldest first.
    ///
    /// Obsolete files are deleted on the way. Files named in `excluding` and
    /// files younger than `min_file_age_for_read` are skipped.
    pub fn get_readable_files(
        &self,
        excluding: &HashSet<String>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<BatchFile>> {
        let now = self.now();
        let mut candidates = Vec::new();

        for file in self.directory.files()? {
            let created = creation_date_from(file.name());
            if elapsed_between(created, now) > self.performance.max_file_age_for_read {
                self.delete_obsolete(&file)?;
                continue;
            }
            if excluding.contains(file.name()) {
                continue;
            }
            candidates.push((created, file));
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name().cmp(b.1.name())));

        let readable = candidates
            .into_iter()
            .filter(|(created, _)| {
                self.ignore_file_age_when_reading
                    || elapsed_between(*created, now) >= self.performance.min_file_age_for_read
            })
            .map(|(_, file)| file)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        Ok(readable)
    }

    /// Oldest readable file, if any.
    pub fn get_readable_file(&self, excluding: &HashSet<String>) -> StorageResult<Option<BatchFile>> {
        Ok(self.get_readable_files(excluding, Some(1))?.into_iter().next())
    }

    fn delete_obsolete(&self, file: &BatchFile) -> StorageResult<()> {
        match file.delete() {
            Ok(()) => {
                info!(file = %file.name(), "deleted obsolete batch");
                self.send_batch_deleted_metric(file, RemovalReason::Obsolete);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // Deleting

    /// Delete a batch and report why.
    pub fn delete(&self, file: &BatchFile, reason: RemovalReason) -> StorageResult<()> {
        file.delete()?;
        debug!(file = %file.name(), reason = %reason, "deleted batch");
        self.send_batch_deleted_metric(file, reason);
        Ok(())
    }

    fn purge_directory_if_needed(&self) -> StorageResult<()> {
        let mut files = Vec::new();
        for file in self.directory.files()? {
            let size = match file.size() {
                Ok(size) => size,
                // Consumed by the reader since the listing.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            files.push((creation_date_from(file.name()), size, file));
        }

        let total: u64 = files.iter().map(|(_, size, _)| size).sum();
        if total <= self.performance.max_directory_size {
            return Ok(());
        }

        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.name().cmp(b.2.name())));

        let to_free = total - self.performance.max_directory_size;
        let mut freed = 0u64;
        for (_, size, file) in files {
            if freed >= to_free {
                break;
            }
            match file.delete() {
                Ok(()) => self.send_batch_deleted_metric(&file, RemovalReason::Purged),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            freed += size;
        }

        info!(
            directory = %self.directory.path().display(),
            total_bytes = total,
            freed_bytes = freed,
            budget_bytes = self.performance.max_directory_size,
            "purged batch directory"
        );
        Ok(())
    }

    // Metrics

    fn send_batch_deleted_metric(&self, file: &BatchFile, reason: RemovalReason) {
        let Some(metrics_data) = &self.metrics_data else {
            return;
        };
        if !reason.include_in_metric() {
            return;
        }

        let batch_age = elapsed_between(creation_date_from(file.name()), self.now());
        self.telemetry
            .metric(BatchMetric::Deleted(BatchDeletedMetric {
                track: metrics_data.track_name.clone(),
                consent: metrics_data.consent_label,
                uploader_delay: UploaderDelay {
                    min: as_millis(metrics_data.uploader_delay_min),
                    max: as_millis(metrics_data.uploader_delay_max),
                },
                uploader_window: as_millis(self.performance.uploader_window()),
                in_background: self.app_state.is_in_background(),
                batch_age: as_millis(batch_age),
                batch_removal_reason: reason,
            }));
    }

    fn send_batch_closed_metric(&self, batch: &WritableBatch, forced_new: bool) {
        let Some(metrics_data) = &self.metrics_data else {
            return;
        };

        let duration = elapsed_between(creation_date_from(&batch.name), self.now());
        self.telemetry.metric(BatchMetric::Closed(BatchClosedMetric {
            track: metrics_data.track_name.clone(),
            uploader_window: as_millis(self.performance.uploader_window()),
            batch_size: batch.approximate_size,
            batch_events_count: batch.objects_count,
            batch_duration: as_millis(duration),
            forced_new,
        }));
    }

    fn now(&self) -> DateTime<Utc> {
        self.date_provider.now()
    }
}

impl std::fmt::Debug for FilesOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesOrchestrator")
            .field("directory", &self.directory)
            .field("performance", &self.performance)
            .field("metrics_data", &self.metrics_data)
            .field("last_writable", &self.last_writable)
            .field("ignore_file_age_when_reading", &self.ignore_file_age_when_reading)
            .finish()
    }
}
