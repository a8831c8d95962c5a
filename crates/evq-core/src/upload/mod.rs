//! Background upload of authorized batches.
//!
//! One [`DataUploadWorker`] per feature runs on its own thread:
//!
//! 1. wait for the current delay (interruptible by cancellation)
//! 2. skip the cycle if [`UploadConditions`] report blockers
//! 3. read up to `max_batches_per_upload` readable batches, oldest first
//! 4. hand each to the [`DataUploader`] and act on its [`UploadStatus`];
//!    a retryable failure keeps the batch and ends the cycle
//! 5. shrink the delay when batches were delivered or rejected and none was
//!    kept, grow it otherwise
//!
//! The worker only reads and deletes files. It never appends.

pub mod conditions;
pub mod delay;
pub mod uploader;

pub use conditions::{
    AlwaysUpload, BatteryState, BatteryStatus, BatteryStatusProvider, NetworkStatusProvider,
    Reachability, SystemUploadConditions, UploadBlocker, UploadConditions,
};
pub use delay::UploadDelay;
pub use uploader::{DataUploader, UploadError, UploadStatus};

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use evq_common::Result;
use evq_config::UploadPerformance;
use evq_storage::{FileReader, RemovalReason, Telemetry};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What one upload cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    /// Non-empty when the cycle was skipped.
    pub blockers: Vec<UploadBlocker>,
    pub batches_found: usize,
    /// Accepted by the intake and deleted.
    pub delivered: usize,
    /// Rejected for good by the intake and deleted.
    pub rejected: usize,
    /// Kept for a later cycle after a retryable failure.
    pub retained: usize,
    /// Deleted because the upload could not be initiated.
    pub dropped: usize,
    #[serde(with = "duration_ms")]
    pub next_delay: Duration,
}

struct Shared {
    feature: String,
    reader: Arc<FileReader>,
    uploader: Arc<dyn DataUploader>,
    conditions: Arc<dyn UploadConditions>,
    telemetry: Arc<dyn Telemetry>,
    max_batches_per_upload: usize,
    delay: Mutex<UploadDelay>,
    cancelled: Mutex<bool>,
    wakeup: Condvar,
    /// Held for the whole of a cycle or a flush, so they never overlap.
    cycle: Mutex<()>,
}

/// Periodic uploader for one feature's authorized directory.
pub struct DataUploadWorker {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DataUploadWorker {
    /// Build the worker without starting its thread.
    pub fn new(
        feature: impl Into<String>,
        reader: Arc<FileReader>,
        uploader: Arc<dyn DataUploader>,
        conditions: Arc<dyn UploadConditions>,
        telemetry: Arc<dyn Telemetry>,
        performance: &UploadPerformance,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                feature: feature.into(),
                reader,
                uploader,
                conditions,
                telemetry,
                max_batches_per_upload: performance.max_batches_per_upload,
                delay: Mutex::new(UploadDelay::new(performance)),
                cancelled: Mutex::new(false),
                wakeup: Condvar::new(),
                cycle: Mutex::new(()),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Start the background loop. The first cycle runs after the initial
    /// delay. Calling it twice has no effect.
    pub fn start(&self) -> Result<()> {
        let mut thread = lock(&self.thread);
        if thread.is_some() {
            return Ok(());
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("evq-upload-{}", shared.feature))
            .spawn(move || run_loop(&shared))?;
        *thread = Some(handle);
        Ok(())
    }

    pub fn current_delay(&self) -> Duration {
        lock(&self.shared.delay).current()
    }

    /// Run one cycle on the calling thread.
    pub fn perform_upload_cycle(&self) -> CycleReport {
        self.shared.perform_cycle()
    }

    /// Stop the loop. An upload already in progress finishes first; no
    /// further cycle starts afterwards.
    pub fn cancel_synchronously(&self) {
        *lock(&self.shared.cancelled) = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = lock(&self.thread).take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        info!(feature = %self.shared.feature, "upload worker stopped");
    }

    /// Upload every batch now, ignoring conditions and file age.
    ///
    /// Each batch gets one retry when the first attempt fails, then is
    /// deleted whatever the outcome. Deletions carry the `flushed` reason,
    /// which is never reported as a metric. Returns the number of batches
    /// processed.
    pub fn flush_synchronously(&self) -> usize {
        self.shared.flush()
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.shared.cancelled)
    }
}

impl Drop for DataUploadWorker {
    fn drop(&mut self) {
        *lock(&self.shared.cancelled) = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = lock(&self.thread).take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for DataUploadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataUploadWorker")
            .field("feature", &self.shared.feature)
            .field("delay", &self.current_delay())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn run_loop(shared: &Shared) {
    debug!(feature = %shared.feature, "upload worker started");
    loop {
        let wait = lock(&shared.delay).current();
        {
            let cancelled = lock(&shared.cancelled);
            let (cancelled, _) = shared
                .wakeup
                .wait_timeout_while(cancelled, wait, |cancelled| !*cancelled)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *cancelled {
                break;
            }
        }
        shared.perform_cycle();
    }
}

impl Shared {
    fn perform_cycle(&self) -> CycleReport {
        let _cycle = lock(&self.cycle);

        let blockers = self.conditions.blockers_for_upload();
        let mut report = CycleReport {
            blockers,
            batches_found: 0,
            delivered: 0,
            rejected: 0,
            retained: 0,
            dropped: 0,
            next_delay: Duration::ZERO,
        };

        if report.blockers.is_empty() {
            let files = self.reader.read_files(Some(self.max_batches_per_upload));
            report.batches_found = files.len();
            for file in files {
                let Some(batch) = self.reader.read_batch(&file) else {
                    continue;
                };
                debug!(
                    feature = %self.feature,
                    batch = %batch.name(),
                    events = batch.events.len(),
                    "uploading batch"
                );

                match self.uploader.upload(&batch.events) {
                    Ok(UploadStatus::Success { response_code }) => {
                        self.reader
                            .mark_batch_as_read(&batch, RemovalReason::IntakeCode(response_code));
                        report.delivered += 1;
                    }
                    Ok(UploadStatus::NonRetryableFailure {
                        response_code,
                        reason,
                    }) => {
                        warn!(
                            feature = %self.feature,
                            batch = %batch.name(),
                            code = response_code,
                            reason = %reason,
                            "batch rejected, not retrying"
                        );
                        self.telemetry.error(
                            "Data upload finished with status code",
                            Some(&response_code.to_string()),
                        );
                        self.reader
                            .mark_batch_as_read(&batch, RemovalReason::IntakeCode(response_code));
                        report.rejected += 1;
                    }
                    Ok(UploadStatus::RetryableFailure {
                        response_code,
                        reason,
                    }) => {
                        debug!(
                            feature = %self.feature,
                            batch = %batch.name(),
                            code = ?response_code,
                            reason = %reason,
                            "batch not delivered, will retry"
                        );
                        match response_code {
                            Some(code) => self.telemetry.error(
                                "Data upload finished with status code",
                                Some(&code.to_string()),
                            ),
                            None => self
                                .telemetry
                                .error("Data upload finished with error", Some(&reason)),
                        }
                        report.retained += 1;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            feature = %self.feature,
                            batch = %batch.name(),
                            error = %e,
                            "dropping batch"
                        );
                        self.telemetry
                            .error("Failed to initiate data upload", Some(&e.to_string()));
                        self.reader.mark_batch_as_read(&batch, RemovalReason::Invalid);
                        report.dropped += 1;
                    }
                }
            }
        } else {
            let reasons: Vec<String> = report.blockers.iter().map(|b| b.to_string()).collect();
            debug!(feature = %self.feature, blockers = %reasons.join(" and "), "upload skipped");
        }

        let mut delay = lock(&self.delay);
        // Rejected batches are deleted too.
        if report.delivered + report.rejected > 0 && report.retained == 0 {
            delay.decrease();
        } else {
            delay.increase();
        }
        report.next_delay = delay.current();
        drop(delay);

        if report.batches_found > 0 {
            info!(
                feature = %self.feature,
                found = report.batches_found,
                delivered = report.delivered,
                rejected = report.rejected,
                retained = report.retained,
                dropped = report.dropped,
                next_delay_ms = report.next_delay.as_millis() as u64,
                "upload cycle finished"
            );
        }
        report
    }

    fn flush(&self) -> usize {
        let _cycle = lock(&self.cycle);
        let orchestrator = self.reader.orchestrator();
        let previous = {
            let mut guard = orchestrator
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let previous = guard.ignore_file_age_when_reading();
            guard.set_ignore_file_age_when_reading(true);
            previous
        };

        let mut processed = 0;
        for file in self.reader.read_files(None) {
            let Some(batch) = self.reader.read_batch(&file) else {
                continue;
            };
            let delivered = |result: &std::result::Result<UploadStatus, UploadError>| {
                matches!(result, Ok(status) if !status.needs_retry())
            };
            let first = self.uploader.upload(&batch.events);
            if !delivered(&first) {
                let _ = self.uploader.upload(&batch.events);
            }
            self.reader.mark_batch_as_read(&batch, RemovalReason::Flushed);
            processed += 1;
        }

        orchestrator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_ignore_file_age_when_reading(previous);
        info!(feature = %self.feature, batches = processed, "flushed");
        processed
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}
