//! No-mock integration tests for the upload worker.
//!
//! Each test wires a real [`FeatureStorage`] under a temp dir, driven by a
//! manual clock, and a scripted uploader standing in for the network:
//! - delete on success and on permanent rejection, keep on retryable failure
//! - delay backoff in both directions
//! - blocked upload conditions
//! - synchronous flush and cancellation
//! - pending data reaching the intake once consent is granted

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use evq_common::{ConsentProvider, ManualDateProvider, TrackingConsent};
use evq_config::{PerformancePreset, StoragePerformance, UploadPerformance};
use evq_core::upload::UploadBlocker;
use evq_core::{
    DataUploader, FeatureStorage, StorageContext, UploadConditions, UploadError, UploadStatus,
};
use evq_storage::{Directory, Event, InMemoryTelemetry, RemovalReason};
use tempfile::{tempdir, TempDir};

const MB: u64 = 1024 * 1024;

// ============================================================================
// Fixture
// ============================================================================

enum Scripted {
    Status(UploadStatus),
    NotInitiated(&'static str),
}

/// Answers from a script, then with success (202) once the script runs out.
#[derive(Default)]
struct ScriptedUploader {
    script: Mutex<VecDeque<Scripted>>,
    received: Mutex<Vec<Vec<Event>>>,
}

impl ScriptedUploader {
    fn with_script(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            received: Mutex::default(),
        }
    }

    fn calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    fn payloads(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|e| e.data.clone())
            .collect()
    }
}

impl DataUploader for ScriptedUploader {
    fn upload(&self, events: &[Event]) -> Result<UploadStatus, UploadError> {
        self.received.lock().unwrap().push(events.to_vec());
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Status(status)) => Ok(status),
            Some(Scripted::NotInitiated(message)) => Err(UploadError::new(message)),
            None => Ok(UploadStatus::Success { response_code: 202 }),
        }
    }
}

#[derive(Default)]
struct Switch(Mutex<bool>);

impl UploadConditions for Switch {
    fn blockers_for_upload(&self) -> Vec<UploadBlocker> {
        if *self.0.lock().unwrap() {
            vec![UploadBlocker::LowPowerModeOn]
        } else {
            Vec::new()
        }
    }
}

struct Harness {
    _tmp: TempDir,
    clock: Arc<ManualDateProvider>,
    telemetry: Arc<InMemoryTelemetry>,
    consent: ConsentProvider,
    storage: FeatureStorage,
}

fn preset(upload_delay: Duration) -> PerformancePreset {
    PerformancePreset {
        storage: StoragePerformance {
            max_file_size: 4 * MB,
            max_directory_size: 512 * MB,
            max_file_age_for_write: Duration::from_millis(500),
            min_file_age_for_read: Duration::from_secs(1),
            max_file_age_for_read: Duration::from_secs(3600),
            max_objects_in_file: 1,
            max_object_size: MB,
        },
        upload: UploadPerformance {
            initial_upload_delay: upload_delay,
            min_upload_delay: upload_delay / 10,
            max_upload_delay: upload_delay * 5,
            upload_delay_change_rate: 0.1,
            max_batches_per_upload: 2,
        },
    }
}

impl Harness {
    fn new(initial: TrackingConsent) -> Self {
        Self::with_preset(initial, preset(Duration::from_secs(1)))
    }

    fn with_preset(initial: TrackingConsent, preset: PerformancePreset) -> Self {
        let tmp = tempdir().expect("tempdir");
        let clock = Arc::new(ManualDateProvider::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ));
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let consent = ConsentProvider::new(initial);
        let context = StorageContext::new(clock.clone(), telemetry.clone());
        let storage = FeatureStorage::new("rum", tmp.path(), &preset, &consent, &context)
            .expect("feature storage");
        Self {
            _tmp: tmp,
            clock,
            telemetry,
            consent,
            storage,
        }
    }

    /// Write one batch per event and make them old enough to read.
    fn write_ready(&self, events: &[&[u8]]) {
        for event in events {
            self.storage.write(event.to_vec(), None).unwrap();
        }
        self.storage.sync().unwrap();
        self.clock.advance(Duration::from_secs(2));
    }

    fn authorized_files(&self) -> usize {
        Directory::new(self.storage.authorized_path())
            .files()
            .unwrap()
            .len()
    }

    fn unauthorized_files(&self) -> usize {
        Directory::new(self.storage.unauthorized_path())
            .files()
            .unwrap()
            .len()
    }

    fn removal_reasons(&self) -> Vec<RemovalReason> {
        self.telemetry
            .deleted()
            .into_iter()
            .map(|m| m.batch_removal_reason)
            .collect()
    }
}

fn always() -> Arc<Switch> {
    Arc::new(Switch::default())
}

// ============================================================================
// Upload outcomes
// ============================================================================

#[test]
fn delivered_batches_are_deleted_oldest_first() {
    let h = Harness::new(TrackingConsent::Granted);
    h.write_ready(&[b"first", b"second", b"third"]);
    let uploader = Arc::new(ScriptedUploader::default());
    let worker = h.storage.upload_worker(uploader.clone(), always());

    let report = worker.perform_upload_cycle();
    assert_eq!(report.batches_found, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(h.authorized_files(), 1);
    assert_eq!(uploader.payloads(), vec![b"first".to_vec(), b"second".to_vec()]);

    let report = worker.perform_upload_cycle();
    assert_eq!(report.delivered, 1);
    assert_eq!(h.authorized_files(), 0);
    assert_eq!(
        h.removal_reasons(),
        vec![RemovalReason::IntakeCode(202); 3]
    );
}

#[test]
fn retryable_failure_keeps_the_batch_and_ends_the_cycle() {
    let h = Harness::new(TrackingConsent::Granted);
    h.write_ready(&[b"a", b"b"]);
    let uploader = Arc::new(ScriptedUploader::with_script(vec![Scripted::Status(
        UploadStatus::RetryableFailure {
            response_code: Some(503),
            reason: "unavailable".into(),
        },
    )]));
    let worker = h.storage.upload_worker(uploader.clone(), always());

    let report = worker.perform_upload_cycle();
    assert_eq!(report.retained, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(uploader.calls(), 1);
    assert_eq!(h.authorized_files(), 2);
    assert!(h.telemetry.deleted().is_empty());

    // The kept batch comes back first on the next cycle.
    let report = worker.perform_upload_cycle();
    assert_eq!(report.delivered, 2);
    assert_eq!(
        uploader.payloads(),
        vec![b"a".to_vec(), b"a".to_vec(), b"b".to_vec()]
    );
    assert_eq!(h.authorized_files(), 0);
}

#[test]
fn permanent_rejection_deletes_with_the_intake_code() {
    let h = Harness::new(TrackingConsent::Granted);
    h.write_ready(&[b"bad", b"next"]);
    let uploader = Arc::new(ScriptedUploader::with_script(vec![Scripted::Status(
        UploadStatus::from_http_status(400),
    )]));
    let worker = h.storage.upload_worker(uploader.clone(), always());

    let report = worker.perform_upload_cycle();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(uploader.calls(), 2);
    assert_eq!(h.authorized_files(), 0);
    assert_eq!(
        h.removal_reasons(),
        vec![RemovalReason::IntakeCode(400), RemovalReason::IntakeCode(202)]
    );
    assert_eq!(report.next_delay.as_millis(), 900);
    assert!(h
        .telemetry
        .errors()
        .iter()
        .any(|e| e.contains("400")));
}

#[test]
fn upload_that_cannot_start_drops_the_batch_as_invalid() {
    let h = Harness::new(TrackingConsent::Granted);
    h.write_ready(&[b"x"]);
    let uploader = Arc::new(ScriptedUploader::with_script(vec![Scripted::NotInitiated(
        "no request",
    )]));
    let worker = h.storage.upload_worker(uploader, always());

    let report = worker.perform_upload_cycle();
    assert_eq!(report.dropped, 1);
    assert_eq!(h.authorized_files(), 0);
    assert_eq!(h.removal_reasons(), vec![RemovalReason::Invalid]);
    // Nothing was delivered, so the worker backs off.
    assert_eq!(report.next_delay.as_millis(), 1100);
}

#[test]
fn young_batches_are_not_uploaded() {
    let h = Harness::new(TrackingConsent::Granted);
    h.storage.write(b"fresh".to_vec(), None).unwrap();
    h.storage.sync().unwrap();
    let uploader = Arc::new(ScriptedUploader::default());
    let worker = h.storage.upload_worker(uploader.clone(), always());

    let report = worker.perform_upload_cycle();
    assert_eq!(report.batches_found, 0);
    assert_eq!(uploader.calls(), 0);
    assert_eq!(h.authorized_files(), 1);
}

// ============================================================================
// Delay
// ============================================================================

#[test]
fn delay_shrinks_on_delivery_and_grows_otherwise() {
    let h = Harness::new(TrackingConsent::Granted);
    let uploader = Arc::new(ScriptedUploader::default());
    let worker = h.storage.upload_worker(uploader, always());
    assert_eq!(worker.current_delay(), Duration::from_secs(1));

    // Empty directory.
    let report = worker.perform_upload_cycle();
    assert_eq!(report.next_delay.as_millis(), 1100);

    h.write_ready(&[b"a"]);
    let report = worker.perform_upload_cycle();
    assert_eq!(report.next_delay.as_millis(), 990);
    assert_eq!(worker.current_delay(), report.next_delay);
}

#[test]
fn delay_stays_within_bounds() {
    let h = Harness::new(TrackingConsent::Granted);
    let worker = h
        .storage
        .upload_worker(Arc::new(ScriptedUploader::default()), always());

    for _ in 0..100 {
        worker.perform_upload_cycle();
    }
    assert_eq!(worker.current_delay(), Duration::from_secs(5));
}

#[test]
fn blocked_conditions_skip_the_cycle() {
    let h = Harness::new(TrackingConsent::Granted);
    h.write_ready(&[b"waiting"]);
    let uploader = Arc::new(ScriptedUploader::default());
    let conditions = Arc::new(Switch(Mutex::new(true)));
    let worker = h.storage.upload_worker(uploader.clone(), conditions.clone());

    let report = worker.perform_upload_cycle();
    assert_eq!(report.blockers, vec![UploadBlocker::LowPowerModeOn]);
    assert_eq!(report.batches_found, 0);
    assert_eq!(uploader.calls(), 0);
    assert_eq!(h.authorized_files(), 1);
    assert_eq!(report.next_delay.as_millis(), 1100);

    *conditions.0.lock().unwrap() = false;
    assert_eq!(worker.perform_upload_cycle().delivered, 1);
}

// ============================================================================
// Flush and cancellation
// ============================================================================

#[test]
fn flush_uploads_everything_and_retries_once() {
    let h = Harness::new(TrackingConsent::Granted);
    for event in [b"1", b"2", b"3"] {
        h.storage.write(event.to_vec(), None).unwrap();
    }
    h.storage.sync().unwrap();
    let uploader = Arc::new(ScriptedUploader::with_script(vec![
        Scripted::Status(UploadStatus::RetryableFailure {
            response_code: None,
            reason: "offline".into(),
        }),
        Scripted::Status(UploadStatus::RetryableFailure {
            response_code: None,
            reason: "offline".into(),
        }),
    ]));
    // Conditions are ignored by a flush.
    let worker = h
        .storage
        .upload_worker(uploader.clone(), Arc::new(Switch(Mutex::new(true))));

    assert_eq!(worker.flush_synchronously(), 3);
    assert_eq!(uploader.calls(), 4);
    assert_eq!(h.authorized_files(), 0);
    assert!(h.removal_reasons().is_empty());
    assert!(!h
        .storage
        .authorized_orchestrator()
        .lock()
        .unwrap()
        .ignore_file_age_when_reading());
}

#[test]
fn cancelled_worker_stops_uploading() {
    let h = Harness::with_preset(
        TrackingConsent::Granted,
        preset(Duration::from_millis(20)),
    );
    let uploader = Arc::new(ScriptedUploader::default());
    let worker = h.storage.upload_worker(uploader.clone(), always());
    worker.start().unwrap();
    worker.cancel_synchronously();
    assert!(worker.is_cancelled());

    h.write_ready(&[b"after cancel"]);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(uploader.calls(), 0);
    assert_eq!(h.authorized_files(), 1);
}

#[test]
fn background_worker_drains_the_directory() {
    let h = Harness::with_preset(
        TrackingConsent::Granted,
        preset(Duration::from_millis(20)),
    );
    h.write_ready(&[b"a", b"b", b"c"]);
    let uploader = Arc::new(ScriptedUploader::default());
    let worker = h.storage.upload_worker(uploader.clone(), always());
    worker.start().unwrap();

    for _ in 0..250 {
        if h.authorized_files() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    worker.cancel_synchronously();

    assert_eq!(h.authorized_files(), 0);
    assert_eq!(uploader.calls(), 3);
}

// ============================================================================
// Consent end to end
// ============================================================================

#[test]
fn pending_data_is_uploaded_after_consent_is_granted() {
    let h = Harness::new(TrackingConsent::Pending);
    h.write_ready(&[b"before", b"consent"]);
    assert_eq!(h.unauthorized_files(), 2);
    assert_eq!(h.authorized_files(), 0);

    let uploader = Arc::new(ScriptedUploader::default());
    let worker = h.storage.upload_worker(uploader.clone(), always());
    assert_eq!(worker.perform_upload_cycle().batches_found, 0);

    h.consent.change_consent(TrackingConsent::Granted);
    h.storage.sync().unwrap();
    assert_eq!(h.unauthorized_files(), 0);
    assert_eq!(h.authorized_files(), 2);

    let report = worker.perform_upload_cycle();
    assert_eq!(report.delivered, 2);
    assert_eq!(
        uploader.payloads(),
        vec![b"before".to_vec(), b"consent".to_vec()]
    );
}

#[test]
fn refused_consent_discards_pending_data() {
    let h = Harness::new(TrackingConsent::Pending);
    h.write_ready(&[b"private"]);
    h.consent.change_consent(TrackingConsent::NotGranted);
    h.storage.write(b"dropped".to_vec(), None).unwrap();
    h.storage.sync().unwrap();

    assert_eq!(h.unauthorized_files(), 0);
    assert_eq!(h.authorized_files(), 0);
}

#[test]
fn writes_follow_the_consent_in_effect_when_submitted() {
    let h = Harness::new(TrackingConsent::Granted);
    h.storage.write(b"granted".to_vec(), None).unwrap();
    h.consent.change_consent(TrackingConsent::Pending);
    h.storage.write(b"pending".to_vec(), None).unwrap();
    h.storage.sync().unwrap();

    assert_eq!(h.authorized_files(), 1);
    assert_eq!(h.unauthorized_files(), 1);
}
