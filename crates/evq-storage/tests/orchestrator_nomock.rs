//! No-mock integration tests for batch file lifecycle.
//!
//! Real directories and files under a temp dir, driven by a manual clock:
//! - file reuse up to the object limit
//! - directory purge under a size budget
//! - obsolete and too-young files on the read side

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use evq_common::{ManualDateProvider, TrackingConsent};
use evq_config::{PerformancePreset, StoragePerformance};
use evq_storage::{
    Directory, FilesOrchestrator, InMemoryTelemetry, MetricsData, RemovalReason,
};
use tempfile::{tempdir, TempDir};

const MB: u64 = 1024 * 1024;

// ============================================================================
// Fixture
// ============================================================================

struct Harness {
    tmp: TempDir,
    clock: Arc<ManualDateProvider>,
    telemetry: Arc<InMemoryTelemetry>,
    orchestrator: FilesOrchestrator,
}

impl Harness {
    fn new(performance: StoragePerformance) -> Self {
        let tmp = tempdir().expect("tempdir");
        let clock = Arc::new(ManualDateProvider::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ));
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let upload = PerformancePreset::default().upload;
        let orchestrator = FilesOrchestrator::new(
            Directory::create(tmp.path().join("v1")).expect("directory"),
            performance,
            clock.clone(),
            telemetry.clone(),
        )
        .with_metrics_data(MetricsData::new("rum", TrackingConsent::Granted, &upload));

        Self {
            tmp,
            clock,
            telemetry,
            orchestrator,
        }
    }

    fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Directory::new(self.tmp.path().join("v1"))
            .files()
            .unwrap()
            .into_iter()
            .map(|f| f.name().to_string())
            .collect();
        names.sort();
        names
    }
}

fn performance() -> StoragePerformance {
    StoragePerformance {
        max_file_size: 4 * MB,
        max_directory_size: 512 * MB,
        max_file_age_for_write: Duration::from_secs(10),
        min_file_age_for_read: Duration::from_secs(11),
        max_file_age_for_read: Duration::from_secs(60),
        max_objects_in_file: 5,
        max_object_size: MB,
    }
}

// ============================================================================
// Writing
// ============================================================================

#[test]
fn small_writes_fill_a_file_to_the_object_limit_then_rotate() {
    let mut h = Harness::new(performance());

    let first = h.orchestrator.get_writable_file(1).unwrap();
    first.append(b"x").unwrap();
    for _ in 1..5 {
        h.clock.advance(Duration::from_millis(10));
        let file = h.orchestrator.get_writable_file(1).unwrap();
        assert_eq!(file.name(), first.name());
        file.append(b"x").unwrap();
    }

    h.clock.advance(Duration::from_millis(10));
    let sixth = h.orchestrator.get_writable_file(1).unwrap();
    assert_ne!(sixth.name(), first.name());
    assert_eq!(first.size().unwrap(), 5);

    let closed = h.telemetry.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].batch_events_count, 5);
    assert!(!closed[0].forced_new);
}

#[test]
fn write_larger_than_file_size_still_gets_a_fresh_file() {
    let mut perf = performance();
    perf.max_file_size = 100;
    perf.max_object_size = 1000;
    let mut h = Harness::new(perf);

    let file = h.orchestrator.get_writable_file(500).unwrap();
    file.append(&[0; 500]).unwrap();
    h.clock.advance(Duration::from_millis(1));
    let next = h.orchestrator.get_writable_file(500).unwrap();
    assert_ne!(file.name(), next.name());
}

#[test]
fn over_budget_directory_purges_oldest_first() {
    let mut perf = performance();
    perf.max_directory_size = 3 * MB;
    perf.max_file_size = MB;
    let mut h = Harness::new(perf);

    let mut names = Vec::new();
    for _ in 0..3 {
        let file = h.orchestrator.get_new_writable_file(MB).unwrap();
        file.append(&vec![0u8; MB as usize]).unwrap();
        names.push(file.name().to_string());
        h.clock.advance(Duration::from_millis(1));
    }
    // Exactly at budget: nothing purged yet.
    assert_eq!(h.file_names().len(), 3);

    // One more byte over budget forces a purge when the next file is created.
    let fourth = h.orchestrator.get_new_writable_file(1).unwrap();
    fourth.append(&[0]).unwrap();
    h.clock.advance(Duration::from_millis(1));
    h.orchestrator.get_new_writable_file(1).unwrap();

    let remaining = h.file_names();
    assert_eq!(remaining.len(), 4);
    assert!(!remaining.contains(&names[0]));

    let purged: Vec<_> = h
        .telemetry
        .deleted()
        .into_iter()
        .filter(|m| m.batch_removal_reason == RemovalReason::Purged)
        .collect();
    assert_eq!(purged.len(), 1);
}

#[test]
fn fourth_megabyte_write_evicts_the_oldest_file() {
    let mut perf = performance();
    perf.max_directory_size = 3 * MB;
    perf.max_file_size = MB;
    perf.max_object_size = u64::MAX;
    perf.max_file_age_for_write = Duration::from_secs(3600);
    perf.max_objects_in_file = 1;
    let mut h = Harness::new(perf);

    let write = |h: &mut Harness, size: u64| {
        let file = h.orchestrator.get_writable_file(size).unwrap();
        file.append(&vec![0u8; size as usize]).unwrap();
        h.clock.advance(Duration::from_secs(1));
        file
    };

    let file1 = write(&mut h, MB);
    let file2 = write(&mut h, MB);
    // One byte over the directory budget.
    let file3 = write(&mut h, MB + 1);
    assert_eq!(h.file_names().len(), 3);

    let file4 = h.orchestrator.get_writable_file(MB).unwrap();
    assert_eq!(h.file_names().len(), 3);
    assert!(!file1.exists());
    file4.append(&vec![0u8; MB as usize + 1]).unwrap();
    h.clock.advance(Duration::from_secs(1));

    h.orchestrator.get_writable_file(MB).unwrap();
    assert_eq!(h.file_names().len(), 3);
    assert!(!file2.exists());
    assert!(file3.exists());

    let purged = h
        .telemetry
        .deleted()
        .iter()
        .filter(|m| m.batch_removal_reason == RemovalReason::Purged)
        .count();
    assert_eq!(purged, 2);
}

// ============================================================================
// Reading
// ============================================================================

#[test]
fn obsolete_files_are_deleted_and_never_returned() {
    let mut h = Harness::new(performance());
    let old = h.orchestrator.get_writable_file(1).unwrap();
    h.clock.advance(Duration::from_secs(61));

    let readable = h
        .orchestrator
        .get_readable_files(&HashSet::new(), None)
        .unwrap();
    assert!(readable.is_empty());
    assert!(!old.exists());

    let deleted = h.telemetry.deleted();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].batch_removal_reason, RemovalReason::Obsolete);
    assert_eq!(deleted[0].batch_age, 61_000);
}

#[test]
fn young_files_are_never_returned() {
    let mut h = Harness::new(performance());
    h.orchestrator.get_writable_file(1).unwrap();

    h.clock.advance(Duration::from_secs(10));
    assert!(h
        .orchestrator
        .get_readable_file(&HashSet::new())
        .unwrap()
        .is_none());

    h.clock.advance(Duration::from_secs(1));
    assert!(h
        .orchestrator
        .get_readable_file(&HashSet::new())
        .unwrap()
        .is_some());
}

#[test]
fn invalid_file_names_count_as_oldest() {
    let h = Harness::new(performance());
    let dir = Directory::new(h.tmp.path().join("v1"));
    dir.create_file("not-a-timestamp").unwrap();

    let readable = h
        .orchestrator
        .get_readable_files(&HashSet::new(), None)
        .unwrap();
    // Epoch-aged: obsolete.
    assert!(readable.is_empty());
    assert!(!dir.has_file("not-a-timestamp"));
}

#[test]
fn readable_files_are_oldest_first_and_limited() {
    let mut h = Harness::new(performance());
    let mut names = Vec::new();
    for _ in 0..4 {
        names.push(
            h.orchestrator
                .get_new_writable_file(1)
                .unwrap()
                .name()
                .to_string(),
        );
        h.clock.advance(Duration::from_secs(1));
    }
    h.clock.advance(Duration::from_secs(20));

    let readable: Vec<String> = h
        .orchestrator
        .get_readable_files(&HashSet::new(), Some(3))
        .unwrap()
        .into_iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(readable, names[..3].to_vec());
}

#[test]
fn missing_directory_yields_nothing_and_is_recreated_on_write() {
    let mut h = Harness::new(performance());
    std::fs::remove_dir_all(h.tmp.path().join("v1")).unwrap();

    assert!(h
        .orchestrator
        .get_readable_files(&HashSet::new(), None)
        .unwrap()
        .is_empty());
    let file = h.orchestrator.get_writable_file(1).unwrap();
    assert!(file.exists());
}
