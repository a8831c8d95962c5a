//! Consent-aware routing of writes and migration of pending data.
//!
//! Data collected while consent is pending goes to the unauthorized
//! directory. When consent is granted those batches are moved to the
//! authorized directory, where the uploader picks them up; when consent is
//! refused they are deleted. Authorized data is never touched by a consent
//! change.

use std::sync::Mutex;

use evq_common::TrackingConsent;
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::StorageResult;
use crate::writer::{lock_orchestrator, FileWriter};

/// What a consent transition does to the unauthorized directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMigration {
    /// Move pending batches to the authorized directory.
    MoveToAuthorized,
    /// Delete pending batches.
    DeleteUnauthorized,
    /// Leave everything in place.
    None,
}

impl DataMigration {
    pub fn for_transition(previous: TrackingConsent, current: TrackingConsent) -> Self {
        match (previous, current) {
            (TrackingConsent::Pending, TrackingConsent::Granted) => DataMigration::MoveToAuthorized,
            (TrackingConsent::Pending, TrackingConsent::NotGranted) => {
                DataMigration::DeleteUnauthorized
            }
            _ => DataMigration::None,
        }
    }
}

/// Routes each write by the consent in effect when it executes.
///
/// The writer keeps its own copy of the consent value. It only changes in
/// [`ConsentAwareWriter::change_consent`], which callers run on the same
/// serial lane as the writes, so a write always observes the consent that was
/// current when it was submitted.
pub struct ConsentAwareWriter {
    consent: Mutex<TrackingConsent>,
    unauthorized: FileWriter,
    authorized: FileWriter,
}

impl ConsentAwareWriter {
    pub fn new(initial: TrackingConsent, unauthorized: FileWriter, authorized: FileWriter) -> Self {
        Self {
            consent: Mutex::new(initial),
            unauthorized,
            authorized,
        }
    }

    pub fn consent(&self) -> TrackingConsent {
        *self.lock_consent()
    }

    /// Write to the area the current consent selects. Dropped without error
    /// when consent is not granted.
    pub fn write(&self, data: &[u8], metadata: Option<&[u8]>) -> StorageResult<()> {
        match self.consent() {
            TrackingConsent::Granted => self.authorized.write(data, metadata),
            TrackingConsent::Pending => self.unauthorized.write(data, metadata),
            TrackingConsent::NotGranted => {
                debug!("tracking consent not granted; event dropped");
                Ok(())
            }
        }
    }

    /// Write straight to the authorized area, whatever the consent.
    pub fn write_authorized(&self, data: &[u8], metadata: Option<&[u8]>) -> StorageResult<()> {
        self.authorized.write(data, metadata)
    }

    /// Apply a consent transition and migrate pending data accordingly.
    pub fn change_consent(&self, previous: TrackingConsent, current: TrackingConsent) {
        *self.lock_consent() = current;

        let migration = DataMigration::for_transition(previous, current);
        if migration == DataMigration::None {
            return;
        }

        // Hold both orchestrators so neither side creates or hands out a file
        // while batches move between them.
        let unauthorized = lock_orchestrator(self.unauthorized.orchestrator());
        let authorized = lock_orchestrator(self.authorized.orchestrator());
        let result = migrate(migration, unauthorized.directory(), authorized.directory());

        match result {
            Ok(count) => info!(
                previous = %previous,
                current = %current,
                ?migration,
                files = count,
                "migrated pending data after consent change"
            ),
            Err(e) => warn!(
                previous = %previous,
                current = %current,
                ?migration,
                error = %e,
                "failed to migrate pending data"
            ),
        }
    }

    fn lock_consent(&self) -> std::sync::MutexGuard<'_, TrackingConsent> {
        self.consent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run `migration` between the two directories. Returns the number of files
/// moved or deleted.
pub fn migrate(
    migration: DataMigration,
    unauthorized: &Directory,
    authorized: &Directory,
) -> StorageResult<usize> {
    match migration {
        DataMigration::MoveToAuthorized => unauthorized.move_all_files(authorized),
        DataMigration::DeleteUnauthorized => unauthorized.delete_all_files(),
        DataMigration::None => Ok(0),
    }
}

impl std::fmt::Debug for ConsentAwareWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentAwareWriter")
            .field("consent", &self.consent())
            .finish()
    }
}
