//! Per-feature storage wiring.
//!
//! Each feature (logs, traces, ...) gets two directories under the storage
//! root, one files orchestrator per directory, a consent-aware writer and a
//! serial lane:
//!
//! ```text
//! <root>/<feature>/intermediate-v1   collected while consent is pending
//! <root>/<feature>/v1                authorized, read by the upload worker
//! ```
//!
//! Writes and consent migrations are queued on the lane, so a write always
//! lands in the area selected by the consent in effect when it was submitted
//! and the caller never waits for disk I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use evq_common::{
    AppStateCell, ConsentProvider, ConsentSubscriber, DateProvider, Result, SystemDateProvider,
    TrackingConsent,
};
use evq_config::PerformancePreset;
use evq_storage::{
    ConsentAwareWriter, DataEncryption, Directory, FileReader, FileWriter, FilesOrchestrator,
    MetricsData, SharedOrchestrator, Telemetry, TracingTelemetry,
};
use tracing::{debug, info};

use crate::lane::Lane;
use crate::upload::{DataUploadWorker, DataUploader, UploadConditions};

pub const UNAUTHORIZED_DIR: &str = "intermediate-v1";
pub const AUTHORIZED_DIR: &str = "v1";

/// Collaborators shared by every feature of one engine instance.
#[derive(Clone)]
pub struct StorageContext {
    pub date_provider: Arc<dyn DateProvider>,
    pub telemetry: Arc<dyn Telemetry>,
    pub app_state: Arc<AppStateCell>,
    pub encryption: Option<Arc<dyn DataEncryption>>,
}

impl StorageContext {
    pub fn new(date_provider: Arc<dyn DateProvider>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            date_provider,
            telemetry,
            app_state: Arc::new(AppStateCell::default()),
            encryption: None,
        }
    }

    pub fn with_app_state(mut self, app_state: Arc<AppStateCell>) -> Self {
        self.app_state = app_state;
        self
    }

    pub fn with_encryption(mut self, encryption: Arc<dyn DataEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }
}

impl Default for StorageContext {
    fn default() -> Self {
        Self::new(Arc::new(SystemDateProvider), Arc::new(TracingTelemetry))
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("app_state", &self.app_state.current())
            .field("encryption", &self.encryption.is_some())
            .finish()
    }
}

/// Storage of one feature: where its events are written and read from.
pub struct FeatureStorage {
    name: String,
    root: PathBuf,
    preset: PerformancePreset,
    telemetry: Arc<dyn Telemetry>,
    lane: Arc<Lane>,
    writer: Arc<ConsentAwareWriter>,
    // Subscribed for as long as the feature lives.
    _relay: Arc<ConsentRelay>,
    reader: Arc<FileReader>,
    unauthorized: SharedOrchestrator,
    authorized: SharedOrchestrator,
}

impl FeatureStorage {
    /// Create the feature's directories and subscribe to consent changes.
    pub fn new(
        name: impl Into<String>,
        storage_root: &Path,
        preset: &PerformancePreset,
        consent: &ConsentProvider,
        context: &StorageContext,
    ) -> Result<Self> {
        let name = name.into();
        let root = storage_root.join(&name);

        let orchestrator = |dir: &str, label: TrackingConsent| -> Result<SharedOrchestrator> {
            let directory = Directory::create(root.join(dir))?;
            let orchestrator = FilesOrchestrator::new(
                directory,
                preset.storage.clone(),
                context.date_provider.clone(),
                context.telemetry.clone(),
            )
            .with_metrics_data(MetricsData::new(name.clone(), label, &preset.upload))
            .with_app_state(context.app_state.clone());
            Ok(Arc::new(Mutex::new(orchestrator)))
        };
        let unauthorized = orchestrator(UNAUTHORIZED_DIR, TrackingConsent::Pending)?;
        let authorized = orchestrator(AUTHORIZED_DIR, TrackingConsent::Granted)?;

        let file_writer = |orchestrator: &SharedOrchestrator| {
            let writer = FileWriter::new(orchestrator.clone());
            match &context.encryption {
                Some(encryption) => writer.with_encryption(encryption.clone()),
                None => writer,
            }
        };

        let mut reader = FileReader::new(authorized.clone(), context.telemetry.clone());
        if let Some(encryption) = &context.encryption {
            reader = reader.with_encryption(encryption.clone());
        }

        let lane = Arc::new(Lane::new(format!("evq-rw-{}", name))?);
        // The writer starts from the consent seen at registration, so no
        // transition is lost in between.
        let relay = consent.subscribe_with(|current| {
            Arc::new(ConsentRelay {
                feature: name.clone(),
                lane: lane.clone(),
                writer: Arc::new(ConsentAwareWriter::new(
                    current,
                    file_writer(&unauthorized),
                    file_writer(&authorized),
                )),
            })
        });
        let writer = relay.writer.clone();

        info!(feature = %name, root = %root.display(), consent = %writer.consent(), "feature storage ready");
        Ok(Self {
            name,
            root,
            preset: preset.clone(),
            telemetry: context.telemetry.clone(),
            lane,
            writer,
            _relay: relay,
            reader: Arc::new(reader),
            unauthorized,
            authorized,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<storage root>/<feature>`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unauthorized_path(&self) -> PathBuf {
        self.root.join(UNAUTHORIZED_DIR)
    }

    pub fn authorized_path(&self) -> PathBuf {
        self.root.join(AUTHORIZED_DIR)
    }

    /// Queue an event for writing. Returns as soon as it is queued.
    pub fn write(&self, data: Vec<u8>, metadata: Option<Vec<u8>>) -> Result<()> {
        let writer = self.writer.clone();
        self.lane.dispatch(move || {
            // Failures are logged by the writer.
            let _ = writer.write(&data, metadata.as_deref());
        })
    }

    /// Queue an event for the authorized area, whatever the consent.
    pub fn write_authorized(&self, data: Vec<u8>, metadata: Option<Vec<u8>>) -> Result<()> {
        let writer = self.writer.clone();
        self.lane.dispatch(move || {
            let _ = writer.write_authorized(&data, metadata.as_deref());
        })
    }

    /// Block until every write and migration queued so far has run.
    pub fn sync(&self) -> Result<()> {
        self.lane.sync()
    }

    /// Reader over the authorized area.
    pub fn reader(&self) -> Arc<FileReader> {
        self.reader.clone()
    }

    pub fn authorized_orchestrator(&self) -> &SharedOrchestrator {
        &self.authorized
    }

    pub fn unauthorized_orchestrator(&self) -> &SharedOrchestrator {
        &self.unauthorized
    }

    /// Build an upload worker over this feature's authorized area. The
    /// worker is not started.
    pub fn upload_worker(
        &self,
        uploader: Arc<dyn DataUploader>,
        conditions: Arc<dyn UploadConditions>,
    ) -> DataUploadWorker {
        DataUploadWorker::new(
            self.name.clone(),
            self.reader.clone(),
            uploader,
            conditions,
            self.telemetry.clone(),
            &self.preset.upload,
        )
    }
}

impl Drop for FeatureStorage {
    fn drop(&mut self) {
        self.lane.shutdown();
    }
}

impl std::fmt::Debug for FeatureStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStorage")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("consent", &self.writer.consent())
            .finish()
    }
}

/// Forwards consent transitions onto the feature's lane.
struct ConsentRelay {
    feature: String,
    lane: Arc<Lane>,
    writer: Arc<ConsentAwareWriter>,
}

impl ConsentSubscriber for ConsentRelay {
    fn consent_changed(&self, previous: TrackingConsent, current: TrackingConsent) {
        let writer = self.writer.clone();
        if self
            .lane
            .dispatch(move || writer.change_consent(previous, current))
            .is_err()
        {
            debug!(feature = %self.feature, "storage closed; consent change ignored");
        }
    }
}
