//! Performance profiles for batch storage and upload.
//!
//! A [`PerformancePreset`] bundles every size, age and count threshold used
//! by the files orchestrator together with the upload worker's delay
//! parameters. Presets are derived from three coarse user-facing knobs
//! ([`BatchSize`], [`UploadFrequency`], [`BatchProcessingLevel`]) and the
//! kind of host process ([`BundleType`]), then optionally adjusted with
//! [`PerformanceOverrides`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

/// Preferred batch size. Smaller batches mean more, smaller uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSize {
    Small,
    #[default]
    Medium,
    Large,
}

/// How often the uploader tries to send batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFrequency {
    Frequent,
    #[default]
    Average,
    Rare,
}

/// How many batches one upload cycle may send back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchProcessingLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl BatchProcessingLevel {
    pub fn max_batches_per_upload(&self) -> usize {
        match self {
            BatchProcessingLevel::Low => 5,
            BatchProcessingLevel::Medium => 20,
            BatchProcessingLevel::High => 100,
        }
    }
}

/// Kind of host process writing the data.
///
/// Extensions are short-lived, so they batch briefly and check for uploads
/// soon after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleType {
    #[default]
    App,
    AppExtension,
}

/// Thresholds governing batch files in one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StoragePerformance {
    /// Maximum size of a single batch file in bytes.
    pub max_file_size: u64,
    /// Maximum total size of a directory in bytes; oldest files are purged
    /// beyond it.
    pub max_directory_size: u64,
    /// A file younger than this may still be reused for writing.
    pub max_file_age_for_write: Duration,
    /// A file must be at least this old to be read for upload. Kept above
    /// `max_file_age_for_write` so the reader never sees a file the writer
    /// may still extend.
    pub min_file_age_for_read: Duration,
    /// Files older than this are obsolete and deleted unread.
    pub max_file_age_for_read: Duration,
    /// Maximum number of objects appended to one file.
    pub max_objects_in_file: u64,
    /// Maximum size of one serialized object in bytes.
    pub max_object_size: u64,
}

impl StoragePerformance {
    /// Midpoint between the write and read age limits: the age at which a
    /// batch is considered ready for upload.
    pub fn uploader_window(&self) -> Duration {
        self.min_file_age_for_read.saturating_add(self.max_file_age_for_write) / 2
    }

    /// Gap between the last moment a file may be written and the first
    /// moment it may be read.
    pub fn read_safety_margin(&self) -> Duration {
        self.min_file_age_for_read
            .saturating_sub(self.max_file_age_for_write)
    }
}

/// Upload scheduling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPerformance {
    pub initial_upload_delay: Duration,
    pub min_upload_delay: Duration,
    pub max_upload_delay: Duration,
    /// Relative change applied to the delay after each cycle (0.1 = 10%).
    pub upload_delay_change_rate: f64,
    pub max_batches_per_upload: usize,
}

/// Complete performance profile.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformancePreset {
    pub storage: StoragePerformance,
    pub upload: UploadPerformance,
}

/// Upload delay multipliers applied to the frequency's base delay.
struct DelayFactors {
    initial: f64,
    min: f64,
    max: f64,
    change_rate: f64,
}

impl PerformancePreset {
    /// Build the preset for the given knobs.
    pub fn new(
        batch_size: BatchSize,
        upload_frequency: UploadFrequency,
        bundle_type: BundleType,
        processing_level: BatchProcessingLevel,
    ) -> Self {
        let mean_file_age_secs = match (bundle_type, batch_size) {
            (BundleType::App, BatchSize::Small) => 3.0,
            (BundleType::App, BatchSize::Medium) => 10.0,
            (BundleType::App, BatchSize::Large) => 35.0,
            (BundleType::AppExtension, _) => 1.0,
        };

        let min_upload_delay_secs = match (bundle_type, upload_frequency) {
            (BundleType::App, UploadFrequency::Frequent) => 0.5,
            (BundleType::App, UploadFrequency::Average) => 2.0,
            (BundleType::App, UploadFrequency::Rare) => 5.0,
            (BundleType::AppExtension, _) => 0.5,
        };

        let factors = match bundle_type {
            BundleType::App => DelayFactors {
                initial: 5.0,
                min: 1.0,
                max: 10.0,
                change_rate: 0.1,
            },
            // First upload is checked quickly after the extension starts and
            // the interval shrinks fast while batches are found.
            BundleType::AppExtension => DelayFactors {
                initial: 0.5,
                min: 1.0,
                max: 5.0,
                change_rate: 0.5,
            },
        };

        Self::from_mean_file_age(
            Duration::from_secs_f64(mean_file_age_secs),
            Duration::from_secs_f64(min_upload_delay_secs),
            factors,
            processing_level.max_batches_per_upload(),
        )
    }

    fn from_mean_file_age(
        mean_file_age: Duration,
        min_upload_delay: Duration,
        factors: DelayFactors,
        max_batches_per_upload: usize,
    ) -> Self {
        PerformancePreset {
            storage: StoragePerformance {
                max_file_size: 4 * MB,
                max_directory_size: 512 * MB,
                // 5% below and above the mean age
                max_file_age_for_write: mean_file_age.mul_f64(0.95),
                min_file_age_for_read: mean_file_age.mul_f64(1.05),
                max_file_age_for_read: Duration::from_secs(18 * 3600),
                max_objects_in_file: 500,
                max_object_size: 512 * KB,
            },
            upload: UploadPerformance {
                initial_upload_delay: min_upload_delay.mul_f64(factors.initial),
                min_upload_delay: min_upload_delay.mul_f64(factors.min),
                max_upload_delay: min_upload_delay.mul_f64(factors.max),
                upload_delay_change_rate: factors.change_rate,
                max_batches_per_upload,
            },
        }
    }

    /// Apply overrides. `read_safety_margin_secs` recomputes
    /// `min_file_age_for_read` from the (possibly overridden) write age unless
    /// `min_file_age_for_read_secs` is set explicitly.
    pub fn updated(&self, overrides: &PerformanceOverrides) -> Self {
        let mut preset = self.clone();
        let storage = &mut preset.storage;
        let upload = &mut preset.upload;

        if let Some(v) = overrides.max_file_size {
            storage.max_file_size = v;
        }
        if let Some(v) = overrides.max_directory_size {
            storage.max_directory_size = v;
        }
        if let Some(v) = overrides.max_file_age_for_write_secs {
            storage.max_file_age_for_write = secs(v);
        }
        if let Some(margin) = overrides.read_safety_margin_secs {
            storage.min_file_age_for_read =
                storage.max_file_age_for_write.saturating_add(secs(margin));
        }
        if let Some(v) = overrides.min_file_age_for_read_secs {
            storage.min_file_age_for_read = secs(v);
        }
        if let Some(v) = overrides.max_file_age_for_read_secs {
            storage.max_file_age_for_read = secs(v);
        }
        if let Some(v) = overrides.max_objects_in_file {
            storage.max_objects_in_file = v;
        }
        if let Some(v) = overrides.max_object_size {
            storage.max_object_size = v;
        }
        if let Some(v) = overrides.initial_upload_delay_secs {
            upload.initial_upload_delay = secs(v);
        }
        if let Some(v) = overrides.min_upload_delay_secs {
            upload.min_upload_delay = secs(v);
        }
        if let Some(v) = overrides.max_upload_delay_secs {
            upload.max_upload_delay = secs(v);
        }
        if let Some(v) = overrides.upload_delay_change_rate {
            upload.upload_delay_change_rate = v;
        }
        if let Some(v) = overrides.max_batches_per_upload {
            upload.max_batches_per_upload = v;
        }
        preset
    }
}

impl Default for PerformancePreset {
    fn default() -> Self {
        Self::new(
            BatchSize::default(),
            UploadFrequency::default(),
            BundleType::default(),
            BatchProcessingLevel::default(),
        )
    }
}

/// Negative or non-finite seconds clamp to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Optional per-field adjustments loaded from the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceOverrides {
    pub max_file_size: Option<u64>,
    pub max_directory_size: Option<u64>,
    pub max_file_age_for_write_secs: Option<f64>,
    pub min_file_age_for_read_secs: Option<f64>,
    pub max_file_age_for_read_secs: Option<f64>,
    /// Gap added on top of the write age to obtain the read age.
    pub read_safety_margin_secs: Option<f64>,
    pub max_objects_in_file: Option<u64>,
    pub max_object_size: Option<u64>,
    pub initial_upload_delay_secs: Option<f64>,
    pub min_upload_delay_secs: Option<f64>,
    pub max_upload_delay_secs: Option<f64>,
    pub upload_delay_change_rate: Option<f64>,
    pub max_batches_per_upload: Option<usize>,
}
