//! Engine configuration file (`evq.json`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::preset::{
    BatchProcessingLevel, BatchSize, BundleType, PerformanceOverrides, PerformancePreset,
    UploadFrequency,
};
use crate::resolve::{default_storage_root, resolve_config, ConfigSource};
use crate::validate::{validate_preset, ValidationError, ValidationResult};
use crate::CONFIG_SCHEMA_VERSION;

/// User-facing engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub schema_version: String,
    pub batch_size: BatchSize,
    pub upload_frequency: UploadFrequency,
    pub bundle_type: BundleType,
    pub batch_processing_level: BatchProcessingLevel,
    pub overrides: PerformanceOverrides,
    /// Root under which each feature gets its batch directories.
    pub storage_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            batch_size: BatchSize::default(),
            upload_frequency: UploadFrequency::default(),
            bundle_type: BundleType::default(),
            batch_processing_level: BatchProcessingLevel::default(),
            overrides: PerformanceOverrides::default(),
            storage_dir: None,
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON text.
    pub fn from_json(text: &str) -> ValidationResult<Self> {
        let config: EngineConfig = serde_json::from_str(text)
            .map_err(|e| ValidationError::ParseError(e.to_string()))?;
        if config.schema_version != CONFIG_SCHEMA_VERSION {
            return Err(ValidationError::VersionMismatch {
                expected: CONFIG_SCHEMA_VERSION.to_string(),
                actual: config.schema_version,
            });
        }
        Ok(config)
    }

    /// Load and parse a config file.
    pub fn load(path: &Path) -> ValidationResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Resolve the config location and load it, falling back to defaults
    /// when no file is found.
    pub fn resolve(cli_path: Option<&Path>) -> ValidationResult<(Self, ConfigSource)> {
        let resolved = resolve_config(cli_path);
        match resolved.path {
            Some(path) => Ok((Self::load(&path)?, resolved.source)),
            None => Ok((Self::default(), ConfigSource::BuiltinDefault)),
        }
    }

    /// Effective performance preset (knobs plus overrides).
    pub fn performance(&self) -> PerformancePreset {
        PerformancePreset::new(
            self.batch_size,
            self.upload_frequency,
            self.bundle_type,
            self.batch_processing_level,
        )
        .updated(&self.overrides)
    }

    /// Effective storage root.
    pub fn storage_root(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(default_storage_root)
    }

    /// Validate the effective preset.
    pub fn validate(&self) -> ValidationResult<PerformancePreset> {
        let preset = self.performance();
        validate_preset(&preset)?;
        Ok(preset)
    }
}
