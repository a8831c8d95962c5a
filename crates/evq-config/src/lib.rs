//! evq configuration loading and validation.
//!
//! This crate provides:
//! - Performance presets for batch storage and upload scheduling
//! - The `evq.json` engine config model
//! - Config resolution (CLI → env → XDG → system → defaults)
//! - Semantic validation of the effective preset

pub mod engine;
pub mod preset;
pub mod resolve;
pub mod validate;

pub use engine::EngineConfig;
pub use preset::{
    BatchProcessingLevel, BatchSize, BundleType, PerformanceOverrides, PerformancePreset,
    StoragePerformance, UploadFrequency, UploadPerformance,
};
pub use resolve::{default_storage_root, resolve_config, ConfigPath, ConfigSource};
pub use validate::{validate_preset, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
