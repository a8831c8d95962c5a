//! No-mock configuration resolution + validation tests.
//!
//! Covers:
//! - Resolution order (CLI > EVQ_CONFIG > EVQ_CONFIG_DIR)
//! - Loading real files from disk into an effective preset
//! - Rejection of presets that would let the reader overlap the writer

use evq_config::resolve::{resolve_config, ConfigSource, ENV_CONFIG_DIR, ENV_CONFIG_PATH};
use evq_config::{EngineConfig, ValidationError};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved: keys.iter().map(|k| env::var(k).ok()).collect(),
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.keys.iter().zip(self.saved.iter()) {
            match value {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<F: FnOnce()>(f: F) {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    f();
}

fn write_config(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create config dir");
    }
    fs::write(path, body).expect("write config");
}

#[test]
fn test_resolution_order_cli_then_env_path_then_env_dir() {
    with_env_lock(|| {
        let _env = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        let tmp = TempDir::new().unwrap();

        let cli = tmp.path().join("cli.json");
        let env_file = tmp.path().join("env.json");
        let env_dir = tmp.path().join("confdir");
        write_config(&cli, r#"{"batch_size": "small"}"#);
        write_config(&env_file, r#"{"batch_size": "large"}"#);
        write_config(&env_dir.join("evq.json"), r#"{"batch_size": "medium"}"#);

        env::set_var(ENV_CONFIG_PATH, env_file.display().to_string());
        env::set_var(ENV_CONFIG_DIR, env_dir.display().to_string());

        let resolved = resolve_config(Some(&cli));
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert_eq!(resolved.path.as_deref(), Some(cli.as_path()));

        let resolved = resolve_config(Some(&tmp.path().join("missing.json")));
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.path.as_deref(), Some(env_file.as_path()));

        env::remove_var(ENV_CONFIG_PATH);
        let resolved = resolve_config(None);
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(
            resolved.path.as_deref(),
            Some(env_dir.join("evq.json").as_path())
        );
    });
}

#[test]
fn test_resolve_loads_effective_preset() {
    with_env_lock(|| {
        let _env = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        env::remove_var(ENV_CONFIG_DIR);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("evq.json");
        write_config(
            &path,
            r#"{
                "schema_version": "1.0.0",
                "batch_size": "large",
                "overrides": { "max_file_size": 1048576, "max_directory_size": 3145728 }
            }"#,
        );
        env::set_var(ENV_CONFIG_PATH, path.display().to_string());

        let (config, source) = EngineConfig::resolve(None).unwrap();
        assert_eq!(source, ConfigSource::Environment);
        let preset = config.validate().unwrap();
        assert_eq!(preset.storage.max_file_size, 1024 * 1024);
        assert_eq!(preset.storage.max_directory_size, 3 * 1024 * 1024);
        assert_eq!(
            preset.storage.max_file_age_for_write,
            Duration::from_secs(35).mul_f64(0.95)
        );
    });
}

#[test]
fn test_overlapping_read_and_write_ages_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("evq.json");
    write_config(
        &path,
        r#"{"overrides": { "max_file_age_for_write_secs": 10.0, "read_safety_margin_secs": 0.0 }}"#,
    );
    let config = EngineConfig::load(&path).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ValidationError::SemanticError(_)));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("evq.json");
    write_config(&path, "{ not json");
    let err = EngineConfig::load(&path).unwrap_err();
    assert!(matches!(err, ValidationError::ParseError(_)));
}

#[test]
fn test_missing_file_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let err = EngineConfig::load(&tmp.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ValidationError::IoError(_)));
}
