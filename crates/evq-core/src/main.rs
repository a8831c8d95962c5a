//! `evq`: inspect batch directories and check engine configuration.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use evq_common::{Error, StructuredError};
use evq_config::{resolve_config, EngineConfig, PerformancePreset};
use evq_core::exit_codes::ExitCode;
use evq_core::inspect::{directory_status, inspect_file};
use evq_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use serde_json::json;
use tracing::{debug, warn};

/// Durable telemetry event queue tooling
#[derive(Parser)]
#[command(name = "evq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to evq.json
    #[arg(long, global = true, env = "EVQ_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every batch file of a directory with its size, age and stage
    Status {
        /// Batch directory (e.g. <storage root>/<feature>/v1)
        dir: PathBuf,
    },

    /// Decode a batch file and print its events as JSON lines
    Inspect {
        file: PathBuf,
    },

    /// Resolve and validate the engine configuration
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    if init_logging(&log_config).is_err() {
        eprintln!("evq: logging already initialized");
    }

    let result = match &cli.command {
        Commands::Status { dir } => run_status(&cli.global, dir),
        Commands::Inspect { file } => run_inspect(file),
        Commands::CheckConfig => run_check_config(&cli.global),
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            let code = ExitCode::from(&err);
            let payload = StructuredError::from(&err).with_context("exit", code.code_name());
            eprintln!("{}", payload.to_json());
            code
        }
    };
    std::process::exit(code.as_i32());
}

fn load_preset(global: &GlobalOpts) -> Result<PerformancePreset, Error> {
    let (config, source) = EngineConfig::resolve(global.config.as_deref())?;
    debug!(source = %source, "configuration resolved");
    Ok(config.validate()?)
}

fn run_status(global: &GlobalOpts, dir: &Path) -> Result<ExitCode, Error> {
    let preset = load_preset(global)?;
    let files = directory_status(dir, &preset.storage, chrono::Utc::now())?;
    let total: u64 = files.iter().map(|f| f.size).sum();
    let output = json!({
        "directory": dir.display().to_string(),
        "files": files,
        "total_size": total,
        "max_directory_size": preset.storage.max_directory_size,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::Clean)
}

fn run_inspect(file: &Path) -> Result<ExitCode, Error> {
    let (events, failure) = inspect_file(file)?;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    match failure {
        None => Ok(ExitCode::Clean),
        Some(err) => {
            warn!(file = %file.display(), error = %err, "batch is malformed");
            let payload =
                StructuredError::from(&err).with_context("events_decoded", events.len());
            println!("{}", serde_json::to_string(&json!({ "error": payload }))?);
            Ok(ExitCode::Findings)
        }
    }
}

fn run_check_config(global: &GlobalOpts) -> Result<ExitCode, Error> {
    let resolved = resolve_config(global.config.as_deref());
    let config = match &resolved.path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let (valid, problem, preset) = match config.validate() {
        Ok(preset) => (true, None, Some(preset)),
        Err(e) => (false, Some(e.to_string()), None),
    };

    let output = json!({
        "source": resolved.source.to_string(),
        "path": resolved.path.as_ref().map(|p| p.display().to_string()),
        "valid": valid,
        "error": problem,
        "storage_root": config.storage_root().display().to_string(),
        "preset": preset.map(|p| json!({
            "max_file_size": p.storage.max_file_size,
            "max_directory_size": p.storage.max_directory_size,
            "max_file_age_for_write_ms": p.storage.max_file_age_for_write.as_millis() as u64,
            "min_file_age_for_read_ms": p.storage.min_file_age_for_read.as_millis() as u64,
            "max_file_age_for_read_ms": p.storage.max_file_age_for_read.as_millis() as u64,
            "max_objects_in_file": p.storage.max_objects_in_file,
            "max_object_size": p.storage.max_object_size,
            "initial_upload_delay_ms": p.upload.initial_upload_delay.as_millis() as u64,
            "min_upload_delay_ms": p.upload.min_upload_delay.as_millis() as u64,
            "max_upload_delay_ms": p.upload.max_upload_delay.as_millis() as u64,
            "upload_delay_change_rate": p.upload.upload_delay_change_rate,
            "max_batches_per_upload": p.upload.max_batches_per_upload,
        })),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(if valid {
        ExitCode::Clean
    } else {
        ExitCode::Findings
    })
}
