//! Exit codes for the `evq` binary.
//!
//! - 0: success
//! - 1: the command ran but found problems (malformed batch, invalid config)
//! - 10-19: user/environment errors
//! - 20-29: internal errors

use evq_common::{Error, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Clean = 0,
    /// Inspection finished and reported findings.
    Findings = 1,

    ArgsError = 10,
    ConfigError = 11,
    NotFound = 12,

    InternalError = 20,
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK",
            ExitCode::Findings => "OK_FINDINGS",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::NotFound => "ERR_NOT_FOUND",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ExitCode::NotFound,
            _ => match err.category() {
                ErrorCategory::Config => ExitCode::ConfigError,
                ErrorCategory::Io | ErrorCategory::Storage => ExitCode::IoError,
                _ => ExitCode::InternalError,
            },
        }
    }
}
