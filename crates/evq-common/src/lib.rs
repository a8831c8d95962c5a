//! evq common types.
//!
//! This crate provides foundational types shared across the evq crates:
//! - Unified error type with stable codes
//! - Tracking consent and its provider
//! - Injectable clock
//! - Host application state

pub mod consent;
pub mod context;
pub mod error;
pub mod time;

pub use consent::{ConsentProvider, ConsentSubscriber, TrackingConsent};
pub use context::{AppState, AppStateCell};
pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use time::{DateProvider, ManualDateProvider, SystemDateProvider};
