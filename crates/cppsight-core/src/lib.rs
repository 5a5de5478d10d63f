//! cppsight core
//!
//! Shared types for the cppsight preprocessing engine: diagnostics, the
//! error-sink interface, analyzer settings and the suppression registry.

pub mod diagnostics;
pub mod error;
pub mod settings;
pub mod suppressions;

pub use diagnostics::{CollectingSink, Diagnostic, ErrorSink, FileLocation, Severity};
pub use error::{Error, Result};
pub use settings::Settings;
pub use suppressions::Suppressions;
