//! Diagnostic messages and the error-sink interface
//!
//! The preprocessor never aborts on bad input; everything it has to say goes
//! through an [`ErrorSink`] owned by the caller.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Severity of a diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Style,
    Information,
    Debug,
}

impl Severity {
    /// Stable lowercase name, matching the wire format used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Style => "style",
            Severity::Information => "information",
            Severity::Debug => "debug",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "style" => Ok(Severity::Style),
            "information" => Ok(Severity::Information),
            "debug" => Ok(Severity::Debug),
            _ => Err(Error::UnknownSeverity(s.to_string())),
        }
    }
}

/// A (file, line) pair pointing into the analyzed sources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation {
    pub file: String,
    /// 1-based line number
    pub line: u32,
}

impl FileLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for FileLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A single reported message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable message id, e.g. `missingInclude` or `syntaxError`
    pub id: String,
    pub message: String,
    pub locations: Vec<FileLocation>,
    pub inconclusive: bool,
}

impl Diagnostic {
    pub fn new(severity: Severity, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            id: id.into(),
            message: message.into(),
            locations: Vec::new(),
            inconclusive: false,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.locations.push(FileLocation::new(file, line));
        self
    }
}

/// Receiver for diagnostics and progress callbacks
pub trait ErrorSink {
    /// Report a finished diagnostic
    fn report(&mut self, diagnostic: &Diagnostic);

    /// Periodic progress callback; the default implementation ignores it
    fn report_progress(&mut self, _filename: &str, _stage: &str, _percent: u32) {}
}

/// Sink that stores everything it receives. Useful for tests and for drivers
/// that post-process diagnostics in one batch.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected diagnostics with the given id
    pub fn with_id(&self, id: &str) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.id == id).collect()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&mut self, diagnostic: &Diagnostic) {
        self.diagnostics.push(diagnostic.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_roundtrip() {
        for s in ["error", "warning", "style", "information", "debug"] {
            let sev: Severity = s.parse().unwrap();
            assert_eq!(sev.as_str(), s);
        }
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn collecting_sink_filters_by_id() {
        let mut sink = CollectingSink::new();
        sink.report(&Diagnostic::new(Severity::Error, "syntaxError", "bad byte"));
        sink.report(
            &Diagnostic::new(Severity::Information, "missingInclude", "foo.h not found")
                .with_location("a.c", 3),
        );

        assert_eq!(sink.with_id("missingInclude").len(), 1);
        assert_eq!(sink.with_id("missingInclude")[0].locations[0].line, 3);
        assert!(sink.with_id("nosuch").is_empty());
    }
}
