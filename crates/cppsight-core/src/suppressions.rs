//! Suppression registry
//!
//! Holds message ids that must not be reported, either for a whole file or
//! for a single line. Entries come from the command line and from inline
//! `cppsight-suppress` comments found during preprocessing.

use serde::{Deserialize, Serialize};

/// One suppression entry. `line == 0` matches every line of `file`;
/// an empty `file` matches every file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub id: String,
    pub file: String,
    pub line: u32,
}

/// Registry of active suppressions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Suppressions {
    entries: Vec<Suppression>,
}

impl Suppressions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a suppression. Returns an error message for malformed ids;
    /// the caller is expected to forward it to the error sink.
    pub fn add(&mut self, id: &str, file: &str, line: u32) -> Result<(), String> {
        if id.is_empty() {
            return Err("Failed to add suppression. No id.".to_string());
        }
        let valid = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '*');
        if !valid || !id.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(format!("Failed to add suppression. Invalid id \"{}\"", id));
        }

        let entry = Suppression {
            id: id.to_string(),
            file: file.to_string(),
            line,
        };
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
        Ok(())
    }

    /// Check whether a message would be suppressed
    pub fn is_suppressed(&self, id: &str, file: &str, line: u32) -> bool {
        self.entries.iter().any(|s| {
            s.id == id
                && (s.file.is_empty() || s.file == file)
                && (s.line == 0 || s.line == line)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Suppression] {
        &self.entries
    }
}
