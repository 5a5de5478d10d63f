//! Analyzer settings consumed by the preprocessor

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::suppressions::Suppressions;

/// Settings that influence preprocessing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Extra defines, in the form `NAME[=VALUE](;NAME[=VALUE])*`.
    /// When non-empty, only the matching configuration is produced.
    pub user_defines: String,

    /// Symbols that must never be defined, even by the code itself
    pub user_undefs: BTreeSet<String>,

    /// Enabled check tags, e.g. `style`
    pub enabled_checks: BTreeSet<String>,

    /// Honor inline `cppsight-suppress` comments
    pub inline_suppressions: bool,

    /// Emit `debug` severity messages (e.g. unhandled configurations)
    pub debug_warnings: bool,

    /// Enable experimental checks
    pub experimental: bool,

    /// Directories searched for `#include` headers, in order
    pub include_paths: Vec<PathBuf>,

    /// Registry of suppressed message ids
    pub suppressions: Suppressions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_defines: String::new(),
            user_undefs: BTreeSet::new(),
            enabled_checks: BTreeSet::new(),
            inline_suppressions: false,
            debug_warnings: false,
            experimental: false,
            include_paths: Vec::new(),
            suppressions: Suppressions::new(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Is the named check enabled?
    pub fn is_enabled(&self, check: &str) -> bool {
        self.enabled_checks.contains(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty() {
        let settings = Settings::default();
        assert!(settings.user_defines.is_empty());
        assert!(!settings.is_enabled("style"));
        assert!(settings.suppressions.is_empty());
    }

    #[test]
    fn enabled_checks() {
        let mut settings = Settings::new();
        settings.enabled_checks.insert("style".to_string());
        assert!(settings.is_enabled("style"));
        assert!(!settings.is_enabled("performance"));
    }
}
