//! cppsight preprocessor
//!
//! A best-effort C/C++ preprocessor emulator for static analysis. Instead of
//! producing the single translation a compiler would, it enumerates the
//! plausible `#ifdef` configurations of a translation unit and emits one
//! preprocessed text per configuration, keeping line numbers stable and
//! tolerating malformed input.
//!
//! The pipeline: character cleanup (`reader`), comment stripping
//! (`comments`), directive normalization (`directives`), include splicing
//! (`includes`), configuration enumeration (`configs`) and
//! per-configuration emission (`emit`) with macro expansion (`macros`).

mod comments;
mod condition;
mod configs;
mod directives;
mod emit;
mod includes;
mod macros;
mod reader;
mod tokens;

use std::collections::BTreeMap;
use std::path::PathBuf;

use cppsight_core::{ErrorSink, Settings};

/// Cleaned, include-expanded text plus the configurations found in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessResult {
    pub text: String,
    pub configurations: Vec<String>,
}

/// The preprocessor engine. One instance handles one translation unit;
/// diagnostics go to the error sink, suppressions land in the settings.
pub struct Preprocessor<'a> {
    pub(crate) settings: &'a mut Settings,
    pub(crate) sink: &'a mut dyn ErrorSink,
    /// the first file given to [`Preprocessor::preprocess_source`]
    pub(crate) file0: String,
    pub(crate) missing_includes: bool,
}

impl<'a> Preprocessor<'a> {
    pub fn new(settings: &'a mut Settings, sink: &'a mut dyn ErrorSink) -> Self {
        Self {
            settings,
            sink,
            file0: String::new(),
            missing_includes: false,
        }
    }

    /// Has any `#include` failed to resolve during the lifetime of this
    /// instance? One-shot signal for the driver.
    pub fn missing_includes(&self) -> bool {
        self.missing_includes
    }

    /// Read source text and run the lexical cleanup passes: newline
    /// normalization, line splicing, comment removal and directive
    /// canonicalization. The output has the same number of lines as the
    /// input.
    pub fn read(&mut self, code: &str, filename: &str) -> String {
        let result = reader::normalize(code);
        let result = comments::strip_comments(&result, filename, self.settings, &mut *self.sink);
        let result = directives::cleanup_directives(&result);
        let result = directives::remove_parentheses(&result);
        if result.contains("#if 0\n") {
            return directives::remove_if0(&result);
        }
        result
    }

    /// Enumerate the `#ifdef` configurations of cleaned text
    pub fn configurations(&mut self, text: &str, filename: &str) -> Vec<String> {
        configs::getcfgs(text, filename, self.settings, &mut *self.sink)
    }

    /// Clean the source, splice includes and enumerate configurations.
    /// When user defines are set, only their configuration is prepared.
    pub fn preprocess_source(
        &mut self,
        code: &str,
        filename: &str,
        include_paths: &[PathBuf],
    ) -> PreprocessResult {
        if self.file0.is_empty() {
            self.file0 = filename.to_string();
        }

        let mut processed = self.read(code, filename);
        processed = directives::remove_asm(&processed);
        processed = directives::parenthesize_defined(&processed);

        let mut configurations = Vec::new();
        if !self.settings.user_defines.is_empty() || !self.settings.user_undefs.is_empty() {
            let mut defs = parse_user_defines(&self.settings.user_defines);
            processed =
                self.handle_includes(&processed, filename, include_paths, &mut defs, Vec::new());
            if self.settings.user_defines.is_empty() {
                configurations = self.configurations(&processed, filename);
            }
        } else {
            self.splice_includes(&mut processed, filename, include_paths);
            processed = directives::replace_if_defined(&processed);
            configurations = self.configurations(&processed, filename);
        }

        PreprocessResult {
            text: processed,
            configurations,
        }
    }

    /// Full pipeline: map from configuration name to its preprocessed text
    pub fn preprocess(
        &mut self,
        code: &str,
        filename: &str,
        include_paths: &[PathBuf],
    ) -> BTreeMap<String, String> {
        let result = self.preprocess_source(code, filename, include_paths);

        let mut output = BTreeMap::new();
        for cfg in &result.configurations {
            if self.settings.user_undefs.contains(cfg) {
                continue;
            }
            output.insert(cfg.clone(), self.emit(&result.text, cfg, filename));
        }
        output
    }
}

/// Parse the user-defines string `NAME[=VAL](;NAME[=VAL])*`
pub(crate) fn parse_user_defines(user_defines: &str) -> BTreeMap<String, String> {
    let mut defs = BTreeMap::new();
    for part in user_defines.split(';') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((name, value)) => defs.insert(name.to_string(), value.to_string()),
            None => defs.insert(part.to_string(), String::new()),
        };
    }
    defs
}

#[cfg(test)]
mod tests {
    use super::*;
    use cppsight_core::CollectingSink;

    fn pipeline(src: &str) -> (String, Vec<String>) {
        let mut settings = Settings::default();
        let mut sink = CollectingSink::new();
        let mut pp = Preprocessor::new(&mut settings, &mut sink);
        let result = pp.preprocess_source(src, "test.c", &[]);
        (result.text, result.configurations)
    }

    #[test]
    fn user_define_parsing() {
        let defs = parse_user_defines("A;B=2;C=x y");
        assert_eq!(defs.get("A").map(String::as_str), Some(""));
        assert_eq!(defs.get("B").map(String::as_str), Some("2"));
        assert_eq!(defs.get("C").map(String::as_str), Some("x y"));
        assert!(parse_user_defines("").is_empty());
    }

    #[test]
    fn read_preserves_line_count() {
        let mut settings = Settings::default();
        let mut sink = CollectingSink::new();
        let mut pp = Preprocessor::new(&mut settings, &mut sink);
        for src in [
            "int a;\n",
            "a\\\nb\n",
            "/* multi\nline */ x;\n",
            "#if 0\njunk\n#endif\nok\n",
            "// comment\ncode;\n",
        ] {
            let out = pp.read(src, "test.c");
            assert_eq!(
                src.matches('\n').count(),
                out.matches('\n').count(),
                "line count changed for {:?}",
                src
            );
        }
    }

    #[test]
    fn configurations_for_simple_source() {
        let (_, cfgs) = pipeline("#ifdef A\nx;\n#endif\n#ifdef B\ny;\n#endif\n");
        assert_eq!(cfgs, ["", "A", "B"]);
    }

    #[test]
    fn full_preprocess_produces_all_variants() {
        let mut settings = Settings::default();
        let mut sink = CollectingSink::new();
        let mut pp = Preprocessor::new(&mut settings, &mut sink);
        let out = pp.preprocess("#ifdef A\na;\n#else\nb;\n#endif\n", "test.c", &[]);

        assert_eq!(out.len(), 2);
        assert!(out[""].contains("b;"));
        assert!(out["A"].contains("a;"));
        for text in out.values() {
            assert_eq!(text.matches('\n').count(), 5);
        }
    }

    #[test]
    fn whole_condition_defined_becomes_ifdef() {
        let (text, cfgs) = pipeline("#if(defined(X))\nx;\n#endif\n");
        assert!(text.starts_with("#ifdef X\n"), "got {:?}", text);
        assert_eq!(cfgs, ["", "X"]);
    }

    #[test]
    fn user_defines_select_single_configuration() {
        let mut settings = Settings::default();
        settings.user_defines = "A".to_string();
        let mut sink = CollectingSink::new();
        let mut pp = Preprocessor::new(&mut settings, &mut sink);
        let result = pp.preprocess_source("#ifdef A\na;\n#else\nb;\n#endif\n", "test.c", &[]);

        assert!(result.configurations.is_empty());
        assert!(result.text.contains("a;"));
        assert!(!result.text.contains("b;"));
    }

    #[test]
    fn user_undefs_are_not_emitted() {
        let mut settings = Settings::default();
        settings.user_undefs.insert("B".to_string());
        let mut sink = CollectingSink::new();
        let mut pp = Preprocessor::new(&mut settings, &mut sink);
        let out = pp.preprocess("#ifdef B\nx;\n#endif\n", "test.c", &[]);
        assert!(!out.contains_key("B"));
    }

    #[test]
    fn asm_blocks_are_rewritten() {
        let (text, _) = pipeline("#asm\nmov r0\n#endasm\n");
        assert!(text.contains("asm("));
        assert!(text.contains(");"));
    }

    #[test]
    fn emitted_define_is_under_a_true_branch() {
        // definition consistency: a #define emitted for a configuration must
        // sit inside branches that configuration selects
        let src = "#ifdef A\n#define INSIDE 1\n#endif\n";
        let mut settings = Settings::default();
        let mut sink = CollectingSink::new();
        let mut pp = Preprocessor::new(&mut settings, &mut sink);
        let out = pp.preprocess(src, "test.c", &[]);
        assert!(!out[""].contains("INSIDE"));
    }
}
