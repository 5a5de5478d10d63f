//! Include resolution
//!
//! Two modes. With user defines in play, [`Preprocessor::handle_includes`]
//! acts as a full conditional evaluator and splices only the headers reached
//! through selected branches, recursively. Without them,
//! [`Preprocessor::splice_includes`] splices every `#include` it can find so
//! the configuration enumerator sees everything, skipping headers already
//! spliced anywhere in the document. Spliced content is bracketed with
//! `#file "PATH"` / `#endfile` markers.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use cppsight_core::{Diagnostic, Severity};
use tracing::debug;

use crate::condition::match_cfg_def;
use crate::configs::getdef;
use crate::Preprocessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderType {
    None,
    User,
    System,
}

/// Extract the header name from the text after `#include`. `<…>` marks a
/// system header, `"…"` a user header. Backslashes are normalized away.
pub(crate) fn header_file_name(line: &str) -> (HeaderType, String) {
    let Some(open) = line.find(['<', '"']) else {
        return (HeaderType::None, String::new());
    };
    let close = if line.as_bytes()[open] == b'<' { '>' } else { '"' };

    let mut name = String::new();
    for c in line[open + 1..].chars() {
        if c == close {
            break;
        }
        name.push(c);
    }
    let name = name.replace('\\', "/");

    if close == '"' {
        (HeaderType::User, name)
    } else {
        (HeaderType::System, name)
    }
}

/// Directory of a file path, with trailing separator; empty for bare names
pub(crate) fn containing_dir(file_path: &str) -> String {
    match file_path.rfind(['\\', '/']) {
        Some(pos) => file_path[..pos + 1].to_string(),
        None => String::new(),
    }
}

/// Try to open a header. Candidates: the bare name, each include path in
/// order, then the including file's directory. Returns the resolved path and
/// the file content.
pub(crate) fn open_header(
    filename: &str,
    include_paths: &[PathBuf],
    file_path: &str,
) -> Option<(String, String)> {
    let mut candidates: Vec<String> = Vec::with_capacity(include_paths.len() + 2);
    candidates.push(filename.to_string());
    for dir in include_paths {
        candidates.push(dir.join(filename).to_string_lossy().into_owned());
    }
    candidates.push(format!("{}{}", file_path, filename));

    for candidate in candidates {
        if let Ok(bytes) = fs::read(&candidate) {
            debug!("resolved header {} as {}", filename, candidate);
            return Some((candidate, String::from_utf8_lossy(&bytes).into_owned()));
        }
    }
    debug!("failed to resolve header {}", filename);
    None
}

/// Line number and reporting file for a position inside spliced text
fn locate_in_spliced(code: &str, pos: usize, default_file: &str) -> (String, u32) {
    let bytes = code.as_bytes();
    let mut linenr: u32 = 1;
    let mut level = 0i32;
    let mut file = default_file.to_string();

    let mut back = 1usize;
    while back <= pos {
        let at = pos - back;
        if level == 0 && bytes[at] == b'\n' {
            linenr += 1;
        } else if bytes[at..].starts_with(b"#endfile\n") {
            level += 1;
        } else if bytes[at..].starts_with(b"#file ") {
            if level == 0 {
                linenr -= 1;
                let start = at + 7;
                let end = bytes[start..]
                    .iter()
                    .position(|&c| c == b'"' || c == b'\n')
                    .map(|q| start + q)
                    .unwrap_or(bytes.len());
                file = String::from_utf8_lossy(&bytes[start..end]).into_owned();
                break;
            }
            level -= 1;
        }
        back += 1;
    }

    (file, linenr)
}

impl Preprocessor<'_> {
    /// Report an unresolved `#include`. User headers rate an information
    /// message, system headers only a debug one.
    pub(crate) fn missing_include(
        &mut self,
        filename: &str,
        linenr: u32,
        header: &str,
        user_header: bool,
    ) {
        let severity = if user_header {
            Severity::Information
        } else {
            Severity::Debug
        };
        let id = if user_header { "missingInclude" } else { "debug" };

        let mut diag = Diagnostic::new(
            severity,
            id,
            format!("Include file: \"{}\" not found.", header),
        );
        if !filename.is_empty() {
            diag = diag.with_location(filename, linenr);
        }
        self.sink.report(&diag);
    }

    /// Conditional include resolution against a live macro map. Only
    /// branches the defines select are kept; `#include` inside them is
    /// resolved recursively with the same map. `includes` carries the
    /// current splice chain for cycle protection.
    pub(crate) fn handle_includes(
        &mut self,
        code: &str,
        file_path: &str,
        include_paths: &[PathBuf],
        defs: &mut BTreeMap<String, String>,
        mut includes: Vec<String>,
    ) -> String {
        let path = containing_dir(file_path);

        // current #if nesting, and how deep the conditions match
        let mut indent = 0u32;
        let mut indentmatch = 0u32;
        // false once a branch at this level has been taken
        let mut else_is_true = true;
        let mut suppress_path = false;

        let undefs: BTreeSet<String> = self.settings.user_undefs.clone();

        let mut linenr: u32 = 0;
        let mut ostr = String::with_capacity(code.len());

        for line in code.lines() {
            linenr += 1;

            if line.starts_with("#ifdef ") {
                if indent == indentmatch {
                    let tag = getdef(line, true);
                    if defs.contains_key(&tag) {
                        else_is_true = false;
                        indentmatch += 1;
                    } else if undefs.contains(&tag) {
                        else_is_true = true;
                        indentmatch += 1;
                        suppress_path = true;
                    }
                }
                indent += 1;
                if indent == indentmatch + 1 {
                    else_is_true = true;
                }
            } else if line.starts_with("#ifndef ") {
                if indent == indentmatch {
                    let tag = getdef(line, false);
                    if !defs.contains_key(&tag) {
                        else_is_true = false;
                        indentmatch += 1;
                    } else if undefs.contains(&tag) {
                        else_is_true = false;
                        indentmatch += 1;
                        suppress_path = false;
                    }
                }
                indent += 1;
                if indent == indentmatch + 1 {
                    else_is_true = true;
                }
            } else if !suppress_path && line.starts_with("#if ") {
                if indent == indentmatch && match_cfg_def(defs, &line[4..]) {
                    else_is_true = false;
                    indentmatch += 1;
                }
                indent += 1;
                if indent == indentmatch + 1 {
                    else_is_true = true;
                }
            } else if line.starts_with("#elif ") || line.starts_with("#else") {
                if !else_is_true {
                    if indentmatch == indent {
                        indentmatch = indent.saturating_sub(1);
                    }
                } else if indentmatch == indent {
                    indentmatch = indent.saturating_sub(1);
                } else if indentmatch + 1 == indent
                    && (line.starts_with("#else")
                        || match_cfg_def(defs, line.get(6..).unwrap_or("")))
                {
                    indentmatch = indent;
                    else_is_true = false;
                }
                if suppress_path {
                    suppress_path = false;
                    indentmatch = indent;
                }
            } else if line.starts_with("#endif") {
                indent = indent.saturating_sub(1);
                if indentmatch > indent || indent == 0 {
                    indentmatch = indent;
                    else_is_true = false;
                    suppress_path = false;
                }
            } else if indentmatch == indent {
                if !suppress_path && line.starts_with("#define ") {
                    let rest = &line[8..];
                    let tag = match rest.find([' ', '(']) {
                        None => {
                            defs.insert(rest.to_string(), String::new());
                            rest.to_string()
                        }
                        Some(p) if rest.as_bytes()[p] == b'(' => {
                            let tag = rest[..p].to_string();
                            defs.insert(tag.clone(), String::new());
                            tag
                        }
                        Some(p) => {
                            let tag = rest[..p].to_string();
                            let value = rest[p + 1..].to_string();
                            let value = defs.get(&value).cloned().unwrap_or(value);
                            defs.insert(tag.clone(), value);
                            tag
                        }
                    };
                    if undefs.contains(&tag) {
                        defs.remove(&tag);
                    }
                } else if !suppress_path && line.starts_with("#undef ") {
                    defs.remove(&line[7..]);
                } else if !suppress_path && line.starts_with("#error ") {
                    self.error_directive(file_path, linenr, &line[7..]);
                } else if !suppress_path && line.starts_with("#include ") {
                    let (header_type, header) = header_file_name(&line[9..]);
                    if header_type == HeaderType::None {
                        ostr.push('\n');
                        continue;
                    }

                    let filepath = if header_type == HeaderType::User {
                        path.clone()
                    } else {
                        String::new()
                    };

                    match open_header(&header, include_paths, &filepath) {
                        Some((found, content)) => {
                            // break recursive inclusion
                            if includes.contains(&found) {
                                ostr.push('\n');
                                continue;
                            }
                            includes.push(found.clone());

                            let cleaned = self.read(&content, &found);
                            let inner = self.handle_includes(
                                &cleaned,
                                &found,
                                include_paths,
                                defs,
                                includes.clone(),
                            );
                            ostr.push_str("#file \"");
                            ostr.push_str(&found);
                            ostr.push_str("\"\n");
                            ostr.push_str(&inner);
                            ostr.push('\n');
                            ostr.push_str("#endfile\n");
                            continue;
                        }
                        None => {
                            if header_type == HeaderType::User || self.settings.debug_warnings {
                                if !self
                                    .settings
                                    .suppressions
                                    .is_suppressed("missingInclude", "", 0)
                                {
                                    self.missing_includes = true;
                                    self.missing_include(
                                        file_path,
                                        linenr,
                                        &header,
                                        header_type == HeaderType::User,
                                    );
                                }
                            }
                            ostr.push('\n');
                            continue;
                        }
                    }
                }

                if !suppress_path {
                    ostr.push_str(line);
                }
            }

            ostr.push('\n');
        }

        ostr
    }

    /// Unconditional include splicing for configuration enumeration. Every
    /// `#include` at the start of a line is replaced by the cleaned header
    /// content; a header is spliced at most once per document (case-folded).
    pub(crate) fn splice_includes(
        &mut self,
        code: &mut String,
        file_path: &str,
        include_paths: &[PathBuf],
    ) {
        let mut paths: Vec<String> = vec![containing_dir(file_path)];
        let mut handled: BTreeSet<String> = BTreeSet::new();

        let mut pos = 0usize;
        let mut endfile_pos = 0usize;
        while let Some(found_pos) = code[pos..].find("#include").map(|q| q + pos) {
            // only accept includes at the start of a line
            if found_pos > 0 && code.as_bytes()[found_pos - 1] != b'\n' {
                pos = found_pos + 8;
                continue;
            }
            pos = found_pos;

            // passing an #endfile means the directory stack lost one entry
            while let Some(e) = code[endfile_pos..]
                .find("\n#endfile")
                .map(|q| q + endfile_pos)
                .filter(|&e| e < pos)
            {
                paths.pop();
                endfile_pos = e + 9;
            }
            endfile_pos = pos;

            let line_end = code[pos..].find('\n').map(|q| q + pos).unwrap_or(code.len());
            let include_line = code[pos..line_end].to_string();
            code.replace_range(pos..line_end, "");

            let (header_type, header) = header_file_name(&include_line);
            if header_type == HeaderType::None {
                continue;
            }

            let filepath = if header_type == HeaderType::User {
                paths.last().cloned().unwrap_or_default()
            } else {
                String::new()
            };

            let mut processed = String::new();
            let mut resolved = header.clone();
            let mut file_opened = false;
            if let Some((found, content)) = open_header(&header, include_paths, &filepath) {
                file_opened = true;
                let folded = found.to_lowercase();
                if handled.contains(&folded) {
                    // already spliced somewhere, skip to avoid an eternal loop
                    continue;
                }
                handled.insert(folded);
                resolved = found;
                processed = self.read(&content, &resolved);
            }

            if !processed.is_empty() {
                let spliced = format!("#file \"{}\"\n{}\n#endfile", resolved, processed);
                code.insert_str(pos, &spliced);
                paths.push(containing_dir(&resolved));
            } else if !file_opened
                && (header_type == HeaderType::User || self.settings.debug_warnings)
            {
                if !self
                    .settings
                    .suppressions
                    .is_suppressed("missingInclude", "", 0)
                {
                    self.missing_includes = true;
                }

                let (report_file, linenr) = locate_in_spliced(code, pos, file_path);
                if !self
                    .settings
                    .suppressions
                    .is_suppressed("missingInclude", &report_file, linenr)
                {
                    self.missing_include(
                        &report_file,
                        linenr,
                        &header,
                        header_type == HeaderType::User,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names() {
        assert_eq!(header_file_name(" <sys/io.h>"), (HeaderType::System, "sys/io.h".into()));
        assert_eq!(header_file_name(" \"local.h\""), (HeaderType::User, "local.h".into()));
        assert_eq!(header_file_name(" \"win\\sep.h\""), (HeaderType::User, "win/sep.h".into()));
        assert_eq!(header_file_name(" MACRO_NAME"), (HeaderType::None, String::new()));
    }

    #[test]
    fn containing_dirs() {
        assert_eq!(containing_dir("src/main.c"), "src/");
        assert_eq!(containing_dir("main.c"), "");
        assert_eq!(containing_dir("a/b/c.h"), "a/b/");
    }

    #[test]
    fn locate_position_in_plain_text() {
        let code = "a\nb\n#include \"x.h\"\n";
        let pos = code.find("#include").unwrap();
        let (file, line) = locate_in_spliced(code, pos, "main.c");
        assert_eq!(file, "main.c");
        assert_eq!(line, 3);
    }

    #[test]
    fn locate_position_inside_file_block() {
        let code = "x\n#file \"inner.h\"\ny\n#include \"z.h\"\n";
        let pos = code.find("#include").unwrap();
        let (file, line) = locate_in_spliced(code, pos, "main.c");
        assert_eq!(file, "inner.h");
        assert_eq!(line, 2);
    }
}
