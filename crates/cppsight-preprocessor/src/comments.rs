//! Comment stripping
//!
//! Removes `//` and `/* */` comments while keeping the line count intact,
//! copies string and character literals through untouched, rewrites raw
//! strings into ordinary ones, and mines comments for the inline-suppression
//! and fall-through side channels.

use cppsight_core::{Diagnostic, ErrorSink, Settings, Severity};

fn has_bom(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0] == 0xef && bytes[1] == 0xbb && bytes[2] == 0xbf
}

fn starts_with_at(bytes: &[u8], i: usize, pat: &[u8]) -> bool {
    bytes.len() >= i + pat.len() && &bytes[i..i + pat.len()] == pat
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|p| from + p)
}

fn find_sub(bytes: &[u8], from: usize, pat: &[u8]) -> Option<usize> {
    if pat.is_empty() || bytes.len() < pat.len() {
        return None;
    }
    (from.min(bytes.len())..=bytes.len() - pat.len()).find(|&p| &bytes[p..p + pat.len()] == pat)
}

/// Does a comment ask for fall-through to be tolerated?
fn is_fall_through_comment(comment: &str) -> bool {
    let stripped: String = comment
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    stripped.contains("fallthr")
        || stripped.contains("fallsthr")
        || stripped.contains("fall-thr")
        || stripped.contains("dropthr")
        || stripped.contains("passthr")
        || stripped.contains("nobreak")
        || stripped == "fall"
}

/// Inline suppression marker, first word of the comment body
const SUPPRESS_MARKER: &str = "cppsight-suppress";

fn queue_comment_suppression(comment: &str, settings: &Settings, ids: &mut Vec<String>) {
    if !settings.inline_suppressions {
        return;
    }
    let mut words = comment.split_whitespace();
    if words.next() == Some(SUPPRESS_MARKER) {
        if let Some(id) = words.next() {
            ids.push(id.to_string());
        }
    }
}

/// Attach queued suppression ids to the given line
fn flush_suppressions(
    ids: &mut Vec<String>,
    settings: &mut Settings,
    sink: &mut dyn ErrorSink,
    filename: &str,
    lineno: u32,
) {
    for id in ids.drain(..) {
        if let Err(msg) = settings.suppressions.add(&id, filename, lineno) {
            sink.report(
                &Diagnostic::new(Severity::Error, "cppsightError", msg)
                    .with_location(filename, lineno),
            );
        }
    }
}

/// Strip comments from normalized source. Inline suppressions found on the
/// way are registered against the next code or directive line.
pub(crate) fn strip_comments(
    input: &str,
    filename: &str,
    settings: &mut Settings,
    sink: &mut dyn ErrorSink,
) -> String {
    let bytes = input.as_bytes();
    let mut code: Vec<u8> = Vec::with_capacity(bytes.len());

    let mut lineno: u32 = 1;
    // deferred newlines from multi-line comments and spliced strings
    let mut newlines = 0usize;
    let mut previous: u8 = 0;
    let mut in_preprocessor_line = false;
    let mut suppression_ids: Vec<String> = Vec::new();
    let mut fall_through_comment = false;

    let mut i = if has_bom(bytes) { 3 } else { 0 };
    while i < bytes.len() {
        let ch = bytes[i];

        if ch & 0x80 != 0 {
            sink.report(
                &Diagnostic::new(
                    Severity::Error,
                    "syntaxError",
                    format!(
                        "The code contains characters that are unhandled. \
                         Neither unicode nor extended ASCII are supported. \
                         (line={}, character code={:x})",
                        lineno, ch
                    ),
                )
                .with_location(filename, lineno),
            );
        }

        // #error (without user defines) and #warning keep their text to the
        // end of the line, comments included
        if (starts_with_at(bytes, i, b"#error") && settings.user_defines.is_empty())
            || starts_with_at(bytes, i, b"#warning")
        {
            while i < bytes.len() && bytes[i] != b'\n' {
                code.push(bytes[i]);
                previous = bytes[i];
                i += 1;
            }
            continue;
        }

        if ch.is_ascii_whitespace() {
            if ch == b' ' && previous == b' ' {
                // collapse runs of spaces
            } else {
                code.push(ch);
                previous = ch;
            }
            if ch == b'\n' {
                in_preprocessor_line = false;
                lineno += 1;
                if newlines > 0 {
                    code.extend(std::iter::repeat(b'\n').take(newlines));
                    newlines = 0;
                    previous = b'\n';
                }
            }
            i += 1;
            continue;
        }

        if starts_with_at(bytes, i, b"//") {
            let comment_start = i + 2;
            let Some(nl) = find_byte(bytes, i, b'\n') else {
                let comment = String::from_utf8_lossy(&bytes[comment_start.min(bytes.len())..]);
                queue_comment_suppression(&comment, settings, &mut suppression_ids);
                break;
            };
            let comment = String::from_utf8_lossy(&bytes[comment_start..nl]);

            queue_comment_suppression(&comment, settings, &mut suppression_ids);
            if is_fall_through_comment(&comment) {
                fall_through_comment = true;
            }

            code.push(b'\n');
            previous = b'\n';
            lineno += 1;
            i = nl + 1;
        } else if starts_with_at(bytes, i, b"/*") {
            let comment_start = i + 2;
            let mut ch_prev = 0u8;
            let mut cur = ch;
            i += 1;
            while i < bytes.len() && (ch_prev != b'*' || cur != b'/') {
                ch_prev = cur;
                i += 1;
                cur = bytes.get(i).copied().unwrap_or(0);
                if cur == b'\n' {
                    newlines += 1;
                    lineno += 1;
                }
            }
            let end = i.saturating_sub(1).min(bytes.len());
            let comment = if end > comment_start {
                String::from_utf8_lossy(&bytes[comment_start..end])
            } else {
                "".into()
            };

            if is_fall_through_comment(&comment) {
                fall_through_comment = true;
            }
            queue_comment_suppression(&comment, settings, &mut suppression_ids);

            i += 1;
        } else if ch == b'#' && previous == b'\n' {
            code.push(ch);
            previous = ch;
            in_preprocessor_line = true;

            // suppressions may also target a directive line
            flush_suppressions(&mut suppression_ids, settings, sink, filename, lineno);
            i += 1;
        } else {
            if !in_preprocessor_line {
                // Not whitespace, not a comment and not a directive: code.
                // A pending fall-through comment only suppresses when the
                // next token opens a switch case.
                if settings.is_enabled("style") && settings.experimental && fall_through_comment {
                    let mut j = i;
                    while j < bytes.len() && bytes[j].is_ascii_lowercase() {
                        j += 1;
                    }
                    if matches!(&bytes[i..j], b"case" | b"default") {
                        suppression_ids.push("switchCaseFallThrough".to_string());
                    }
                    fall_through_comment = false;
                }

                flush_suppressions(&mut suppression_ids, settings, sink, filename, lineno);
            }

            if ch == b'"' || ch == b'\'' {
                code.push(ch);
                previous = ch;
                loop {
                    i += 1;
                    let Some(&next) = bytes.get(i) else { break };
                    if next == b'\\' {
                        i += 1;
                        match bytes.get(i) {
                            Some(&b'\n') => newlines += 1,
                            Some(&seq) => {
                                code.push(next);
                                code.push(seq);
                                previous = seq;
                            }
                            None => break,
                        }
                    } else {
                        code.push(next);
                        previous = next;
                    }
                    if next == ch || next == b'\n' {
                        break;
                    }
                }
                i += 1;
            } else if starts_with_at(bytes, i, b"R\"") {
                // raw string: collect the delimiter, then rewrite the body
                // as an ordinary double-quoted literal
                let mut delim: Vec<u8> = Vec::new();
                let mut valid = false;
                let mut i2 = i + 2;
                while let Some(&c) = bytes.get(i2) {
                    if c == b'(' {
                        valid = true;
                        break;
                    }
                    if delim.len() == 16
                        || c.is_ascii_whitespace()
                        || c.is_ascii_control()
                        || c == b')'
                        || c == b'\\'
                    {
                        break;
                    }
                    delim.push(c);
                    i2 += 1;
                }

                let mut closer = Vec::with_capacity(delim.len() + 2);
                closer.push(b')');
                closer.extend_from_slice(&delim);
                closer.push(b'"');

                let endpos = if valid { find_sub(bytes, i, &closer) } else { None };
                if let Some(endpos) = endpos {
                    let mut rawstring_newlines = 0usize;
                    code.push(b'"');
                    for p in (i + 3 + delim.len())..endpos {
                        let c = bytes[p];
                        if c == b'\n' {
                            rawstring_newlines += 1;
                            code.extend_from_slice(b"\\n");
                        } else if c.is_ascii_control() || c.is_ascii_whitespace() {
                            code.push(b' ');
                        } else if c == b'"' || c == b'\'' {
                            code.push(b'\\');
                            code.push(c);
                        } else {
                            code.push(c);
                        }
                    }
                    code.push(b'"');
                    if rawstring_newlines > 0 {
                        code.extend(std::iter::repeat(b'\n').take(rawstring_newlines));
                    }
                    previous = b'"';
                    // one past the closing quote
                    i = endpos + delim.len() + 2;
                } else {
                    code.push(b'R');
                    previous = b'R';
                    i += 1;
                }
            } else {
                code.push(ch);
                previous = ch;
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&code).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cppsight_core::CollectingSink;

    fn strip(src: &str) -> String {
        let mut settings = Settings::default();
        let mut sink = CollectingSink::new();
        strip_comments(src, "test.c", &mut settings, &mut sink)
    }

    #[test]
    fn line_comment_becomes_newline() {
        assert_eq!(strip("int a; // note\nint b;\n"), "int a; \nint b;\n");
    }

    #[test]
    fn block_comment_keeps_line_count() {
        assert_eq!(strip("a/*x\ny\nz*/b\n"), "ab\n\n\n");
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        assert_eq!(strip("s = \"// not a comment\";\n"), "s = \"// not a comment\";\n");
        assert_eq!(strip("c = '/';\n"), "c = '/';\n");
    }

    #[test]
    fn string_escapes_are_preserved() {
        assert_eq!(strip("s = \"a\\\"b\";\n"), "s = \"a\\\"b\";\n");
    }

    #[test]
    fn spaces_collapse_outside_strings() {
        assert_eq!(strip("a   b\n"), "a b\n");
        assert_eq!(strip("s = \"a  b\";\n"), "s = \"a  b\";\n");
    }

    #[test]
    fn raw_string_is_rewritten() {
        assert_eq!(strip("s = R\"(ab\"c)\";\n"), "s = \"ab\\\"c\";\n");
        assert_eq!(strip("s = R\"x(a)x\";\n"), "s = \"a\";\n");
    }

    #[test]
    fn raw_string_newlines_are_deferred() {
        let out = strip("s = R\"(a\nb)\";\n");
        assert_eq!(out, "s = \"a\\nb\";\n\n");
    }

    #[test]
    fn inline_suppression_attaches_to_next_code_line() {
        let mut settings = Settings::default();
        settings.inline_suppressions = true;
        let mut sink = CollectingSink::new();
        strip_comments(
            "// cppsight-suppress zerodivcond\nx = 1 / y;\n",
            "test.c",
            &mut settings,
            &mut sink,
        );
        assert!(settings.suppressions.is_suppressed("zerodivcond", "test.c", 2));
        assert!(!settings.suppressions.is_suppressed("zerodivcond", "test.c", 1));
    }

    #[test]
    fn inline_suppression_attaches_to_directive_line() {
        let mut settings = Settings::default();
        settings.inline_suppressions = true;
        let mut sink = CollectingSink::new();
        strip_comments(
            "/* cppsight-suppress missingInclude */\n#include \"x.h\"\n",
            "test.c",
            &mut settings,
            &mut sink,
        );
        assert!(settings.suppressions.is_suppressed("missingInclude", "test.c", 2));
    }

    #[test]
    fn fall_through_comment_suppresses_next_case() {
        let mut settings = Settings::default();
        settings.inline_suppressions = true;
        settings.experimental = true;
        settings.enabled_checks.insert("style".to_string());
        let mut sink = CollectingSink::new();
        strip_comments(
            "switch (x) {\nfoo();\n// fall through\ncase 2:\nbar();\n}\n",
            "test.c",
            &mut settings,
            &mut sink,
        );
        assert!(settings
            .suppressions
            .is_suppressed("switchCaseFallThrough", "test.c", 4));
    }

    #[test]
    fn non_ascii_reports_syntax_error() {
        let mut settings = Settings::default();
        let mut sink = CollectingSink::new();
        strip_comments("int a\u{00e9};\n", "test.c", &mut settings, &mut sink);
        assert!(!sink.with_id("syntaxError").is_empty());
    }

    #[test]
    fn error_directive_keeps_its_text() {
        assert_eq!(strip("#error don't // panic\nok;\n"), "#error don't // panic\nok;\n");
        assert_eq!(strip("#warning /* odd */\n"), "#warning /* odd */\n");
    }

    #[test]
    fn bom_is_skipped() {
        assert_eq!(strip("\u{feff}int a;\n"), "int a;\n");
    }
}
