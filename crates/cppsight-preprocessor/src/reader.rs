//! Character-level cleanup
//!
//! Normalizes line endings, replaces stray control characters with spaces
//! and joins backslash-continued lines. Joined lines are paid back as extra
//! newlines on the next real line break so the total line count never
//! changes.

fn is_space_or_cntrl(ch: u8) -> bool {
    ch.is_ascii_whitespace() || ch.is_ascii_control()
}

/// Read one logical character. `\r\n` and `\r` both collapse to `\n`.
fn read_char(bytes: &[u8], i: &mut usize) -> Option<u8> {
    if *i >= bytes.len() {
        return None;
    }
    let mut ch = bytes[*i];
    *i += 1;
    if ch == b'\r' {
        ch = b'\n';
        if bytes.get(*i) == Some(&b'\n') {
            *i += 1;
        }
    }
    Some(ch)
}

fn peek_char(bytes: &[u8], i: usize) -> Option<u8> {
    bytes.get(i).map(|&b| if b == b'\r' { b'\n' } else { b })
}

/// Normalize raw source text. This is the first pipeline stage; everything
/// downstream assumes `\n` line endings and spliced continuation lines.
pub(crate) fn normalize(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());

    // Number of <backslash><newline> splices consumed since the last real
    // newline; reinserted there to keep line numbers stable.
    let mut pending_newlines = 0usize;

    let mut i = 0usize;
    while let Some(mut ch) = read_char(bytes, &mut i) {
        if ch & 0x80 == 0 && ch != b'\n' && is_space_or_cntrl(ch) {
            ch = b' ';
        }

        if ch == b'\\' {
            let next = if cfg!(feature = "splice-keeps-spaces") {
                peek_char(bytes, i)
            } else {
                // gcc convention: whitespace between the backslash and the
                // newline still splices
                loop {
                    match peek_char(bytes, i) {
                        Some(c) if c != b'\n' && is_space_or_cntrl(c) => {
                            read_char(bytes, &mut i);
                        }
                        other => break other,
                    }
                }
            };

            if next == Some(b'\n') {
                pending_newlines += 1;
                read_char(bytes, &mut i);
            } else {
                out.push(b'\\');
            }
        } else {
            out.push(ch);
            if ch == b'\n' && pending_newlines > 0 {
                out.extend(std::iter::repeat(b'\n').take(pending_newlines));
                pending_newlines = 0;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_splice_keeps_line_count() {
        assert_eq!(normalize("a\\\nb\n"), "ab\n\n");
    }

    #[test]
    fn multiple_splices_pay_back_on_next_newline() {
        assert_eq!(normalize("a\\\nb\\\nc\nd\n"), "abc\n\n\nd\n");
    }

    #[test]
    fn crlf_and_lone_cr_collapse() {
        assert_eq!(normalize("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn control_chars_become_spaces() {
        assert_eq!(normalize("a\tb\x0bc\n"), "a b c\n");
    }

    #[test]
    fn splice_through_trailing_spaces() {
        // gcc behavior (default feature set): trailing spaces do not defeat
        // the splice
        #[cfg(not(feature = "splice-keeps-spaces"))]
        assert_eq!(normalize("a\\  \nb\n"), "ab\n\n");
    }

    #[test]
    fn lone_backslash_is_preserved() {
        assert_eq!(normalize("a\\b\n"), "a\\b\n");
        assert_eq!(normalize("a\\"), "a\\");
    }

    #[test]
    fn line_count_is_invariant() {
        for src in ["x\n", "a\\\nb\nc\r\nd\re\n", "\\\n\\\n\n", "q\\ \t\nr\n"] {
            let before = src.replace("\r\n", "\n").replace('\r', "\n");
            let n_before = before.matches('\n').count();
            let n_after = normalize(src).matches('\n').count();
            assert_eq!(n_before, n_after, "line count changed for {:?}", src);
        }
    }
}
