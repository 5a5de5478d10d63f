//! Directive normalization
//!
//! Rewrites `#`-lines into a canonical shape the later passes can
//! pattern-match: single spaces, `#if (` spacing, redundant parentheses
//! removed, `defined A` parenthesized, whole-condition `defined` turned into
//! `#ifdef`/`#ifndef`, `#if 0` blocks elided and `#asm` blocks rewritten.
//! Content inside string and character literals is left alone.

#[derive(PartialEq, Clone, Copy)]
enum Esc {
    None,
    Single,
    Double,
}

fn cleanup_directive_line(line: &str) -> String {
    let trimmed = line.trim_matches(' ');
    if !trimmed.starts_with('#') {
        // do not mess with regular code
        return line.trim_matches(' ').to_string();
    }

    let bytes = trimmed.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    out.push(b'#');

    let mut esc = Esc::None;
    // starting from a space makes the loop swallow spaces between the `#`
    // and the directive keyword
    let mut prev = b' ';
    let mut need_space = true;

    for &c in &bytes[1..] {
        if esc != Esc::None {
            if prev != b'\\' && esc == Esc::Single && c == b'\'' {
                esc = Esc::None;
            }
            if prev != b'\\' && esc == Esc::Double && c == b'"' {
                esc = Esc::None;
            }
        } else {
            if c == b'"' {
                esc = Esc::Double;
            }
            if c == b'\'' {
                esc = Esc::Single;
            }
        }

        if esc == Esc::None && prev == b' ' && c == b' ' {
            continue;
        }

        if esc == Esc::None {
            if need_space {
                if c == b'(' || c == b'!' {
                    out.push(b' ');
                } else if !c.is_ascii_alphabetic() {
                    need_space = false;
                }
            }
            if c == b'#' {
                need_space = true;
            }
        }

        out.push(c);
        if esc != Esc::None && prev == b'\\' && c == b'\\' {
            prev = b' ';
        } else {
            prev = c;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Trim every line and canonicalize directive spacing
pub(crate) fn cleanup_directives(processed: &str) -> String {
    processed
        .split('\n')
        .map(cleanup_directive_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn erase_pair_runs(line: &mut Vec<u8>, pat: &[u8; 2], erase_second: bool) {
    let mut pos = 0;
    while pos + 1 < line.len() {
        if line[pos] == pat[0] && line[pos + 1] == pat[1] {
            line.remove(if erase_second { pos + 1 } else { pos });
        } else {
            pos += 1;
        }
    }
}

fn line_remove_parentheses(line: &str) -> String {
    let mut line: Vec<u8> = line.as_bytes().to_vec();

    erase_pair_runs(&mut line, b" (", false);
    erase_pair_runs(&mut line, b"( ", true);
    erase_pair_runs(&mut line, b" )", false);
    erase_pair_runs(&mut line, b") ", true);

    // remove inner parentheses: "((..))" loses one pair
    let mut pos = 0;
    while pos + 1 < line.len() {
        if !(line[pos] == b'(' && line[pos + 1] == b'(') {
            pos += 1;
            continue;
        }
        pos += 1;
        if let Some(q) = line[pos + 1..]
            .iter()
            .position(|&c| c == b'(' || c == b')')
        {
            if line[pos + 1 + q] == b')' {
                line.remove(pos + 1 + q);
                line.remove(pos);
            }
        }
    }

    // "#if(A)" => "#if A", but only when the parenthesis pair spans the
    // whole condition
    let prefixed =
        |line: &[u8], p: &[u8]| line.len() >= p.len() && &line[..p.len()] == p;
    if (prefixed(&line, b"#if(") || prefixed(&line, b"#elif(")) && line.last() == Some(&b')') {
        let mut ind = 0i32;
        for i in 0..line.len() {
            if line[i] == b'(' {
                ind += 1;
            } else if line[i] == b')' {
                ind -= 1;
                if ind == 0 {
                    if i == line.len() - 1 {
                        if let Some(open) = line.iter().position(|&c| c == b'(') {
                            line[open] = b' ';
                        }
                        line.pop();
                    }
                    break;
                }
            }
        }
    }

    if prefixed(&line, b"#if(") {
        line.insert(3, b' ');
    } else if prefixed(&line, b"#elif(") {
        line.insert(5, b' ');
    }

    String::from_utf8_lossy(&line).into_owned()
}

/// Normalize parentheses in `#if`/`#elif` conditions
pub(crate) fn remove_parentheses(text: &str) -> String {
    if !text.contains("\n#if") && !text.starts_with("#if") {
        return text.to_string();
    }

    text.split('\n')
        .map(|line| {
            if line.starts_with("#if") || line.starts_with("#elif") {
                line_remove_parentheses(line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Blank out `#if 0` blocks, keeping nested directives, the body of an
/// `#else`/`#elif` branch, and one newline per removed line
pub(crate) fn remove_if0(code: &str) -> String {
    if !code.contains("#if 0\n") {
        return code.to_string();
    }

    let mut ret = String::with_capacity(code.len());
    let mut it = code.lines();
    while let Some(line) = it.next() {
        ret.push_str(line);
        ret.push('\n');
        if line != "#if 0" {
            continue;
        }

        let mut level = 1u32;
        let mut in_else = false;
        while level > 0 {
            let Some(line) = it.next() else { break };
            if line.starts_with("#if") {
                level += 1;
            } else if line == "#endif" {
                level -= 1;
            } else if line == "#else" || line.starts_with("#elif") {
                if level == 1 {
                    in_else = true;
                }
            } else {
                if in_else {
                    ret.push_str(line);
                }
                ret.push('\n');
                continue;
            }
            ret.push_str(line);
            ret.push('\n');
        }
    }
    ret
}

/// Rewrite `defined A` into `defined(A)` on `#if`/`#elif` lines
pub(crate) fn parenthesize_defined(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if !(line.starts_with("#if ") || line.starts_with("#elif ")) {
                return line.to_string();
            }
            let mut line: Vec<u8> = line.as_bytes().to_vec();
            while let Some(pos) = find_sub(&line, 0, b" defined ") {
                line[pos + 8] = b'(';
                match line[pos + 8..]
                    .iter()
                    .position(|&c| c == b' ' || c == b'|' || c == b'&')
                {
                    Some(q) => line.insert(pos + 8 + q, b')'),
                    None => line.push(b')'),
                }
            }
            String::from_utf8_lossy(&line).into_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn find_sub(bytes: &[u8], from: usize, pat: &[u8]) -> Option<usize> {
    if pat.is_empty() || bytes.len() < pat.len() {
        return None;
    }
    (from.min(bytes.len())..=bytes.len() - pat.len()).find(|&p| &bytes[p..p + pat.len()] == pat)
}

/// `#if defined(X)` => `#ifdef X` and friends, only when the `defined`
/// clause is the entire condition
pub(crate) fn replace_if_defined(text: &str) -> String {
    let mut ret: Vec<u8> = text.as_bytes().to_vec();

    let mut pos = 0;
    while let Some(p) = find_sub(&ret, pos, b"#if defined(") {
        if let Some(close) = ret[p + 9..].iter().position(|&c| c == b')') {
            let close = p + 9 + close;
            if ret.get(close + 1) == Some(&b'\n') {
                ret.remove(close);
                ret.drain(p + 3..p + 3 + 9); // " defined("
                for (k, b) in b"def ".iter().enumerate() {
                    ret.insert(p + 3 + k, *b);
                }
            }
        } else {
            break;
        }
        pos = p + 1;
    }

    pos = 0;
    while let Some(p) = find_sub(&ret, pos, b"#if !defined(") {
        if let Some(close) = ret[p + 9..].iter().position(|&c| c == b')') {
            let close = p + 9 + close;
            if ret.get(close + 1) == Some(&b'\n') {
                ret.remove(close);
                ret.drain(p + 3..p + 3 + 10); // " !defined("
                for (k, b) in b"ndef ".iter().enumerate() {
                    ret.insert(p + 3 + k, *b);
                }
            }
        } else {
            break;
        }
        pos = p + 1;
    }

    pos = 0;
    while let Some(p) = find_sub(&ret, pos, b"#elif defined(") {
        if let Some(close) = ret[p + 9..].iter().position(|&c| c == b')') {
            let close = p + 9 + close;
            if ret.get(close + 1) == Some(&b'\n') {
                ret.remove(close);
                ret.drain(p + 6..p + 6 + 8); // "defined("
            }
        } else {
            break;
        }
        pos = p + 1;
    }

    String::from_utf8_lossy(&ret).into_owned()
}

/// Rewrite `#asm` .. `#endasm` blocks into `asm( .. );`
pub(crate) fn remove_asm(text: &str) -> String {
    let mut ret: Vec<u8> = text.as_bytes().to_vec();

    let mut pos = 0;
    while let Some(p) = find_sub(&ret, pos, b"#asm\n") {
        ret.splice(p..p + 4, b"asm(".iter().copied());
        match find_sub(&ret, p, b"#endasm") {
            Some(p2) => {
                ret.splice(p2..p2 + 7, b");".iter().copied());
                pos = p2;
            }
            None => pos = p + 4,
        }
    }

    String::from_utf8_lossy(&ret).into_owned()
}
