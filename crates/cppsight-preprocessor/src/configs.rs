//! Configuration enumeration
//!
//! Walks cleaned, include-expanded source and derives the set of `#ifdef`
//! configurations worth analyzing, as canonical `;`-joined identifier sets.
//! The empty configuration is always part of the result.

use std::collections::{BTreeMap, BTreeSet};

use cppsight_core::{Diagnostic, ErrorSink, Settings, Severity};

use crate::condition::simplify_condition;
use crate::tokens::{is_name, tokenize};

/// Join string parts with a separator
pub(crate) fn join(parts: &BTreeSet<String>, separator: char) -> String {
    let mut s = String::new();
    for part in parts {
        if !s.is_empty() {
            s.push(separator);
        }
        s.push_str(part);
    }
    s
}

/// Sort and deduplicate the separator-joined parts of `s`
pub(crate) fn unify(s: &str, separator: char) -> String {
    let parts: BTreeSet<String> = s
        .split(separator)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    join(&parts, separator)
}

/// Extract the guard identifier from a conditional directive line.
/// With `def` the line must be a positive guard (`#ifdef`, `#if`, `#elif`),
/// without it a negative one (`#ifndef`, `#elif !`).
pub(crate) fn getdef(line: &str, def: bool) -> String {
    if !line.starts_with('#') {
        return String::new();
    }

    if def
        && !line.starts_with("#ifdef ")
        && !line.starts_with("#if ")
        && (!line.starts_with("#elif ") || line.starts_with("#elif !"))
    {
        return String::new();
    }

    if !def && !line.starts_with("#ifndef ") && !line.starts_with("#elif !") {
        return String::new();
    }

    // drop the directive keyword
    let mut line: Vec<u8> = if let Some(rest) = line.strip_prefix("#if defined ") {
        let mut v = b" ".to_vec();
        v.extend_from_slice(rest.as_bytes());
        v
    } else if let Some(rest) = line.strip_prefix("#elif !defined(") {
        let mut v: Vec<u8> = rest.as_bytes().to_vec();
        if let Some(pos) = v.iter().position(|&c| c == b')') {
            v.remove(pos);
        }
        v
    } else {
        match line.bytes().position(|c| c == b' ') {
            Some(pos) => line.as_bytes()[pos..].to_vec(),
            None => Vec::new(),
        }
    };

    // remove spaces, except between two identifier characters
    let ident = |c: u8| c.is_ascii_alphanumeric() || c == b'_';
    let mut pos = 0;
    while pos < line.len() {
        if line[pos] != b' ' {
            pos += 1;
            continue;
        }
        let chprev = if pos > 0 { line[pos - 1] } else { 0 };
        let chnext = if pos + 1 < line.len() { line[pos + 1] } else { 0 };
        if ident(chprev) && ident(chnext) {
            pos += 1;
        } else {
            line.remove(pos);
        }
    }

    String::from_utf8_lossy(&line).into_owned()
}

/// Enumerate the `#ifdef` configurations of the given cleaned source
pub(crate) fn getcfgs(
    filedata: &str,
    filename: &str,
    settings: &Settings,
    sink: &mut dyn ErrorSink,
) -> Vec<String> {
    let mut ret: Vec<String> = vec![String::new()];

    let mut deflist: Vec<String> = Vec::new();
    let mut ndeflist: Vec<String> = Vec::new();

    // constants defined through "#define" in the code
    let mut defines: BTreeSet<String> = BTreeSet::new();

    // between "#file" and the first non-#if line, conditionals look like an
    // include guard and contribute no configuration
    let mut includeguard = false;

    let mut linenr: u32 = 0;
    for raw_line in filedata.lines() {
        linenr += 1;
        sink.report_progress(filename, "Preprocessing (get configurations 1)", 0);

        if raw_line.is_empty() {
            continue;
        }

        if raw_line.starts_with("#file ") {
            includeguard = true;
            continue;
        }
        if raw_line == "#endfile" {
            includeguard = false;
            continue;
        }

        let mut line = raw_line.to_string();
        if let Some(rest) = raw_line.strip_prefix("#define ") {
            let bytes = rest.as_bytes();
            let mut valid = true;
            for (idx, &ch) in bytes.iter().enumerate() {
                if ch == b' ' {
                    break;
                }
                if ch == b'_'
                    || ch.is_ascii_alphabetic()
                    || (idx > 0 && ch.is_ascii_digit())
                {
                    continue;
                }
                valid = false;
                break;
            }
            if !valid {
                line.clear();
            } else if let Some(space) = rest.find(' ') {
                let mut s = rest.to_string();
                s.replace_range(space..space + 1, "=");
                defines.insert(s);
            } else {
                defines.insert(rest.to_string());
            }
        }

        if !line.is_empty() && !line.starts_with("#if") {
            includeguard = false;
        }

        if line.is_empty() || !line.starts_with('#') {
            continue;
        }

        if includeguard {
            continue;
        }

        let mut from_negation = false;

        let mut def = getdef(&line, true);
        if def.is_empty() {
            def = getdef(&line, false);
            // sub conditionals of ndef blocks are constructed without the
            // negated define
            if !def.is_empty() {
                from_negation = true;
            }
        }

        if !def.is_empty() {
            let mut par = 0i32;
            for b in def.bytes() {
                if b == b'(' {
                    par += 1;
                } else if b == b')' {
                    par -= 1;
                    if par < 0 {
                        break;
                    }
                }
            }
            if par != 0 {
                sink.report(
                    &Diagnostic::new(
                        Severity::Error,
                        format!("preprocessor{}", line!()),
                        format!("mismatching number of '(' and ')' in this line: {}", def),
                    )
                    .with_location(filename, linenr),
                );
                return Vec::new();
            }

            // replace constants that already have a value
            let mut varmap: BTreeMap<String, String> = BTreeMap::new();
            for d in &defines {
                if let Some(eq) = d.find('=') {
                    varmap.insert(d[..eq].to_string(), d[eq + 1..].to_string());
                }
            }
            simplify_condition(&varmap, &mut def, false);

            if !deflist.is_empty() && line.starts_with("#elif ") {
                deflist.pop();
            }
            deflist.push(def);

            let mut cfg = String::new();
            for item in &deflist {
                if item == "0" {
                    break;
                }
                if item == "1" || item == "!" {
                    continue;
                }
                // treat two or more identical nested conditions as one
                if cfg != *item {
                    if !cfg.is_empty() {
                        cfg.push(';');
                    }
                    cfg.push_str(item);
                }
            }

            if from_negation {
                ndeflist.push(deflist.last().cloned().unwrap_or_default());
                if let Some(top) = deflist.last_mut() {
                    *top = "!".to_string();
                }
            }

            if !ret.contains(&cfg) {
                ret.push(cfg);
            }
        } else if line.starts_with("#else") && !deflist.is_empty() {
            if deflist.last().map(String::as_str) == Some("!") {
                if let (Some(top), Some(saved)) = (deflist.last_mut(), ndeflist.pop()) {
                    *top = saved;
                }
            } else if let Some(top) = deflist.last_mut() {
                *top = if top == "1" { "0" } else { "1" }.to_string();
            }
        } else if line.starts_with("#endif") && !deflist.is_empty() {
            if deflist.last().map(String::as_str) == Some("!") {
                ndeflist.pop();
            }
            deflist.pop();
        }
    }

    // remove configurations that match symbols the code itself defines
    let total = ret.len().max(1) as u32;
    for (count, item) in ret.iter_mut().enumerate() {
        sink.report_progress(
            filename,
            "Preprocessing (get configurations 2)",
            (100 * count as u32) / total,
        );

        let mut cfg = item.clone();
        for d in &defines {
            let define_name = match d.find('=') {
                Some(eq) => &d[..eq],
                None => d.as_str(),
            };
            if define_name.is_empty() {
                continue;
            }

            let mut pos = 0;
            while let Some(p) = cfg[pos..].find(define_name).map(|q| q + pos) {
                pos = p + 1;
                if p > 0 && cfg.as_bytes()[p - 1] != b';' {
                    continue;
                }
                let end = p + define_name.len();
                if end < cfg.len() && cfg.as_bytes()[end] != b';' {
                    continue;
                }
                cfg.replace_range(p..end, "");
                pos = p;
            }
        }
        if cfg.len() != item.len() {
            while cfg.starts_with(';') {
                cfg.remove(0);
            }
            while cfg.ends_with(';') {
                cfg.pop();
            }
            while let Some(p) = cfg.find(";;") {
                cfg.remove(p);
            }
            *item = cfg;
        }
    }

    // project "defined(A) && defined(B)" style configurations onto "A;B"
    for item in ret.iter_mut() {
        if !item.contains("&&") {
            continue;
        }

        if item.bytes().filter(|&b| b == b'"').count() % 2 != 0 {
            sink.report(
                &Diagnostic::new(
                    Severity::Error,
                    format!("preprocessor{}", line!()),
                    format!("Error parsing this: {}", item),
                )
                .with_location(filename, 1),
            );
            continue;
        }

        let toks = tokenize(item);
        let mut var_list: BTreeSet<String> = BTreeSet::new();
        let mut i = 0;
        loop {
            if i + 3 < toks.len()
                && toks[i] == "defined"
                && toks[i + 1] == "("
                && is_name(&toks[i + 2])
                && toks[i + 3] == ")"
            {
                var_list.insert(toks[i + 2].clone());
                i += 4;
                if toks.get(i).map(String::as_str) == Some("&&") {
                    i += 1;
                }
            } else if i + 1 < toks.len() && is_name(&toks[i]) && toks[i + 1] == ";" {
                var_list.insert(toks[i].clone());
                i += 2;
            } else {
                break;
            }
        }

        let s = join(&var_list, ';');
        if !s.is_empty() {
            *item = s;
        }
    }

    // canonical form: B;C;A => A;B;C
    for item in ret.iter_mut() {
        *item = unify(item, ';');
    }

    ret.sort();
    ret.dedup();

    // drop configurations the later passes cannot handle
    ret.retain(|item| {
        let s = format!("{};", item);
        let bytes = s.as_bytes();
        let mut unhandled = false;

        let mut pos = 0;
        while pos < bytes.len() {
            let c = bytes[pos];
            if c == b';' {
                pos += 1;
                continue;
            }
            if c.is_ascii_alphabetic() || c == b'_' {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                if pos < bytes.len() && bytes[pos] == b'=' {
                    pos += 1;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                    if pos >= bytes.len() || bytes[pos] != b';' {
                        unhandled = true;
                        break;
                    }
                }
                continue;
            }
            unhandled = true;
            break;
        }

        if unhandled && settings.debug_warnings {
            sink.report(&Diagnostic::new(
                Severity::Debug,
                "debug",
                format!("unhandled configuration: {}", item),
            ));
        }
        !unhandled
    });

    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use cppsight_core::CollectingSink;

    fn cfgs(src: &str) -> Vec<String> {
        let settings = Settings::default();
        let mut sink = CollectingSink::new();
        getcfgs(src, "test.c", &settings, &mut sink)
    }

    #[test]
    fn getdef_variants() {
        assert_eq!(getdef("#ifdef A", true), "A");
        assert_eq!(getdef("#ifdef A", false), "");
        assert_eq!(getdef("#ifndef A", false), "A");
        assert_eq!(getdef("#if defined X", true), "X");
        assert_eq!(getdef("#elif !defined(X)", false), "X");
        assert_eq!(getdef("#if A && B", true), "A&&B");
        assert_eq!(getdef("#if A B", true), "A B");
        assert_eq!(getdef("#elif !X", true), "");
        assert_eq!(getdef("plain code", true), "");
    }

    #[test]
    fn unify_is_idempotent() {
        assert_eq!(unify("B;A;B", ';'), "A;B");
        assert_eq!(unify(&unify("C;A;B;A", ';'), ';'), unify("C;A;B;A", ';'));
        assert_eq!(unify("", ';'), "");
    }

    #[test]
    fn sibling_guards() {
        assert_eq!(
            cfgs("#ifdef A\nx\n#endif\n#ifdef B\ny\n#endif\n"),
            ["", "A", "B"]
        );
    }

    #[test]
    fn nested_guard_with_else() {
        assert_eq!(
            cfgs("#ifdef A\n#ifdef B\nx\n#else\ny\n#endif\n#endif\n"),
            ["", "A", "A;B"]
        );
    }

    #[test]
    fn ifndef_contributes_but_not_to_children() {
        assert_eq!(cfgs("#ifndef A\n#ifdef B\nx\n#endif\n#endif\n"), ["", "A", "B"]);
    }

    #[test]
    fn defined_symbols_are_not_enumerated() {
        assert_eq!(cfgs("#ifdef A\n#define A 1\n#endif\n"), [""]);
    }

    #[test]
    fn and_conditions_project_to_identifier_sets() {
        assert_eq!(
            cfgs("#if defined(A) && defined(B)\nx\n#endif\n"),
            ["", "A;B"]
        );
    }

    #[test]
    fn results_are_sorted_and_unique() {
        let out = cfgs("#ifdef B\n#endif\n#ifdef A\n#endif\n#ifdef B\n#endif\n");
        assert_eq!(out, ["", "A", "B"]);
        let mut sorted = out.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(out, sorted);
    }

    #[test]
    fn include_guard_is_not_a_configuration() {
        let src = "#file \"h.h\"\n#ifndef H_H\n#define H_H\nint x;\n#endif\n#endfile\n#ifdef A\n#endif\n";
        assert_eq!(cfgs(src), ["", "A"]);
    }

    #[test]
    fn unhandled_configurations_are_dropped() {
        let mut settings = Settings::default();
        settings.debug_warnings = true;
        let mut sink = CollectingSink::new();
        let out = getcfgs("#if A+B\nx\n#endif\n", "test.c", &settings, &mut sink);
        assert_eq!(out, [""]);
        assert!(!sink.with_id("debug").is_empty());
    }

    #[test]
    fn value_configurations_are_kept() {
        assert_eq!(cfgs("#ifdef A\n#endif\n"), ["", "A"]);
        // "#if X" with a defined value collapses via the varmap
        assert_eq!(cfgs("#define X 1\n#if X\n#endif\n"), [""]);
    }

    #[test]
    fn mismatched_parens_abort_enumeration() {
        let settings = Settings::default();
        let mut sink = CollectingSink::new();
        let out = getcfgs("#if (A\n#endif\n", "test.c", &settings, &mut sink);
        assert!(out.is_empty());
        assert!(sink
            .diagnostics
            .iter()
            .any(|d| d.id.starts_with("preprocessor") && d.severity == Severity::Error));
    }
}
