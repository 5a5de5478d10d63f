//! Macro expansion
//!
//! Parses `#define` records and expands calls statement by statement.
//! Expanded text is tagged with a leading `$` so the downstream tokenizer can
//! tell it apart from code that was written by hand. Re-expansion of a macro
//! inside its own output is blocked with per-macro limits measured from the
//! end of the line.

use std::collections::BTreeMap;

use cppsight_core::{Diagnostic, ErrorSink, Severity};

use crate::tokens::{is_name, is_number, tokenize};

/// Skip a string or character literal; `pos` points at the opening quote on
/// entry and the closing quote (or end of input) on exit.
pub(crate) fn skipstring(bytes: &[u8], pos: &mut usize) {
    let ch = bytes[*pos];
    *pos += 1;
    while *pos < bytes.len() && bytes[*pos] != ch {
        if bytes[*pos] == b'\\' {
            *pos += 1;
        }
        *pos += 1;
    }
}

/// Parse a parenthesized argument list. `pos` points at the `(` (or one
/// space before it) on entry and at the closing `)` on exit. Returns the
/// arguments, the number of newlines consumed and whether the closing
/// parenthesis was found at all.
pub(crate) fn getparams(line: &str, pos: &mut usize) -> (Vec<String>, usize, bool) {
    let bytes = line.as_bytes();
    let mut params: Vec<String> = Vec::new();
    let mut newlines = 0usize;
    let mut end_found = false;

    if bytes.get(*pos) == Some(&b' ') {
        *pos += 1;
    }
    if bytes.get(*pos) != Some(&b'(') {
        return (params, newlines, end_found);
    }

    let mut parlevel = 0i32;
    let mut par = String::new();

    while *pos < bytes.len() {
        let ch = bytes[*pos];

        if ch == b'(' {
            parlevel += 1;
            if parlevel == 1 {
                *pos += 1;
                continue;
            }
        } else if ch == b')' {
            parlevel -= 1;
            if parlevel <= 0 {
                end_found = true;
                params.push(par);
                return (params, newlines, end_found);
            }
        } else if ch == b'"' || ch == b'\'' {
            let start = *pos;
            skipstring(bytes, pos);
            if *pos == bytes.len() {
                break;
            }
            par.push_str(&line[start..*pos + 1]);
            *pos += 1;
            continue;
        } else if ch == b'\n' {
            newlines += 1;
            *pos += 1;
            continue;
        }

        if parlevel == 1 && ch == b',' {
            params.push(std::mem::take(&mut par));
        } else if ch == b' ' {
            // spaces are only kept between word characters
            if par.bytes().last().is_some_and(|c| c.is_ascii_alphanumeric()) {
                par.push(' ');
            }
        } else if parlevel >= 1 {
            par.push(ch as char);
        }
        *pos += 1;
    }

    (params, newlines, end_found)
}

/// One `#define` record
#[derive(Debug, Clone)]
pub(crate) struct MacroDef {
    name: String,
    params: Vec<String>,
    variadic: bool,
    nopar: bool,
    /// definition as written, starting with the macro name
    text: String,
    /// the definition tokenized once at parse time
    tokens: Vec<String>,
}

impl MacroDef {
    /// Parse the text after `#define`, e.g. `A(x) foo(x);`
    pub(crate) fn new(text: &str) -> Self {
        let tokens = tokenize(text);

        let name = match tokens.first() {
            Some(tok) if is_name(tok) => tok.clone(),
            _ => String::new(),
        };

        let mut params: Vec<String> = Vec::new();
        let mut variadic = false;
        let mut nopar = false;

        let paren_first = text
            .find([' ', '('])
            .is_some_and(|p| text.as_bytes()[p] == b'(');
        if paren_first && tokens.len() >= 3 && tokens[1] == "(" {
            if is_name(&tokens[2]) {
                let mut prev = "";
                for tok in &tokens[2..] {
                    if tok == ")" {
                        break;
                    }
                    if tok == "..." {
                        if prev == "," {
                            params.push("__VA_ARGS__".to_string());
                        }
                        variadic = true;
                        break;
                    }
                    if is_name(tok) {
                        params.push(tok.clone());
                    }
                    prev = tok;
                }
            } else if tokens[2] == "..." && tokens.get(3).map(String::as_str) == Some(")") {
                variadic = true;
            } else if tokens[2] == ")" {
                nopar = true;
            }
        }

        Self {
            name,
            params,
            variadic,
            nopar,
            text: text.to_string(),
            tokens,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn params(&self) -> &[String] {
        &self.params
    }

    pub(crate) fn variadic(&self) -> bool {
        self.variadic
    }

    pub(crate) fn nopar(&self) -> bool {
        self.nopar
    }

    /// Pre-expand arguments of the shape `inner(..)` when the whole body is
    /// a call of `inner` forwarding every parameter. The inner call gets a
    /// macro table without itself, which blocks self recursion.
    fn expand_inner_macros(
        &self,
        params1: &[String],
        macros: &BTreeMap<String, MacroDef>,
    ) -> Vec<String> {
        let Some(close) = self.tokens.iter().position(|t| t == ")") else {
            return params1.to_vec();
        };

        let inner_name = match self.tokens.get(close + 1) {
            Some(tok) if is_name(tok) && self.tokens.get(close + 2).map(String::as_str) == Some("(") => {
                tok.clone()
            }
            _ => return params1.to_vec(),
        };

        let mut i = close + 3;
        let mut par = 0usize;
        while i + 1 < self.tokens.len()
            && is_name(&self.tokens[i])
            && matches!(self.tokens[i + 1].as_str(), "," | ")")
        {
            i += 2;
            par += 1;
        }
        if i != self.tokens.len() || par != params1.len() {
            return params1.to_vec();
        }

        let mut params2 = params1.to_vec();
        let prefix = format!("{}(", inner_name);
        for (ipar, param) in params1.iter().enumerate() {
            if !param.starts_with(&prefix) || !param.ends_with(')') {
                continue;
            }
            let mut pos = prefix.len() - 1;
            let (innerparams, newlines, end_found) = getparams(param, &mut pos);
            if pos == param.len() - 1
                && newlines == 0
                && end_found
                && innerparams.len() == params1.len()
            {
                if let Some(inner) = macros.get(&inner_name) {
                    let mut innermacros = macros.clone();
                    innermacros.remove(&inner_name);
                    params2[ipar] = inner.code(&innerparams, &innermacros).unwrap_or_default();
                }
            }
        }
        params2
    }

    /// Build the expansion for one call. `Err` means the caller passed too
    /// few parameters, which is fatal for the whole expansion run.
    pub(crate) fn code(
        &self,
        params2: &[String],
        macros: &BTreeMap<String, MacroDef>,
    ) -> Result<String, ()> {
        if self.nopar || (self.params.is_empty() && self.variadic) {
            let mut macrocode = match self.text.find(')') {
                Some(p) => self.text[p + 1..].to_string(),
                None => self.text.clone(),
            };
            if macrocode.is_empty() {
                return Ok(macrocode);
            }

            match macrocode.find(|c| c != ' ') {
                Some(p) if p > 0 => {
                    macrocode.drain(..p);
                }
                None => macrocode.clear(),
                _ => {}
            }
            if let Some(p) = macrocode.find(['\r', '\n']) {
                macrocode.truncate(p);
            }

            if !self.nopar {
                let joined = params2.join(",");
                macrocode = macrocode.replace("__VA_ARGS__", &joined);
            }
            return Ok(macrocode);
        }

        if self.params.is_empty() {
            // object-like macro: everything after the name
            let Some(mut p) = self.text.find([' ', '"']) else {
                return Ok(String::new());
            };
            if self.text.as_bytes()[p] == b' ' {
                p += 1;
            }
            let mut macrocode = self.text[p..].to_string();
            if let Some(q) = macrocode.find(['\r', '\n']) {
                macrocode.truncate(q);
            }
            return Ok(macrocode);
        }

        let given = self.expand_inner_macros(params2, macros);

        let Some(close) = self.tokens.iter().position(|t| t == ")") else {
            return Ok(String::new());
        };
        let body = &self.tokens[close + 1..];

        let mut macrocode = String::new();
        let mut optcomma = false;
        let mut idx = 0usize;
        while idx < body.len() {
            let tok = &body[idx];
            let mut text = tok.clone();

            if text == "##" {
                idx += 1;
                continue;
            }

            if text.starts_with('#') || is_name(&text) {
                let stringify = text.starts_with('#');
                if stringify {
                    text.remove(0);
                }

                for i in 0..self.params.len() {
                    if text != self.params[i] {
                        continue;
                    }

                    if self.variadic
                        && (i == self.params.len() - 1
                            || (given.len() + 2 == self.params.len()
                                && i + 1 == self.params.len() - 1))
                    {
                        text = String::new();
                        for j in (self.params.len() - 1)..given.len() {
                            if optcomma || j > self.params.len() - 1 {
                                text.push(',');
                            }
                            optcomma = false;
                            text.push_str(&given[j]);
                        }
                    } else if i >= given.len() {
                        // macro has more parameters than the caller used
                        return Err(());
                    } else if stringify {
                        let mut quoted = String::from("\"");
                        for c in given[i].chars() {
                            if c == '\\' || c == '"' {
                                quoted.push('\\');
                            }
                            quoted.push(c);
                        }
                        quoted.push('"');
                        text = quoted;
                    } else {
                        text = given[i].clone();
                    }
                    break;
                }

                // substitute object-like macros, but never across `##`
                let pasted = idx > 0 && body[idx - 1] == "##";
                if !pasted {
                    if let Some(other) = macros.get(&text) {
                        if !other.text.contains('(') {
                            text = match other.text.find(' ') {
                                Some(p) => other.text[p..].to_string(),
                                None => String::new(),
                            };
                        }
                    }
                }
            }

            if self.variadic
                && tok == ","
                && body.get(idx + 1).map(String::as_str) == Some("##")
            {
                optcomma = true;
                idx += 1;
                continue;
            }
            optcomma = false;

            macrocode.push_str(&text);

            if let Some(next) = body.get(idx + 1) {
                let needs_space = (is_name(tok) && is_name(next))
                    || (is_name(tok) && is_number(next))
                    || (is_number(tok) && is_name(next))
                    || (tok == ">" && next == ">");
                if needs_space {
                    macrocode.push(' ');
                }
            }
            idx += 1;
        }

        Ok(macrocode)
    }
}

/// Statement-oriented line reader. A returned chunk never ends inside a
/// parenthesized expression or a string, so a macro call that spans lines
/// arrives in one piece. Directive lines are returned on their own, without
/// the trailing newline.
pub(crate) fn getlines(bytes: &[u8], pos: &mut usize) -> Option<String> {
    if *pos >= bytes.len() {
        return None;
    }

    let mut line = String::new();
    let mut parlevel = 0i32;

    while *pos < bytes.len() {
        let ch = bytes[*pos];
        *pos += 1;

        if ch == b'\'' || ch == b'"' {
            line.push(ch as char);
            let mut c = 0u8;
            while c != ch {
                if c == b'\\' {
                    let Some(&esc) = bytes.get(*pos) else {
                        return Some(line);
                    };
                    *pos += 1;
                    line.push(esc as char);
                }
                let Some(&next) = bytes.get(*pos) else {
                    return Some(line);
                };
                *pos += 1;
                c = next;
                if c == b'\n' && line.starts_with('#') {
                    return Some(line);
                }
                line.push(c as char);
            }
            continue;
        }

        if ch == b'(' {
            parlevel += 1;
        } else if ch == b')' {
            parlevel -= 1;
        } else if ch == b'\n' {
            if line.starts_with('#') {
                return Some(line);
            }
            if bytes.get(*pos) == Some(&b'#') {
                line.push('\n');
                return Some(line);
            }
        } else if !line.starts_with('#') && parlevel <= 0 && ch == b';' {
            line.push(';');
            return Some(line);
        }

        line.push(ch as char);
    }
    Some(line)
}

/// Expand all macros in already-emitted per-configuration text. On a fatal
/// problem (unterminated literal, too few macro arguments) a diagnostic is
/// reported and the empty string is returned.
pub(crate) fn expand_macros(code: &str, filename: &str, sink: &mut dyn ErrorSink) -> String {
    let mut macros: BTreeMap<String, MacroDef> = BTreeMap::new();

    let mut linenr: u32 = 1;
    // (line, file) saved across #file/#endfile
    let mut fileinfo: Vec<(u32, String)> = Vec::new();
    let mut filename = filename.to_string();

    let mut ostr = String::with_capacity(code.len());
    let bytes = code.as_bytes();
    let mut stream_pos = 0usize;

    while let Some(mut line) = getlines(bytes, &mut stream_pos) {
        if let Some(rest) = line.strip_prefix("#define ") {
            let macro_def = MacroDef::new(rest);
            if macro_def.name().is_empty() || macro_def.name() == "BOOST_FOREACH" {
                // BOOST_FOREACH is too complex to parse, skip it
            } else {
                macros.insert(macro_def.name().to_string(), macro_def);
            }
            line = "\n".to_string();
        } else if let Some(rest) = line.strip_prefix("#undef ") {
            macros.remove(rest);
            line = "\n".to_string();
        } else if line.starts_with("#file \"") && line.len() > 7 && line.ends_with('"') {
            fileinfo.push((linenr, filename.clone()));
            filename = line[7..line.len() - 1].to_string();
            linenr = 0;
            line.push('\n');
        } else if line == "#endfile" {
            if let Some((saved_line, saved_file)) = fileinfo.pop() {
                linenr = saved_line;
                filename = saved_file;
            }
            line.push('\n');
        } else if line.starts_with('#') {
            // every other directive was already handled, keep the line break
            line.push('\n');
        } else {
            // Expansion limits, keyed by macro name. A limit is the distance
            // from the end of the line before which the macro must not be
            // expanded again; inserting or deleting text before the limit
            // keeps it valid.
            let mut limits: BTreeMap<String, usize> = BTreeMap::new();

            let mut pos = 0usize;
            let mut tmp_linenr: u32 = 0;
            while pos < line.len() {
                if line.as_bytes()[pos] == b'\n' {
                    tmp_linenr += 1;
                }

                if matches!(line.as_bytes()[pos], b'"' | b'\'') {
                    let quote = line.as_bytes()[pos];
                    skipstring(line.as_bytes(), &mut pos);
                    pos += 1;

                    if pos >= line.len() {
                        sink.report(
                            &Diagnostic::new(
                                Severity::Error,
                                "noQuoteCharPair",
                                format!(
                                    "No pair for character ({}). Can't process file. \
                                     File is either invalid or unicode, which is \
                                     currently not supported.",
                                    quote as char
                                ),
                            )
                            .with_location(&filename, linenr + tmp_linenr),
                        );
                        return String::new();
                    }
                    continue;
                }

                let ident_start = |c: u8| c.is_ascii_alphabetic() || c == b'_';
                if !ident_start(line.as_bytes()[pos]) {
                    pos += 1;
                }

                // the loop re-scans in case an expansion immediately reveals
                // another macro call
                while pos < line.len() && ident_start(line.as_bytes()[pos]) {
                    let pos1 = pos;
                    pos += 1;
                    while pos < line.len()
                        && (line.as_bytes()[pos].is_ascii_alphanumeric()
                            || line.as_bytes()[pos] == b'_')
                    {
                        pos += 1;
                    }
                    let id = line[pos1..pos].to_string();

                    let Some(macro_def) = macros.get(&id) else { break };

                    if let Some(&limit) = limits.get(&id) {
                        if limit > line.len() || pos <= line.len() - limit {
                            break;
                        }
                    }

                    let mut pos2 = pos;
                    if !macro_def.params().is_empty() && pos2 >= line.len() {
                        break;
                    }

                    let mut params: Vec<String> = Vec::new();
                    let mut newline_count = 0usize;
                    let takes_args = macro_def.variadic()
                        || macro_def.nopar()
                        || !macro_def.params().is_empty();
                    if takes_args {
                        let (p, n, end_found) = getparams(&line, &mut pos2);
                        params = p;
                        newline_count = n;
                        // closing parenthesis not in this chunk, bail out
                        if !end_found {
                            break;
                        }
                    }

                    if params.len() == 1 && params[0].is_empty() {
                        params.clear();
                    }

                    if !macro_def.variadic() && params.len() != macro_def.params().len() {
                        break;
                    }

                    let Ok(expansion) = macro_def.code(&params, &macros) else {
                        sink.report(
                            &Diagnostic::new(
                                Severity::Error,
                                "syntaxError",
                                format!(
                                    "Syntax error. Not enough parameters for macro '{}'.",
                                    macro_def.name()
                                ),
                            )
                            .with_location(&filename, linenr + tmp_linenr),
                        );
                        return String::new();
                    };

                    // the expansion must hold the newlines the call consumed
                    let mut macrocode = "\n".repeat(newline_count) + &expansion;

                    if takes_args {
                        pos2 += 1;
                    }

                    // drop limits the scan has already moved past
                    limits.retain(|_, lim| line.len() - pos1 >= *lim);
                    // block this macro up to the end of its own expansion
                    limits.insert(id, line.len() - pos2);

                    line.replace_range(pos1..pos2, "");
                    if line.as_bytes().get(pos1).is_some_and(|&c| c.is_ascii_alphanumeric() || c == b'_')
                    {
                        macrocode.push(' ');
                    }
                    line.insert_str(pos1, &format!("${}", macrocode));

                    pos = pos1;
                }
            }
        }

        ostr.push_str(&line);
        linenr += line.matches('\n').count() as u32;
    }

    ostr
}

#[cfg(test)]
mod tests {
    use super::*;
    use cppsight_core::CollectingSink;

    fn expand(src: &str) -> String {
        let mut sink = CollectingSink::new();
        expand_macros(src, "test.c", &mut sink)
    }

    #[test]
    fn object_macro() {
        assert_eq!(expand("#define A 1\nA;\n"), "\n$1;\n");
    }

    #[test]
    fn function_macro() {
        assert_eq!(expand("#define F(x) (x+1)\nF(3);\n"), "\n$(3+1);\n");
    }

    #[test]
    fn variadic_macro_joins_tail() {
        let out = expand("#define L(f, ...) f(__VA_ARGS__)\nL(g,1,2);\n");
        assert!(out.contains("g(1,2);"), "got {:?}", out);
    }

    #[test]
    fn self_referential_macro_terminates() {
        assert_eq!(expand("#define A A\nA;\n"), "\n$A;\n");
    }

    #[test]
    fn mutually_recursive_macros_terminate() {
        let out = expand("#define A B\n#define B A\nA;\n");
        assert!(out.ends_with(";\n"));
        assert_eq!(out.matches('\n').count(), 3);
    }

    #[test]
    fn stringify() {
        assert_eq!(expand("#define STR(x) #x\nSTR(a b);\n"), "\n$\"a b\";\n");
        assert_eq!(
            expand("#define STR(x) #x\nSTR(\"q\");\n"),
            "\n$\"\\\"q\\\"\";\n"
        );
    }

    #[test]
    fn token_paste() {
        assert_eq!(expand("#define CAT(a,b) a##b\nCAT(x,1);\n"), "\n$x1;\n");
    }

    #[test]
    fn nested_call_in_argument() {
        let out = expand("#define A(m) B(m)\n#define B(x) x+1\nA(B(7));\n");
        assert!(out.contains("7+1+1"), "got {:?}", out);
    }

    #[test]
    fn call_spanning_lines_keeps_line_count() {
        let out = expand("#define F(a,b) a+b\nF(1,\n2);\n");
        assert_eq!(out.matches('\n').count(), 3);
        assert!(out.contains("1+2"));
    }

    #[test]
    fn wrong_arity_is_no_expansion() {
        // too many arguments for a non-variadic macro: left as-is
        let out = expand("#define F(x) x\nF(1,2);\n");
        assert!(out.contains("F(1,2);"));
    }

    #[test]
    fn too_few_variadic_arguments_is_fatal() {
        let mut sink = CollectingSink::new();
        let out = expand_macros("#define F(a,b,...) a b\nF();\n", "test.c", &mut sink);
        assert_eq!(out, "");
        assert!(!sink.with_id("syntaxError").is_empty());
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let mut sink = CollectingSink::new();
        let out = expand_macros("x = \"abc\n", "test.c", &mut sink);
        assert_eq!(out, "");
        assert!(!sink.with_id("noQuoteCharPair").is_empty());
    }

    #[test]
    fn expansion_is_idempotent_on_expanded_output() {
        let once = expand("#define F(x) (x+1)\nF(3);\n");
        let mut sink = CollectingSink::new();
        let twice = expand_macros(&once, "test.c", &mut sink);
        assert_eq!(once, twice);
    }

    #[test]
    fn undef_removes_macro() {
        assert_eq!(expand("#define A 1\n#undef A\nA;\n"), "\n\nA;\n");
    }

    #[test]
    fn redefinition_replaces() {
        assert_eq!(expand("#define A 1\n#define A 2\nA;\n"), "\n\n$2;\n");
    }

    #[test]
    fn boost_foreach_is_skipped() {
        let out = expand("#define BOOST_FOREACH(a, b) for(a:b)\nBOOST_FOREACH(x, v);\n");
        assert!(out.contains("BOOST_FOREACH(x, v);"));
    }

    #[test]
    fn nopar_macro() {
        assert_eq!(expand("#define X() 7\nX();\n"), "\n$7;\n");
    }

    #[test]
    fn expansion_marker_does_not_glue() {
        // expansion followed by an identifier gets a separating space
        assert_eq!(expand("#define A 1\nA b;\n"), "\n$1 b;\n");
    }

    #[test]
    fn getlines_chunks() {
        let bytes = b"int a;\nint b;\n";
        let mut pos = 0;
        assert_eq!(getlines(bytes, &mut pos), Some("int a;".to_string()));
        assert_eq!(getlines(bytes, &mut pos), Some("\nint b;".to_string()));
        assert_eq!(getlines(bytes, &mut pos), Some("\n".to_string()));
        assert_eq!(getlines(bytes, &mut pos), None);
    }

    #[test]
    fn getlines_stops_before_directive() {
        let bytes = b"x = 1\n#define A 1\ny\n";
        let mut pos = 0;
        assert_eq!(getlines(bytes, &mut pos), Some("x = 1\n".to_string()));
        assert_eq!(getlines(bytes, &mut pos), Some("#define A 1".to_string()));
    }

    #[test]
    fn macro_def_shapes() {
        let m = MacroDef::new("A(x) (x+1)");
        assert_eq!(m.name(), "A");
        assert_eq!(m.params(), ["x"]);
        assert!(!m.variadic() && !m.nopar());

        let m = MacroDef::new("L(f, ...) f(__VA_ARGS__)");
        assert_eq!(m.params(), ["f", "__VA_ARGS__"]);
        assert!(m.variadic());

        let m = MacroDef::new("V(...) f(__VA_ARGS__)");
        assert!(m.variadic());
        assert!(m.params().is_empty());

        let m = MacroDef::new("N() body");
        assert!(m.nopar());

        let m = MacroDef::new("PLAIN 1");
        assert!(m.params().is_empty() && !m.variadic() && !m.nopar());
    }

    #[test]
    fn getparams_basics() {
        let mut pos = 1;
        let (params, newlines, end) = getparams("F(a, b(c,d), \"x,y\")", &mut pos);
        assert!(end);
        assert_eq!(newlines, 0);
        assert_eq!(params, ["a", "b(c,d)", "\"x,y\""]);
    }

    #[test]
    fn getparams_counts_newlines() {
        let mut pos = 1;
        let (params, newlines, end) = getparams("F(1,\n2)", &mut pos);
        assert!(end);
        assert_eq!(newlines, 1);
        assert_eq!(params, ["1", "2"]);
    }
}
