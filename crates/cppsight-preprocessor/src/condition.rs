//! `#if` condition simplification
//!
//! Substitutes `defined(..)` clauses and macro values into a condition, then
//! tries to settle it with a short-circuiting partial evaluator. The result
//! is always `"1"`, `"0"`, or the untouched input: callers treat anything
//! else as "cannot decide".
//!
//! Unknown identifiers evaluate to "unknown", which poisons arithmetic but
//! still lets `0 && x` and `1 || x` resolve.

use std::collections::BTreeMap;

use crate::tokens::{is_name, parse_int, tokenize};

/// Simplify `condition` against the macro map. In strict mode (used when a
/// configuration is being matched) unknown `defined` clauses count as false;
/// otherwise they are left alone.
pub(crate) fn simplify_condition(
    cfg: &BTreeMap<String, String>,
    condition: &mut String,
    strict: bool,
) {
    let mut tokens = tokenize(&format!("( {} )", condition));

    // ( X )
    if tokens.len() == 3 && tokens[0] == "(" && tokens[2] == ")" && is_name(&tokens[1]) {
        if let Some(value) = cfg.get(&tokens[1]) {
            *condition = if value == "0" { "0" } else { "1" }.to_string();
        } else if strict {
            *condition = "0".to_string();
        }
        return;
    }

    // ( ! X )
    if tokens.len() == 4
        && tokens[0] == "("
        && tokens[1] == "!"
        && is_name(&tokens[2])
        && tokens[3] == ")"
    {
        match cfg.get(&tokens[2]) {
            None => *condition = "1".to_string(),
            Some(v) if v == "0" => *condition = "1".to_string(),
            Some(_) if strict => *condition = "0".to_string(),
            Some(_) => {}
        }
        return;
    }

    // replace defined(..) and macro names with values
    let mut i = 0;
    while i < tokens.len() {
        if !is_name(&tokens[i]) {
            i += 1;
            continue;
        }

        if tokens[i] == "defined" {
            if i + 3 < tokens.len()
                && tokens[i + 1] == "("
                && is_name(&tokens[i + 2])
                && tokens[i + 3] == ")"
            {
                if cfg.contains_key(&tokens[i + 2]) {
                    tokens.splice(i..i + 4, ["1".to_string()]);
                } else if strict {
                    tokens.splice(i..i + 4, ["0".to_string()]);
                } else {
                    i += 1;
                }
                continue;
            }
            if i + 1 < tokens.len() && is_name(&tokens[i + 1]) {
                if cfg.contains_key(&tokens[i + 1]) {
                    tokens.splice(i..i + 2, ["1".to_string()]);
                } else if strict {
                    tokens.splice(i..i + 2, ["0".to_string()]);
                } else {
                    i += 1;
                }
                continue;
            }
            i += 1;
            continue;
        }

        if let Some(value) = cfg.get(&tokens[i]) {
            if !value.is_empty() {
                let value_tokens = tokenize(value);
                let n = value_tokens.len();
                tokens.splice(i..i + 1, value_tokens);
                i += n.max(1);
            } else {
                // an empty define only counts as "true" when it stands alone
                let prev_ok = i == 0 || matches!(tokens[i - 1].as_str(), "&&" | "||" | "(");
                let next_ok =
                    i + 1 >= tokens.len() || matches!(tokens[i + 1].as_str(), "&&" | "||" | ")");
                if prev_ok && next_ok {
                    tokens[i] = "1".to_string();
                    i += 1;
                } else {
                    tokens.remove(i);
                }
            }
        } else {
            i += 1;
        }
    }

    if let Some(value) = eval_tokens(&tokens) {
        *condition = if value != 0 { "1" } else { "0" }.to_string();
    }
}

/// Does the configuration map satisfy this condition?
pub(crate) fn match_cfg_def(cfg: &BTreeMap<String, String>, def: &str) -> bool {
    let mut simplified = def.to_string();
    simplify_condition(cfg, &mut simplified, true);

    if cfg.contains_key(&simplified) {
        return true;
    }
    if simplified == "0" {
        return false;
    }
    simplified == "1"
}

/// Evaluate a fully parenthesized token sequence. `None` means the value
/// could not be settled (unknown identifier, syntax error, division by zero).
fn eval_tokens(tokens: &[String]) -> Option<i64> {
    let mut parser = Parser {
        toks: tokens,
        pos: 0,
        failed: false,
    };
    let value = parser.or_expr();
    if parser.failed || parser.pos != tokens.len() {
        return None;
    }
    value
}

type Val = Option<i64>;

struct Parser<'a> {
    toks: &'a [String],
    pos: usize,
    failed: bool,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.toks.get(self.pos).map(|s| s.as_str())
    }

    fn bump(&mut self) -> Option<&'a str> {
        let tok = self.toks.get(self.pos).map(|s| s.as_str());
        self.pos += 1;
        tok
    }

    fn expect(&mut self, tok: &str) {
        if self.bump() != Some(tok) {
            self.failed = true;
        }
    }

    fn or_expr(&mut self) -> Val {
        let mut lhs = self.and_expr();
        while self.peek() == Some("||") {
            self.bump();
            let rhs = self.and_expr();
            lhs = match (lhs, rhs) {
                (Some(a), Some(b)) => Some((a != 0 || b != 0) as i64),
                (Some(a), _) if a != 0 => Some(1),
                (_, Some(b)) if b != 0 => Some(1),
                _ => None,
            };
        }
        lhs
    }

    fn and_expr(&mut self) -> Val {
        let mut lhs = self.bitor_expr();
        while self.peek() == Some("&&") {
            self.bump();
            let rhs = self.bitor_expr();
            lhs = match (lhs, rhs) {
                (Some(a), Some(b)) => Some((a != 0 && b != 0) as i64),
                (Some(0), _) | (_, Some(0)) => Some(0),
                _ => None,
            };
        }
        lhs
    }

    fn bitor_expr(&mut self) -> Val {
        let mut lhs = self.bitxor_expr();
        while self.peek() == Some("|") {
            self.bump();
            let rhs = self.bitxor_expr();
            lhs = binop(lhs, rhs, |a, b| Some(a | b));
        }
        lhs
    }

    fn bitxor_expr(&mut self) -> Val {
        let mut lhs = self.bitand_expr();
        while self.peek() == Some("^") {
            self.bump();
            let rhs = self.bitand_expr();
            lhs = binop(lhs, rhs, |a, b| Some(a ^ b));
        }
        lhs
    }

    fn bitand_expr(&mut self) -> Val {
        let mut lhs = self.equality_expr();
        while self.peek() == Some("&") {
            self.bump();
            let rhs = self.equality_expr();
            lhs = binop(lhs, rhs, |a, b| Some(a & b));
        }
        lhs
    }

    fn equality_expr(&mut self) -> Val {
        let mut lhs = self.relational_expr();
        loop {
            let eq = match self.peek() {
                Some("==") => true,
                Some("!=") => false,
                _ => break,
            };
            self.bump();
            let rhs = self.relational_expr();
            lhs = binop(lhs, rhs, |a, b| Some(((a == b) == eq) as i64));
        }
        lhs
    }

    fn relational_expr(&mut self) -> Val {
        let mut lhs = self.shift_expr();
        loop {
            let op = match self.peek() {
                Some(op @ ("<" | "<=" | ">" | ">=")) => op.to_string(),
                _ => break,
            };
            self.bump();
            let rhs = self.shift_expr();
            lhs = binop(lhs, rhs, |a, b| {
                Some(match op.as_str() {
                    "<" => a < b,
                    "<=" => a <= b,
                    ">" => a > b,
                    _ => a >= b,
                } as i64)
            });
        }
        lhs
    }

    fn shift_expr(&mut self) -> Val {
        let mut lhs = self.add_expr();
        loop {
            let left = match self.peek() {
                Some("<<") => true,
                Some(">>") => false,
                _ => break,
            };
            self.bump();
            let rhs = self.add_expr();
            lhs = binop(lhs, rhs, |a, b| {
                if !(0..64).contains(&b) {
                    return None;
                }
                Some(if left { a.wrapping_shl(b as u32) } else { a >> b })
            });
        }
        lhs
    }

    fn add_expr(&mut self) -> Val {
        let mut lhs = self.mul_expr();
        loop {
            let add = match self.peek() {
                Some("+") => true,
                Some("-") => false,
                _ => break,
            };
            self.bump();
            let rhs = self.mul_expr();
            lhs = binop(lhs, rhs, |a, b| {
                Some(if add { a.wrapping_add(b) } else { a.wrapping_sub(b) })
            });
        }
        lhs
    }

    fn mul_expr(&mut self) -> Val {
        let mut lhs = self.unary_expr();
        loop {
            let op = match self.peek() {
                Some(op @ ("*" | "/" | "%")) => op.to_string(),
                _ => break,
            };
            self.bump();
            let rhs = self.unary_expr();
            lhs = binop(lhs, rhs, |a, b| match op.as_str() {
                "*" => Some(a.wrapping_mul(b)),
                _ if b == 0 => None,
                "/" => Some(a / b),
                _ => Some(a % b),
            });
        }
        lhs
    }

    fn unary_expr(&mut self) -> Val {
        match self.peek() {
            Some("!") => {
                self.bump();
                self.unary_expr().map(|v| (v == 0) as i64)
            }
            Some("~") => {
                self.bump();
                self.unary_expr().map(|v| !v)
            }
            Some("-") => {
                self.bump();
                self.unary_expr().map(i64::wrapping_neg)
            }
            Some("+") => {
                self.bump();
                self.unary_expr()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Val {
        match self.bump() {
            Some("(") => {
                let value = self.or_expr();
                self.expect(")");
                value
            }
            Some("defined") => {
                // leftover in non-strict mode; its truth is unknown here
                if self.peek() == Some("(") {
                    self.bump();
                    self.bump();
                    self.expect(")");
                } else {
                    self.bump();
                }
                None
            }
            Some(tok) if is_name(tok) => None,
            Some(tok) => {
                if let Some(value) = parse_int(tok) {
                    Some(value)
                } else if tok.starts_with(|c| c == '"' || c == '\'') {
                    None
                } else {
                    self.failed = true;
                    None
                }
            }
            None => {
                self.failed = true;
                None
            }
        }
    }
}

fn binop(lhs: Val, rhs: Val, f: impl FnOnce(i64, i64) -> Val) -> Val {
    match (lhs, rhs) {
        (Some(a), Some(b)) => f(a, b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn simplified(map: &BTreeMap<String, String>, cond: &str, strict: bool) -> String {
        let mut c = cond.to_string();
        simplify_condition(map, &mut c, strict);
        c
    }

    #[test]
    fn bare_identifier() {
        assert!(match_cfg_def(&cfg(&[("A", "")]), "A"));
        assert!(!match_cfg_def(&cfg(&[]), "A"));
        assert!(!match_cfg_def(&cfg(&[("A", "0")]), "A"));
        assert!(match_cfg_def(&cfg(&[("A", "2")]), "A"));
    }

    #[test]
    fn negated_identifier() {
        assert!(match_cfg_def(&cfg(&[]), "!A"));
        assert!(match_cfg_def(&cfg(&[("A", "0")]), "!A"));
        assert!(!match_cfg_def(&cfg(&[("A", "")]), "!A"));
    }

    #[test]
    fn defined_combinations() {
        let map = cfg(&[("A", ""), ("B", "")]);
        assert!(match_cfg_def(&map, "defined(A) && defined(B)"));
        assert!(match_cfg_def(&map, "defined(A) || defined(C)"));
        assert!(!match_cfg_def(&map, "defined(C) && defined(A)"));
        assert!(!match_cfg_def(&cfg(&[("A", "")]), "defined(A) && defined(B)"));
    }

    #[test]
    fn values_fold_arithmetically() {
        assert!(match_cfg_def(&cfg(&[("A", "2")]), "A > 1"));
        assert!(!match_cfg_def(&cfg(&[("A", "2")]), "A > 2"));
        assert!(match_cfg_def(&cfg(&[("VER", "300")]), "VER >= 2 * 100 + 50"));
        assert!(match_cfg_def(&cfg(&[("A", "1"), ("B", "1")]), "A == B"));
    }

    #[test]
    fn plain_numbers() {
        assert!(match_cfg_def(&cfg(&[]), "1"));
        assert!(!match_cfg_def(&cfg(&[]), "0"));
        assert!(match_cfg_def(&cfg(&[]), "!0"));
        assert!(match_cfg_def(&cfg(&[]), "0x10 == 16"));
    }

    #[test]
    fn short_circuits_beat_unknowns() {
        assert_eq!(simplified(&cfg(&[]), "1 || UNKNOWN", false), "1");
        assert_eq!(simplified(&cfg(&[]), "UNKNOWN || 1", false), "1");
        assert_eq!(simplified(&cfg(&[]), "0 && UNKNOWN", false), "0");
    }

    #[test]
    fn unresolved_conditions_are_left_alone() {
        assert_eq!(simplified(&cfg(&[]), "defined(X) || Y", false), "defined(X) || Y");
        assert_eq!(simplified(&cfg(&[]), "A == 1", false), "A == 1");
    }

    #[test]
    fn empty_define_in_expression_context_is_deleted() {
        // "A == 1" with A empty: the name disappears, nothing evaluates and
        // the condition does not match
        assert!(!match_cfg_def(&cfg(&[("A", "")]), "A == 1"));
    }

    #[test]
    fn simplification_is_idempotent_on_verdicts() {
        let map = cfg(&[("A", "")]);
        for cond in ["A", "!A", "defined(A)", "0", "1"] {
            let once = simplified(&map, cond, true);
            let twice = simplified(&map, &once, true);
            assert_eq!(once, twice);
        }
    }
}
