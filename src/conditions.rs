//! Assertion condition tree: a small algebraic datatype (`Leaf`/`And`/`Or`/`Not`)
//! evaluated against a merged JSON view of the response and global context,
//! plus a parallel DSL string form that compiles to the same tree.
//!
//! Grounded on the teacher's `assertions.rs` (thiserror error enum, `run_*`
//! naming, actual/expected diagnostic struct), generalized from a fixed
//! assertion-type enum to a recursive tree.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::AssertionFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Regexp,
    Range,
}

/// A recursive condition tree. `Leaf` addresses a dotted JSON path (e.g.
/// `_ctx.response.status`, `auth_token`) against an operator and operand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Leaf {
        path: String,
        op: Op,
        operand: Value,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("invalid regex in assertion operand '{0}': {1}")]
    InvalidRegex(String, regex::Error),
    #[error("unexpected token at position {0} in DSL expression")]
    UnexpectedToken(usize),
    #[error("unterminated DSL expression")]
    UnexpectedEof,
}

/// Look up a dotted path (`a.b.c`) in `root`, joining `_ctx` (response view)
/// and the global-context snapshot into one object before lookup.
fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn as_str_repr(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate `cond` against `root` (expected to have an `_ctx` key holding the
/// response view, merged with top-level global-context keys). Returns
/// `Ok(())` on success or `Err(AssertionFailure)` with actual/expected
/// diagnostics.
pub fn evaluate(cond: &Condition, root: &Value) -> Result<(), AssertionFailure> {
    if eval_bool(cond, root) {
        Ok(())
    } else {
        Err(describe_failure(cond, root))
    }
}

fn eval_bool(cond: &Condition, root: &Value) -> bool {
    match cond {
        Condition::And(children) => children.iter().all(|c| eval_bool(c, root)),
        Condition::Or(children) => children.iter().any(|c| eval_bool(c, root)),
        Condition::Not(inner) => !eval_bool(inner, root),
        Condition::Leaf { path, op, operand } => eval_leaf(root, path, *op, operand),
    }
}

fn eval_leaf(root: &Value, path: &str, op: Op, operand: &Value) -> bool {
    let actual = match lookup(root, path) {
        Some(v) => v,
        None => return matches!(op, Op::Eq) && operand.is_null(),
    };

    match op {
        Op::Eq => actual == operand,
        Op::Neq => actual != operand,
        Op::Gt => matches!((as_f64(actual), as_f64(operand)), (Some(a), Some(b)) if a > b),
        Op::Gte => matches!((as_f64(actual), as_f64(operand)), (Some(a), Some(b)) if a >= b),
        Op::Lt => matches!((as_f64(actual), as_f64(operand)), (Some(a), Some(b)) if a < b),
        Op::Lte => matches!((as_f64(actual), as_f64(operand)), (Some(a), Some(b)) if a <= b),
        Op::Contains => as_str_repr(actual).contains(&as_str_repr(operand)),
        Op::Regexp => Regex::new(&as_str_repr(operand))
            .map(|re| re.is_match(&as_str_repr(actual)))
            .unwrap_or(false),
        Op::Range => {
            let bounds = operand.as_array();
            match (bounds, as_f64(actual)) {
                (Some(b), Some(a)) if b.len() == 2 => {
                    matches!(
                        (as_f64(&b[0]), as_f64(&b[1])),
                        (Some(lo), Some(hi)) if a >= lo && a <= hi
                    )
                }
                _ => false,
            }
        }
    }
}

fn describe_failure(cond: &Condition, root: &Value) -> AssertionFailure {
    match cond {
        Condition::Leaf { path, op, operand } => {
            let actual = lookup(root, path).cloned().unwrap_or(Value::Null);
            AssertionFailure {
                message: format!("{} {:?} {} failed", path, op, operand),
                actual: Some(as_str_repr(&actual)),
                expected: Some(as_str_repr(operand)),
            }
        }
        Condition::Not(inner) => {
            let mut f = describe_failure(inner, root);
            f.message = format!("not({})", f.message);
            f
        }
        Condition::And(children) | Condition::Or(children) => {
            let failing = children
                .iter()
                .find(|c| !eval_bool(c, root))
                .unwrap_or(&children[0]);
            describe_failure(failing, root)
        }
    }
}

// --- DSL parser -----------------------------------------------------------
//
// Minimal recursive-descent grammar:
//   expr   := term (("and" | "or") term)*
//   term   := "not" term | "(" expr ")" | leaf
//   leaf   := PATH OP OPERAND

struct Parser<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
}

pub fn parse_dsl(src: &str) -> Result<Condition, ConditionError> {
    let tokens: Vec<&str> = src.split_whitespace().collect();
    let mut p = Parser { tokens, pos: 0 };
    let cond = p.parse_expr()?;
    if p.pos != p.tokens.len() {
        return Err(ConditionError::UnexpectedToken(p.pos));
    }
    Ok(cond)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&&'a str> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a str> {
        let t = self.tokens.get(self.pos).copied();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Condition, ConditionError> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek().copied() {
                Some("and") => {
                    self.next();
                    let right = self.parse_term()?;
                    left = Condition::And(vec![left, right]);
                }
                Some("or") => {
                    self.next();
                    let right = self.parse_term()?;
                    left = Condition::Or(vec![left, right]);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Condition, ConditionError> {
        match self.peek().copied() {
            Some("not") => {
                self.next();
                Ok(Condition::Not(Box::new(self.parse_term()?)))
            }
            Some("(") => {
                self.next();
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(")") => Ok(inner),
                    _ => Err(ConditionError::UnexpectedEof),
                }
            }
            Some(_) => self.parse_leaf(),
            None => Err(ConditionError::UnexpectedEof),
        }
    }

    fn parse_leaf(&mut self) -> Result<Condition, ConditionError> {
        let path = self.next().ok_or(ConditionError::UnexpectedEof)?.to_string();
        let op_tok = self.next().ok_or(ConditionError::UnexpectedEof)?;
        let op = match op_tok {
            "==" => Op::Eq,
            "!=" => Op::Neq,
            ">" => Op::Gt,
            ">=" => Op::Gte,
            "<" => Op::Lt,
            "<=" => Op::Lte,
            "contains" => Op::Contains,
            "matches" => Op::Regexp,
            _ => return Err(ConditionError::UnexpectedToken(self.pos - 1)),
        };
        let operand_tok = self.next().ok_or(ConditionError::UnexpectedEof)?;
        let operand = serde_json::from_str(operand_tok)
            .unwrap_or_else(|_| Value::String(operand_tok.to_string()));
        Ok(Condition::Leaf { path, op, operand })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaf_eq_matches_exact_value() {
        let root = json!({"status": 200});
        let cond = Condition::Leaf {
            path: "status".into(),
            op: Op::Eq,
            operand: json!(200),
        };
        assert!(evaluate(&cond, &root).is_ok());
    }

    #[test]
    fn leaf_eq_null_matches_missing_path() {
        let root = json!({});
        let cond = Condition::Leaf {
            path: "missing".into(),
            op: Op::Eq,
            operand: Value::Null,
        };
        assert!(evaluate(&cond, &root).is_ok());
    }

    #[test]
    fn and_requires_all_children() {
        let root = json!({"a": 1, "b": 2});
        let cond = Condition::And(vec![
            Condition::Leaf { path: "a".into(), op: Op::Eq, operand: json!(1) },
            Condition::Leaf { path: "b".into(), op: Op::Eq, operand: json!(3) },
        ]);
        let err = evaluate(&cond, &root).unwrap_err();
        assert_eq!(err.expected.as_deref(), Some("3"));
    }

    #[test]
    fn or_succeeds_if_any_child_true() {
        let root = json!({"a": 1});
        let cond = Condition::Or(vec![
            Condition::Leaf { path: "a".into(), op: Op::Eq, operand: json!(99) },
            Condition::Leaf { path: "a".into(), op: Op::Eq, operand: json!(1) },
        ]);
        assert!(evaluate(&cond, &root).is_ok());
    }

    #[test]
    fn not_negates_inner_condition() {
        let root = json!({"a": 1});
        let cond = Condition::Not(Box::new(Condition::Leaf {
            path: "a".into(),
            op: Op::Eq,
            operand: json!(2),
        }));
        assert!(evaluate(&cond, &root).is_ok());
    }

    #[test]
    fn contains_and_regexp_operators() {
        let root = json!({"body": "hello world"});
        let contains = Condition::Leaf {
            path: "body".into(),
            op: Op::Contains,
            operand: json!("world"),
        };
        assert!(evaluate(&contains, &root).is_ok());

        let regexp = Condition::Leaf {
            path: "body".into(),
            op: Op::Regexp,
            operand: json!("^hello"),
        };
        assert!(evaluate(&regexp, &root).is_ok());
    }

    #[test]
    fn range_operator_checks_inclusive_bounds() {
        let root = json!({"latency": 50});
        let cond = Condition::Leaf {
            path: "latency".into(),
            op: Op::Range,
            operand: json!([10, 100]),
        };
        assert!(evaluate(&cond, &root).is_ok());
    }

    #[test]
    fn dsl_parses_and_combinator() {
        let cond = parse_dsl("status == 200 and body contains ok").unwrap();
        let root = json!({"status": 200, "body": "all ok here"});
        assert!(evaluate(&cond, &root).is_ok());
    }

    #[test]
    fn dsl_parses_not_and_parens() {
        let cond = parse_dsl("not ( status == 500 )").unwrap();
        let root = json!({"status": 200});
        assert!(evaluate(&cond, &root).is_ok());
    }

    #[test]
    fn dsl_rejects_trailing_garbage() {
        let err = parse_dsl("status == 200 oops").unwrap_err();
        assert!(matches!(err, ConditionError::UnexpectedToken(_)));
    }
}
