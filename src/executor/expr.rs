//! Scalar expression evaluation for WHERE clauses and computed projections.
//!
//! A tagged enum shaped as a small comparison tree, with a single
//! `evaluate` operation.

use std::collections::HashMap;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// A row binding: column name to value, used as the evaluation environment.
pub type Row<'a> = HashMap<&'a str, &'a Value>;

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Bool(Box<Expr>, BoolOp, Box<Expr>),
    Not(Box<Expr>),
    /// `col LIKE pattern`, with SQL `%`/`_` wildcards.
    Like(Box<Expr>, String),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
}

impl Expr {
    /// Evaluates this expression against a row. NULL propagates through
    /// comparisons as `Value::Null`, matching SQL three-valued logic, but
    /// a WHERE-clause boolean result is then flattened through
    /// `as_where_bool`: NULL and FALSE behave alike there.
    pub fn evaluate(&self, row: &Row) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Column(name) => row.get(name.as_str()).map(|v| (*v).clone()).unwrap_or(Value::Null),
            Expr::Compare(lhs, op, rhs) => {
                let l = lhs.evaluate(row);
                let r = rhs.evaluate(row);
                match l.partial_compare(&r) {
                    None => Value::Null,
                    Some(ord) => Value::Bool(match op {
                        CompareOp::Eq => ord == std::cmp::Ordering::Equal,
                        CompareOp::NotEq => ord != std::cmp::Ordering::Equal,
                        CompareOp::Lt => ord == std::cmp::Ordering::Less,
                        CompareOp::LtEq => ord != std::cmp::Ordering::Greater,
                        CompareOp::Gt => ord == std::cmp::Ordering::Greater,
                        CompareOp::GtEq => ord != std::cmp::Ordering::Less,
                    }),
                }
            }
            Expr::Bool(lhs, op, rhs) => {
                let l = as_tri_bool(lhs.evaluate(row));
                match (op, l) {
                    // short-circuit: AND with a known false is false
                    // regardless of the right side; OR with a known true
                    // is true regardless of the right side.
                    (BoolOp::And, Some(false)) => Value::Bool(false),
                    (BoolOp::Or, Some(true)) => Value::Bool(true),
                    _ => {
                        let r = as_tri_bool(rhs.evaluate(row));
                        match (op, l, r) {
                            (BoolOp::And, Some(a), Some(b)) => Value::Bool(a && b),
                            (BoolOp::Or, Some(a), Some(b)) => Value::Bool(a || b),
                            (BoolOp::And, _, Some(false)) => Value::Bool(false),
                            (BoolOp::Or, _, Some(true)) => Value::Bool(true),
                            _ => Value::Null,
                        }
                    }
                }
            }
            Expr::Not(inner) => match as_tri_bool(inner.evaluate(row)) {
                Some(b) => Value::Bool(!b),
                None => Value::Null,
            },
            Expr::Like(inner, pattern) => match inner.evaluate(row) {
                Value::Text(s) => Value::Bool(like_match(&s, pattern)),
                Value::Null => Value::Null,
                _ => Value::Bool(false),
            },
            Expr::IsNull(inner) => Value::Bool(inner.evaluate(row).is_null()),
            Expr::IsNotNull(inner) => Value::Bool(!inner.evaluate(row).is_null()),
        }
    }

    /// WHERE-clause truth test: only `Value::Bool(true)` passes. NULL and
    /// `Value::Bool(false)` are both treated as "row excluded".
    pub fn matches(&self, row: &Row) -> bool {
        matches!(self.evaluate(row), Value::Bool(true))
    }
}

fn as_tri_bool(v: Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(b),
        Value::Null => None,
        _ => None,
    }
}

/// SQL LIKE matching: `%` matches any run of characters, `_` matches
/// exactly one. No escape character support (out of scope).
fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_match_rec(&t, &p)
}

fn like_match_rec(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            like_match_rec(text, &pattern[1..])
                || (!text.is_empty() && like_match_rec(&text[1..], pattern))
        }
        Some('_') => !text.is_empty() && like_match_rec(&text[1..], &pattern[1..]),
        Some(c) => text.first() == Some(c) && like_match_rec(&text[1..], &pattern[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_of<'a>(pairs: &[(&'a str, &'a Value)]) -> Row<'a> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn null_comparison_is_not_true() {
        let expr = Expr::Compare(
            Box::new(Expr::Column("age".into())),
            CompareOp::Gt,
            Box::new(Expr::Literal(Value::Int(10))),
        );
        let null = Value::Null;
        let row = row_of(&[("age", &null)]);
        assert!(!expr.matches(&row));
        assert_eq!(expr.evaluate(&row), Value::Null);
    }

    #[test]
    fn and_short_circuits_on_false() {
        let expr = Expr::Bool(
            Box::new(Expr::Literal(Value::Bool(false))),
            BoolOp::And,
            Box::new(Expr::Compare(
                Box::new(Expr::Column("missing".into())),
                CompareOp::Eq,
                Box::new(Expr::Literal(Value::Int(1))),
            )),
        );
        assert_eq!(expr.evaluate(&HashMap::new()), Value::Bool(false));
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("hello world", "hel%"));
        assert!(like_match("cat", "c_t"));
        assert!(!like_match("cart", "c_t"));
    }
}
