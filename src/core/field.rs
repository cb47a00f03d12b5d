//! Comparison operators and loose comparison of JSON field values

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::core::error::{RepositoryError, Result};

/// A binary comparison operator usable in a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
}

impl Comparison {
    /// Parse an operator token. Case and inner whitespace are not significant.
    pub fn parse(token: &str) -> Result<Self> {
        let normalized = token
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();

        match normalized.as_str() {
            "=" | "==" => Ok(Comparison::Eq),
            "!=" | "<>" => Ok(Comparison::Ne),
            "<" => Ok(Comparison::Lt),
            ">" => Ok(Comparison::Gt),
            "<=" => Ok(Comparison::Le),
            ">=" => Ok(Comparison::Ge),
            "LIKE" => Ok(Comparison::Like),
            "NOT LIKE" => Ok(Comparison::NotLike),
            _ => Err(RepositoryError::invalid_condition(
                "",
                format!("unknown comparison operator '{}'", token.trim()),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
            Comparison::Like => "LIKE",
            Comparison::NotLike => "NOT LIKE",
        }
    }

    /// Evaluate `left <op> right`.
    ///
    /// A missing or null left-hand side never matches, mirroring SQL NULL
    /// semantics.
    pub fn evaluate(&self, left: Option<&Value>, right: &Value) -> bool {
        let left = match left {
            Some(Value::Null) | None => return false,
            Some(value) => value,
        };

        match self {
            Comparison::Eq => loose_eq(left, right),
            Comparison::Ne => !loose_eq(left, right),
            Comparison::Lt => compare_values(left, right) == Some(Ordering::Less),
            Comparison::Gt => compare_values(left, right) == Some(Ordering::Greater),
            Comparison::Le => matches!(
                compare_values(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::Ge => matches!(
                compare_values(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Like => like_matches(left, right),
            Comparison::NotLike => !like_matches(left, right),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look a (possibly dotted) field path up in a JSON row
pub fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(row, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Equality that lets numbers match their string spelling ("18" == 18)
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(left), as_number(right)) {
                (Some(l), Some(r)) => l == r,
                _ => false,
            }
        }
        _ => left == right,
    }
}

/// Ordering between two values of compatible types
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => match (as_number(left), as_number(right)) {
            (Some(l), Some(r)) => l.partial_cmp(&r),
            _ => None,
        },
    }
}

/// Case-insensitive SQL `LIKE`: `%` matches any run, `_` a single character
pub fn like_matches(value: &Value, pattern: &Value) -> bool {
    let (Some(text), Some(pattern)) = (scalar_text(value), scalar_text(pattern)) else {
        return false;
    };

    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');

    RegexBuilder::new(&expression)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map(|re| re.is_match(&text))
        .unwrap_or(false)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
