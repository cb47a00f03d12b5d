//! Evaluation of query handles over the JSON form of records

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::OnceLock;

use crate::core::error::{RepositoryError, Result};
use crate::core::field::{Comparison, compare_values, loose_eq, lookup};
use crate::core::query::{Boolean, Clause, DatePart, Direction, Filter, Order, Query, TrashedMode};

/// Whether a record with the given trashed state is visible under `mode`
pub fn visible(mode: TrashedMode, trashed: bool) -> bool {
    match mode {
        TrashedMode::Exclude => !trashed,
        TrashedMode::With => true,
        TrashedMode::Only => trashed,
    }
}

/// Whether `row` satisfies every filter of `query`
pub fn matches(query: &Query, row: &Value) -> Result<bool> {
    matches_clauses(query.clauses(), row)
}

/// `AND` binds tighter than `OR`: the clause list is a disjunction of
/// `AND`-groups, split at every `OR` connective.
fn matches_clauses(clauses: &[Clause], row: &Value) -> Result<bool> {
    if clauses.is_empty() {
        return Ok(true);
    }

    let mut any_group = false;
    let mut group = true;
    for (index, clause) in clauses.iter().enumerate() {
        if index > 0 && clause.boolean == Boolean::Or {
            any_group |= group;
            group = true;
        }
        let matched = matches_filter(&clause.filter, row)?;
        group = group && matched;
    }
    Ok(any_group || group)
}

fn matches_filter(filter: &Filter, row: &Value) -> Result<bool> {
    let matched = match filter {
        Filter::Compare { field, op, value } => op.evaluate(lookup(row, field), value),
        Filter::In {
            field,
            values,
            negated,
        } => match lookup(row, field) {
            None | Some(Value::Null) => false,
            Some(current) => values.iter().any(|v| loose_eq(current, v)) != *negated,
        },
        Filter::Between {
            field,
            low,
            high,
            negated,
        } => match lookup(row, field) {
            None | Some(Value::Null) => false,
            Some(current) => within(current, low, high) != *negated,
        },
        Filter::BetweenColumns {
            field,
            low_column,
            high_column,
            negated,
        } => match (
            lookup(row, field),
            lookup(row, low_column),
            lookup(row, high_column),
        ) {
            (Some(current), Some(low), Some(high)) if !current.is_null() => {
                within(current, low, high) != *negated
            }
            _ => false,
        },
        Filter::DatePart {
            part,
            field,
            op,
            value,
        } => {
            let extracted = lookup(row, field).and_then(|v| date_part(*part, v));
            op.evaluate(extracted.as_ref(), &normalize_date_operand(*part, value))
        }
        Filter::Null { field, negated } => {
            matches!(lookup(row, field), None | Some(Value::Null)) != *negated
        }
        Filter::Exists { group } => matches_clauses(group.clauses(), row)?,
        Filter::Relation {
            relation,
            constraint,
            negated,
            ..
        } => {
            let related: Vec<&Value> = match lookup(row, relation) {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(object @ Value::Object(_)) => vec![object],
                _ => Vec::new(),
            };
            let mut found = false;
            for item in related {
                if matches(constraint, item)? {
                    found = true;
                    break;
                }
            }
            found != *negated
        }
        Filter::Raw { expression } => {
            let mut all = true;
            for (field, op, literal) in parse_raw(expression)? {
                all = all && op.evaluate(lookup(row, &field), &literal);
            }
            all
        }
    };
    Ok(matched)
}

fn within(value: &Value, low: &Value, high: &Value) -> bool {
    matches!(
        compare_values(value, low),
        Some(Ordering::Greater | Ordering::Equal)
    ) && matches!(
        compare_values(value, high),
        Some(Ordering::Less | Ordering::Equal)
    )
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(datetime.date());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn date_part(part: DatePart, value: &Value) -> Option<Value> {
    let date = parse_date(value)?;
    Some(match part {
        DatePart::Date => Value::String(date.format("%Y-%m-%d").to_string()),
        DatePart::Day => Value::from(date.day()),
        DatePart::Month => Value::from(date.month()),
        DatePart::Year => Value::from(date.year()),
    })
}

fn normalize_date_operand(part: DatePart, value: &Value) -> Value {
    match part {
        DatePart::Date => parse_date(value)
            .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

fn raw_term_regex() -> Result<&'static Regex> {
    static TERM: OnceLock<Regex> = OnceLock::new();
    if let Some(regex) = TERM.get() {
        return Ok(regex);
    }
    let regex = Regex::new(
        r"(?i)^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(<=|>=|!=|<>|=|<|>|not\s+like\b|like\b)\s*(.+?)\s*$",
    )
    .map_err(|e| RepositoryError::configuration(format!("raw expression grammar: {}", e)))?;
    Ok(TERM.get_or_init(|| regex))
}

fn raw_and_regex() -> Result<&'static Regex> {
    static AND: OnceLock<Regex> = OnceLock::new();
    if let Some(regex) = AND.get() {
        return Ok(regex);
    }
    let regex = Regex::new(r"(?i)\s+and\s+")
        .map_err(|e| RepositoryError::configuration(format!("raw expression grammar: {}", e)))?;
    Ok(AND.get_or_init(|| regex))
}

/// Parse `field op literal [AND field op literal ...]`.
///
/// Literals are JSON (`18`, `"x"`, `true`, `null`); single-quoted or bare
/// words are taken as strings.
pub fn parse_raw(expression: &str) -> Result<Vec<(String, Comparison, Value)>> {
    let term = raw_term_regex()?;
    raw_and_regex()?
        .split(expression)
        .map(|part| {
            let captures = term.captures(part).ok_or_else(|| {
                RepositoryError::invalid_condition(
                    "RAW",
                    format!("cannot parse raw expression '{}'", part.trim()),
                )
            })?;
            let field = captures[1].to_string();
            let op = Comparison::parse(&captures[2])?;
            let literal = captures[3].trim();
            let value = serde_json::from_str::<Value>(literal).unwrap_or_else(|_| {
                let unquoted = literal
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .unwrap_or(literal);
                Value::String(unquoted.to_string())
            });
            Ok((field, op, value))
        })
        .collect()
}

/// Stable multi-key sort; missing values sort first in ascending order
pub fn compare_rows(left: &Value, right: &Value, orders: &[Order]) -> Ordering {
    for order in orders {
        let ordering = match (lookup(left, &order.column), lookup(right, &order.column)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
        };
        let ordering = match order.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
