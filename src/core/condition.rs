//! Declarative conditions and their compilation onto a [`Query`]
//!
//! A condition is either a plain equality (`field = value`) or a tuple
//! `(field, kind, value)` whose kind token selects the filter:
//!
//! ```rust,ignore
//! let conditions = vec![
//!     Condition::eq("status", "active"),
//!     Condition::spec("age", ">=", 18),
//!     Condition::spec("role", "IN", json!(["admin", "editor"])),
//!     Condition::spec("created_at", "DATE >=", "2024-01-01"),
//!     Condition::spec("comments", "HAS", Predicate::new("approved", |q| q.where_eq("approved", true))),
//! ];
//! let query = ConditionCompiler::compile(Query::new(), &conditions)?;
//! ```
//!
//! Compilation is two-phase: every entry is validated first, and the handle
//! is only touched once the whole list is known to be well-formed.

use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::trace;

use crate::core::error::{RepositoryError, Result};
use crate::core::field::Comparison;
use crate::core::query::{DatePart, Filter, Predicate, Query};

/// Value carried by a `(field, kind, value)` condition
#[derive(Debug, Clone)]
pub enum ConditionValue {
    Value(Value),
    Predicate(Predicate),
}

impl From<Value> for ConditionValue {
    fn from(value: Value) -> Self {
        ConditionValue::Value(value)
    }
}

impl From<Predicate> for ConditionValue {
    fn from(predicate: Predicate) -> Self {
        ConditionValue::Predicate(predicate)
    }
}

macro_rules! condition_value_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ConditionValue {
            fn from(value: $ty) -> Self {
                ConditionValue::Value(Value::from(value))
            }
        })*
    };
}

condition_value_from!(&str, String, i32, i64, u32, u64, f64, bool);

impl Serialize for ConditionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ConditionValue::Value(value) => value.serialize(serializer),
            ConditionValue::Predicate(predicate) => predicate.serialize(serializer),
        }
    }
}

/// One entry of a condition list
#[derive(Debug, Clone)]
pub enum Condition {
    /// `field = value`
    Equals { field: String, value: Value },
    /// `(field, kind token, value)`
    Spec {
        field: String,
        kind: String,
        value: ConditionValue,
    },
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn spec(
        field: impl Into<String>,
        kind: impl Into<String>,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Condition::Spec {
            field: field.into(),
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Condition::Equals { field, .. } | Condition::Spec { field, .. } => field,
        }
    }

    /// Parse an associative condition object.
    ///
    /// Scalar (and object) members become equalities; array members must be
    /// `[field, kind, value]` tuples:
    ///
    /// ```json
    /// {"status": "active", "age": ["age", ">=", 18]}
    /// ```
    pub fn list_from_json(conditions: &Value) -> Result<Vec<Condition>> {
        let object = conditions.as_object().ok_or_else(|| {
            RepositoryError::invalid_condition("", "conditions must be a JSON object")
        })?;

        object
            .iter()
            .map(|(key, value)| match value {
                Value::Array(tuple) => match tuple.as_slice() {
                    [Value::String(field), Value::String(kind), value] => {
                        Ok(Condition::spec(field.clone(), kind.clone(), value.clone()))
                    }
                    _ => Err(RepositoryError::invalid_condition(
                        key.clone(),
                        "array conditions must be [field, kind, value]",
                    )),
                },
                other => Ok(Condition::eq(key.clone(), other.clone())),
            })
            .collect()
    }

    /// Equality conditions for every member of an attribute object
    pub fn list_from_attributes(attributes: &Value) -> Result<Vec<Condition>> {
        let object = attributes.as_object().ok_or_else(|| {
            RepositoryError::invalid_condition("", "attributes must be a JSON object")
        })?;
        Ok(object
            .iter()
            .map(|(field, value)| Condition::eq(field.clone(), value.clone()))
            .collect())
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Condition::Equals { field, value } => {
                let mut tuple = serializer.serialize_tuple(2)?;
                tuple.serialize_element(field)?;
                tuple.serialize_element(value)?;
                tuple.end()
            }
            Condition::Spec { field, kind, value } => {
                let mut tuple = serializer.serialize_tuple(3)?;
                tuple.serialize_element(field)?;
                tuple.serialize_element(kind)?;
                tuple.serialize_element(value)?;
                tuple.end()
            }
        }
    }
}

/// The closed set of condition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Eq,
    In,
    NotIn,
    Date(Comparison),
    Day(Comparison),
    Month(Comparison),
    Year(Comparison),
    Exists,
    Has,
    HasPolymorphic,
    DoesNotHave,
    DoesNotHavePolymorphic,
    Between,
    BetweenColumns,
    NotBetween,
    NotBetweenColumns,
    Raw,
    /// Fallback: the token itself is a comparison operator
    Compare(Comparison),
}

impl ConditionKind {
    /// Parse a kind token.
    ///
    /// The token is trimmed, inner whitespace collapsed and case ignored.
    /// `_` and spaces inside the kind word are not significant, so `NOT_IN`,
    /// `NOT IN` and `notin` are the same kind. Date-part kinds may carry a
    /// trailing operator (`DATE >=`).
    pub fn parse(field: &str, token: &str) -> Result<Self> {
        let collapsed = token.split_whitespace().collect::<Vec<_>>().join(" ");
        let compact: String = collapsed
            .chars()
            .filter(|c| *c != '_' && *c != ' ')
            .collect::<String>()
            .to_uppercase();

        if let Some(kind) = Self::from_word(&compact) {
            return Ok(kind);
        }

        if let Some((head, operator)) = collapsed.split_once(' ') {
            let op = Comparison::parse(operator).map_err(|_| {
                RepositoryError::invalid_condition(
                    field,
                    format!("unknown operator '{}' in '{}'", operator, collapsed),
                )
            });
            match head.to_uppercase().as_str() {
                "DATE" => return Ok(ConditionKind::Date(op?)),
                "DAY" => return Ok(ConditionKind::Day(op?)),
                "MONTH" => return Ok(ConditionKind::Month(op?)),
                "YEAR" => return Ok(ConditionKind::Year(op?)),
                _ => {}
            }
        }

        Comparison::parse(&collapsed)
            .map(ConditionKind::Compare)
            .map_err(|_| {
                RepositoryError::invalid_condition(
                    field,
                    format!("unknown condition kind or operator '{}'", collapsed),
                )
            })
    }

    fn from_word(word: &str) -> Option<Self> {
        let kind = match word {
            "EQ" => ConditionKind::Eq,
            "IN" => ConditionKind::In,
            "NOTIN" => ConditionKind::NotIn,
            "DATE" => ConditionKind::Date(Comparison::Eq),
            "DAY" => ConditionKind::Day(Comparison::Eq),
            "MONTH" => ConditionKind::Month(Comparison::Eq),
            "YEAR" => ConditionKind::Year(Comparison::Eq),
            "EXISTS" => ConditionKind::Exists,
            "HAS" => ConditionKind::Has,
            "HASMORPH" | "HASPOLYMORPHIC" => ConditionKind::HasPolymorphic,
            "DOESNTHAVE" | "DOESNOTHAVE" => ConditionKind::DoesNotHave,
            "DOESNTHAVEMORPH" | "DOESNOTHAVEPOLYMORPHIC" => {
                ConditionKind::DoesNotHavePolymorphic
            }
            "BETWEEN" => ConditionKind::Between,
            "BETWEENCOLUMNS" => ConditionKind::BetweenColumns,
            "NOTBETWEEN" => ConditionKind::NotBetween,
            "NOTBETWEENCOLUMNS" => ConditionKind::NotBetweenColumns,
            "RAW" => ConditionKind::Raw,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical spelling, used in error messages
    pub fn name(&self) -> String {
        match self {
            ConditionKind::Eq => "EQ".into(),
            ConditionKind::In => "IN".into(),
            ConditionKind::NotIn => "NOT_IN".into(),
            ConditionKind::Date(op) => format!("DATE {}", op),
            ConditionKind::Day(op) => format!("DAY {}", op),
            ConditionKind::Month(op) => format!("MONTH {}", op),
            ConditionKind::Year(op) => format!("YEAR {}", op),
            ConditionKind::Exists => "EXISTS".into(),
            ConditionKind::Has => "HAS".into(),
            ConditionKind::HasPolymorphic => "HAS_POLYMORPHIC".into(),
            ConditionKind::DoesNotHave => "DOES_NOT_HAVE".into(),
            ConditionKind::DoesNotHavePolymorphic => "DOES_NOT_HAVE_POLYMORPHIC".into(),
            ConditionKind::Between => "BETWEEN".into(),
            ConditionKind::BetweenColumns => "BETWEEN_COLUMNS".into(),
            ConditionKind::NotBetween => "NOT_BETWEEN".into(),
            ConditionKind::NotBetweenColumns => "NOT_BETWEEN_COLUMNS".into(),
            ConditionKind::Raw => "RAW".into(),
            ConditionKind::Compare(op) => op.as_str().into(),
        }
    }
}

/// Translates condition lists into filter calls on a [`Query`]
pub struct ConditionCompiler;

impl ConditionCompiler {
    /// Validate every condition, then apply them to `query` in list order
    pub fn compile(query: Query, conditions: &[Condition]) -> Result<Query> {
        let compiled = Self::validate(conditions)?;
        trace!(count = compiled.len(), "applying compiled conditions");
        Ok(compiled.into_iter().fold(query, Query::filter))
    }

    /// Validate a condition list without touching any handle
    pub fn validate(conditions: &[Condition]) -> Result<Vec<Filter>> {
        conditions.iter().map(Self::validate_one).collect()
    }

    fn validate_one(condition: &Condition) -> Result<Filter> {
        let (field, kind, value) = match condition {
            Condition::Equals { field, value } => {
                return Ok(Filter::Compare {
                    field: field.clone(),
                    op: Comparison::Eq,
                    value: value.clone(),
                });
            }
            Condition::Spec { field, kind, value } => {
                (field.as_str(), ConditionKind::parse(field, kind)?, value)
            }
        };

        let filter = match kind {
            ConditionKind::Eq => Filter::Compare {
                field: field.to_string(),
                op: Comparison::Eq,
                value: scalar(field, kind, value)?,
            },
            ConditionKind::Compare(op) => Filter::Compare {
                field: field.to_string(),
                op,
                value: scalar(field, kind, value)?,
            },
            ConditionKind::In | ConditionKind::NotIn => Filter::In {
                field: field.to_string(),
                values: array(field, kind, value)?.to_vec(),
                negated: kind == ConditionKind::NotIn,
            },
            ConditionKind::Date(op)
            | ConditionKind::Day(op)
            | ConditionKind::Month(op)
            | ConditionKind::Year(op) => Filter::DatePart {
                part: match kind {
                    ConditionKind::Date(_) => DatePart::Date,
                    ConditionKind::Day(_) => DatePart::Day,
                    ConditionKind::Month(_) => DatePart::Month,
                    _ => DatePart::Year,
                },
                field: field.to_string(),
                op,
                value: scalar(field, kind, value)?,
            },
            ConditionKind::Exists => Filter::Exists {
                group: predicate(field, kind, value)?.build(),
            },
            ConditionKind::Has
            | ConditionKind::HasPolymorphic
            | ConditionKind::DoesNotHave
            | ConditionKind::DoesNotHavePolymorphic => Filter::Relation {
                relation: field.to_string(),
                constraint: predicate(field, kind, value)?.build(),
                negated: matches!(
                    kind,
                    ConditionKind::DoesNotHave | ConditionKind::DoesNotHavePolymorphic
                ),
                polymorphic: matches!(
                    kind,
                    ConditionKind::HasPolymorphic | ConditionKind::DoesNotHavePolymorphic
                ),
            },
            ConditionKind::Between | ConditionKind::NotBetween => {
                let (low, high) = bounds(field, kind, value)?;
                Filter::Between {
                    field: field.to_string(),
                    low: low.clone(),
                    high: high.clone(),
                    negated: kind == ConditionKind::NotBetween,
                }
            }
            ConditionKind::BetweenColumns | ConditionKind::NotBetweenColumns => {
                let (low, high) = bounds(field, kind, value)?;
                let (Value::String(low), Value::String(high)) = (low, high) else {
                    return Err(mismatch(field, kind, "two column names"));
                };
                Filter::BetweenColumns {
                    field: field.to_string(),
                    low_column: low.clone(),
                    high_column: high.clone(),
                    negated: kind == ConditionKind::NotBetweenColumns,
                }
            }
            ConditionKind::Raw => match value {
                ConditionValue::Value(Value::String(expression)) => Filter::Raw {
                    expression: expression.clone(),
                },
                _ => return Err(mismatch(field, kind, "a string expression")),
            },
        };

        Ok(filter)
    }
}

fn mismatch(field: &str, kind: ConditionKind, expected: &'static str) -> RepositoryError {
    RepositoryError::TypeMismatch {
        field: field.to_string(),
        kind: kind.name(),
        expected,
    }
}

fn scalar(field: &str, kind: ConditionKind, value: &ConditionValue) -> Result<Value> {
    match value {
        ConditionValue::Value(value) => Ok(value.clone()),
        ConditionValue::Predicate(_) => Err(mismatch(field, kind, "a value, not a predicate")),
    }
}

fn array<'a>(field: &str, kind: ConditionKind, value: &'a ConditionValue) -> Result<&'a [Value]> {
    match value {
        ConditionValue::Value(Value::Array(items)) => Ok(items),
        _ => Err(mismatch(field, kind, "an array")),
    }
}

fn bounds<'a>(
    field: &str,
    kind: ConditionKind,
    value: &'a ConditionValue,
) -> Result<(&'a Value, &'a Value)> {
    match array(field, kind, value)? {
        [low, high] => Ok((low, high)),
        _ => Err(mismatch(field, kind, "an array of exactly two bounds")),
    }
}

fn predicate(field: &str, kind: ConditionKind, value: &ConditionValue) -> Result<Predicate> {
    match value {
        ConditionValue::Predicate(predicate) => Ok(predicate.clone()),
        ConditionValue::Value(_) => Err(mismatch(field, kind, "a predicate")),
    }
}
