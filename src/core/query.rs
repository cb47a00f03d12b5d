//! Query handle and pagination utilities
//!
//! A [`Query`] is the declarative filter state threaded through the
//! repository pipeline. Every builder method consumes the handle and returns
//! the next one, so criteria, scopes and conditions compose by folding over
//! a single value:
//!
//! ```rust,ignore
//! let query = Query::new()
//!     .where_eq("status", "published")
//!     .where_in("category", vec![json!("rust"), json!("go")])
//!     .order_by("created_at", Direction::Desc)
//!     .limit(10);
//! ```
//!
//! The handle serializes to JSON, which the cache decorator uses as part of
//! its key fingerprint.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::core::field::Comparison;

/// How a clause joins the clauses before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Boolean {
    And,
    Or,
}

/// Date component extracted by a date-part filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePart {
    Date,
    Day,
    Month,
    Year,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// Soft-delete visibility of a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashedMode {
    /// Trashed records are hidden
    #[default]
    Exclude,
    /// Trashed records are returned alongside live ones
    With,
    /// Only trashed records are returned
    Only,
}

/// A single filter
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    Compare {
        field: String,
        op: Comparison,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        field: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    BetweenColumns {
        field: String,
        low_column: String,
        high_column: String,
        negated: bool,
    },
    DatePart {
        part: DatePart,
        field: String,
        op: Comparison,
        value: Value,
    },
    Null {
        field: String,
        negated: bool,
    },
    /// A nested group evaluated against the same row
    Exists { group: Query },
    /// A constraint over related rows reachable through `relation`
    Relation {
        relation: String,
        constraint: Query,
        negated: bool,
        polymorphic: bool,
    },
    Raw { expression: String },
}

/// A filter plus the connective joining it to the previous clause
#[derive(Debug, Clone, Serialize)]
pub struct Clause {
    pub boolean: Boolean,
    pub filter: Filter,
}

/// A sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// The query handle
///
/// Clauses are evaluated with SQL precedence: `AND` binds tighter than `OR`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Query {
    clauses: Vec<Clause>,
    orders: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
    trashed: TrashedMode,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, boolean: Boolean, filter: Filter) -> Self {
        self.clauses.push(Clause { boolean, filter });
        self
    }

    /// Append an `AND`-joined filter
    pub fn filter(self, filter: Filter) -> Self {
        self.push(Boolean::And, filter)
    }

    /// Append an `OR`-joined filter
    pub fn or_filter(self, filter: Filter) -> Self {
        self.push(Boolean::Or, filter)
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_cmp(field, Comparison::Eq, value)
    }

    pub fn where_cmp(
        self,
        field: impl Into<String>,
        op: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        self.filter(Filter::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn or_where_cmp(
        self,
        field: impl Into<String>,
        op: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        self.or_filter(Filter::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn where_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Filter::In {
            field: field.into(),
            values,
            negated: false,
        })
    }

    pub fn where_not_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Filter::In {
            field: field.into(),
            values,
            negated: true,
        })
    }

    pub fn where_between(
        self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.filter(Filter::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
            negated: false,
        })
    }

    pub fn where_not_between(
        self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.filter(Filter::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
            negated: true,
        })
    }

    pub fn where_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::Null {
            field: field.into(),
            negated: false,
        })
    }

    pub fn where_not_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::Null {
            field: field.into(),
            negated: true,
        })
    }

    /// Nested group, joined with `AND`
    pub fn where_group(self, group: Query) -> Self {
        self.filter(Filter::Exists { group })
    }

    /// Nested group, joined with `OR`
    pub fn or_where_group(self, group: Query) -> Self {
        self.or_filter(Filter::Exists { group })
    }

    /// Require at least one related row matching `constraint`
    pub fn where_has(self, relation: impl Into<String>, constraint: Query) -> Self {
        self.filter(Filter::Relation {
            relation: relation.into(),
            constraint,
            negated: false,
            polymorphic: false,
        })
    }

    /// Require that no related row matches `constraint`
    pub fn where_doesnt_have(self, relation: impl Into<String>, constraint: Query) -> Self {
        self.filter(Filter::Relation {
            relation: relation.into(),
            constraint,
            negated: true,
            polymorphic: false,
        })
    }

    pub fn where_raw(self, expression: impl Into<String>) -> Self {
        self.filter(Filter::Raw {
            expression: expression.into(),
        })
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            column: column.into(),
            direction,
        });
        self
    }

    /// Apply a `field:asc` / `field:desc` sort expression (default ascending)
    pub fn sort(self, expression: &str) -> Self {
        let (column, direction) = match expression.split_once(':') {
            Some((column, dir)) if dir.eq_ignore_ascii_case("desc") => (column, Direction::Desc),
            Some((column, _)) => (column, Direction::Asc),
            None => (expression, Direction::Asc),
        };
        self.order_by(column.trim(), direction)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.trashed = TrashedMode::With;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.trashed = TrashedMode::Only;
        self
    }

    /// Drop limit, offset and ordering, keeping filters and trashed
    /// visibility. Used to count the full result set behind a page.
    pub fn without_window(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self.orders.clear();
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    pub fn trashed(&self) -> TrashedMode {
        self.trashed
    }

    /// True when nothing has been applied to the handle
    pub fn is_fresh(&self) -> bool {
        self.clauses.is_empty()
            && self.orders.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.trashed == TrashedMode::Exclude
    }
}

/// A labelled query transformation, used by predicate-valued conditions
/// (EXISTS, HAS...) and by `Repository::where_has`.
///
/// The label stands in for the closure wherever the predicate has to be
/// printed or fingerprinted, so give distinct predicates distinct labels.
#[derive(Clone)]
pub struct Predicate {
    label: String,
    build: Arc<dyn Fn(Query) -> Query + Send + Sync>,
}

impl Predicate {
    pub fn new(
        label: impl Into<String>,
        build: impl Fn(Query) -> Query + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            build: Arc::new(build),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the transformation over `query`
    pub fn apply(&self, query: Query) -> Query {
        (self.build)(query)
    }

    /// Run the transformation over a fresh handle
    pub fn build(&self) -> Query {
        self.apply(Query::new())
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("label", &self.label)
            .finish()
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("predicate:{}", self.label))
    }
}

/// Paginated result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The paginated data
    pub data: Vec<T>,

    /// Pagination metadata
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    /// Current page number (starts at 1)
    pub page: usize,

    /// Number of items per page
    pub limit: usize,

    /// Total number of items (after filters); unknown for simple pagination
    pub total: Option<usize>,

    /// Total number of pages; unknown for simple pagination
    pub total_pages: Option<usize>,

    /// Whether there is a next page
    pub has_next: bool,

    /// Whether there is a previous page
    pub has_prev: bool,
}

impl PaginationMeta {
    /// Create pagination metadata from calculation
    pub fn new(page: usize, limit: usize, total: usize) -> Self {
        // Ensure limit is at least 1 to avoid division by zero
        let limit = limit.max(1);
        let page = page.max(1);
        let total_pages = if total == 0 { 0 } else { total.div_ceil(limit) };
        let start = (page - 1).saturating_mul(limit);

        Self {
            page,
            limit,
            total: Some(total),
            total_pages: Some(total_pages),
            has_next: start.saturating_add(limit) < total,
            has_prev: page > 1,
        }
    }

    /// Metadata for a page fetched without counting the full result set
    pub fn simple(page: usize, limit: usize, has_next: bool) -> Self {
        let page = page.max(1);
        Self {
            page,
            limit: limit.max(1),
            total: None,
            total_pages: None,
            has_next,
            has_prev: page > 1,
        }
    }

    /// Offset of the first row on this page
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}
