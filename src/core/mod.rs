//! Core module containing the fundamental traits and types of the data-access layer

pub mod condition;
pub mod criteria;
pub mod error;
pub mod events;
pub mod field;
pub mod query;
pub mod record;
pub mod service;

pub use condition::{Condition, ConditionCompiler, ConditionKind, ConditionValue};
pub use criteria::{
    CriteriaChain, CriteriaRegistry, Criterion, OnlyTrashed, RepositoryInfo, WithTrashed,
};
pub use error::{RepositoryError, Result};
pub use events::{EventBus, EventEnvelope, MutationAction, MutationEvent, MutationListener};
pub use field::Comparison;
pub use query::{Direction, Filter, Page, PaginationMeta, Predicate, Query, TrashedMode};
pub use record::Record;
pub use service::{Aggregate, DataSource, Operation};
