//! Record trait defining the row abstraction every repository works with

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::{RepositoryError, Result};

/// A typed, serde-serializable row.
///
/// Records are evaluated by data sources through their JSON form, so every
/// field that conditions should be able to reach must be serialized.
///
/// Types that support recoverable deletion set `SOFT_DELETES = true` and
/// implement the `deleted_at` accessors over a real field:
///
/// ```rust,ignore
/// impl Record for Post {
///     const SOFT_DELETES: bool = true;
///
///     fn resource_name() -> &'static str { "post" }
///     fn id(&self) -> Uuid { self.id }
///     fn deleted_at(&self) -> Option<DateTime<Utc>> { self.deleted_at }
///     fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) { self.deleted_at = at; }
/// }
/// ```
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Whether the type supports soft deletes (trashing and restoring)
    const SOFT_DELETES: bool = false;

    /// The resource name (e.g., "user", "post")
    fn resource_name() -> &'static str;

    /// Get the unique identifier for this record
    fn id(&self) -> Uuid;

    /// Get the deletion timestamp (soft delete)
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Set or clear the deletion timestamp. A no-op for hard-delete types.
    fn set_deleted_at(&mut self, _at: Option<DateTime<Utc>>) {}

    /// Check if the record has been soft-deleted
    fn is_trashed(&self) -> bool {
        Self::SOFT_DELETES && self.deleted_at().is_some()
    }

    /// Serialize the record into its JSON form
    fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Build a record from a JSON attribute object, assigning a fresh id
    /// when the attributes do not carry one.
    fn from_attributes(attributes: Value) -> Result<Self> {
        let mut attributes = attributes;
        let object = attributes.as_object_mut().ok_or_else(|| {
            RepositoryError::invalid_condition(
                Self::resource_name(),
                "attributes must be a JSON object",
            )
        })?;
        object
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        serde_json::from_value(attributes).map_err(|e| {
            RepositoryError::Serialization(format!(
                "cannot build {} from attributes: {}",
                Self::resource_name(),
                e
            ))
        })
    }
}
