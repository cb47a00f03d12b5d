//! Mutation events raised by repositories
//!
//! Every committed write raises a [`MutationEvent`] on the [`EventBus`]. The
//! bus first awaits its registered [`MutationListener`]s (cache invalidation
//! is one), then broadcasts the event, wrapped in an [`EventEnvelope`], to
//! passive stream observers.
//!
//! ```text
//! Repository::create() ──▶ EventBus::publish() ──▶ listeners (awaited, in order)
//!                                              └─▶ broadcast channel ──▶ stream() receivers
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let bus = EventBus::new(1024);
//! bus.subscribe(Arc::new(InvalidationSubscriber::new(store, registry)));
//!
//! let mut rx = bus.stream();
//! repository.create(post).await?;
//!
//! if let Ok(envelope) = rx.recv().await {
//!     println!("{} {}", envelope.event.repository, envelope.event.action);
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    /// A record was created
    Created,
    /// A record was updated or restored
    Updated,
    /// An update is about to be sent to the data source
    Updating,
    /// A record was deleted (soft or hard)
    Deleted,
}

impl MutationAction {
    /// Get the action name (created, updated, updating, deleted)
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Created => "created",
            MutationAction::Updated => "updated",
            MutationAction::Updating => "updating",
            MutationAction::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed (or, for `Updating`, imminent) repository mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Name of the emitting repository, which is also its cache group
    pub repository: String,
    /// Resource name of the affected record type
    pub resource: String,
    pub action: MutationAction,
    /// The affected record, absent for bulk operations
    pub record: Option<Value>,
}

impl MutationEvent {
    pub fn new(
        repository: impl Into<String>,
        resource: impl Into<String>,
        action: MutationAction,
        record: Option<Value>,
    ) -> Self {
        Self {
            repository: repository.into(),
            resource: resource.into(),
            action,
            record,
        }
    }

    /// Id of the affected record, when one is attached
    pub fn record_id(&self) -> Option<Uuid> {
        self.record
            .as_ref()
            .and_then(|record| record.get("id"))
            .and_then(|id| id.as_str())
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

/// Envelope wrapping a mutation event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: MutationEvent,
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: MutationEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// A subscriber awaited on every published event it accepts
#[async_trait]
pub trait MutationListener: Send + Sync {
    /// Whether this listener wants events of the given action
    fn handles(&self, _action: MutationAction) -> bool {
        true
    }

    /// React to the event. Listeners cannot fail the mutation: errors must be
    /// handled (logged) inside.
    async fn handle(&self, event: &MutationEvent);
}

/// Event bus for repository mutations
///
/// The bus is cheap to clone (Arc internally) and can be shared across
/// repositories and threads.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    listeners: Arc<RwLock<Vec<Arc<dyn MutationListener>>>>,
}

impl EventBus {
    /// Create a new EventBus with the given broadcast capacity
    ///
    /// The capacity determines how many events can be buffered before slow
    /// stream receivers start losing events (lagged).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a listener. Listeners are awaited in registration order.
    pub fn subscribe(&self, listener: Arc<dyn MutationListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// Receive every future event as an envelope
    pub fn stream(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    fn snapshot(&self) -> Vec<Arc<dyn MutationListener>> {
        match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Publish an event
    ///
    /// Awaits every listener accepting the event's action, then broadcasts
    /// it. Returns the number of listeners that handled the event.
    pub async fn publish(&self, event: MutationEvent) -> usize {
        let listeners = self.snapshot();
        let mut handled = 0;
        for listener in listeners.iter().filter(|l| l.handles(event.action)) {
            listener.handle(&event).await;
            handled += 1;
        }

        debug!(
            repository = %event.repository,
            action = %event.action,
            listeners = handled,
            "mutation event published"
        );

        // send() returns Err only if there are no receivers, which is fine
        let _ = self.sender.send(EventEnvelope::new(event));
        handled
    }

    pub fn listener_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Get the current number of stream receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("receivers", &self.receiver_count())
            .finish()
    }
}
