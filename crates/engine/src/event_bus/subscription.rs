//! Subscriptions, handler groups, and the copy-on-write handler registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use dashmap::DashMap;
use eira_domain::{DomainError, Event, EventKind};

/// Delivery order. Higher priorities run first; `Monitor` runs before
/// everything else and is meant for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Highest = 4,
    Monitor = 5,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions {
    pub priority: Priority,
    /// Run on the worker pool instead of the publishing thread
    pub is_async: bool,
    /// Still receive the event after an earlier handler cancelled it
    pub receive_cancelled: bool,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn receiving_cancelled(mut self) -> Self {
        self.receive_cancelled = true;
        self
    }
}

impl From<Priority> for SubscriptionOptions {
    fn from(priority: Priority) -> Self {
        Self::new().with_priority(priority)
    }
}

/// Failure reported by a subscriber. Logged by the bus, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerGroupId(u64);

impl fmt::Display for HandlerGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Handle to one registration. Cancelling it removes only that handler;
/// cancelling twice does nothing.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    active: Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A named bundle of handlers registered and removed together.
pub struct HandlerGroup {
    name: String,
    entries: Vec<(EventKind, SubscriptionOptions, Handler)>,
}

impl HandlerGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn on<F>(mut self, kind: EventKind, options: SubscriptionOptions, handler: F) -> Self
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.entries.push((kind, options, Arc::new(handler)));
        self
    }

    /// Subscribe one shared handler to several kinds.
    pub fn on_each(mut self, kinds: &[EventKind], options: SubscriptionOptions, handler: Handler) -> Self {
        for kind in kinds {
            self.entries.push((*kind, options, Arc::clone(&handler)));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) struct HandlerEntry {
    pub(crate) id: SubscriptionId,
    pub(crate) options: SubscriptionOptions,
    pub(crate) handler: Handler,
    active: Arc<AtomicBool>,
}

type HandlerList = Arc<Vec<Arc<HandlerEntry>>>;

/// Per-kind handler lists, sorted by descending priority with ties in
/// registration order. Lists are replaced wholesale on every change so a
/// delivery in flight keeps the snapshot it started with.
pub(crate) struct Registry {
    handlers: RwLock<HashMap<EventKind, HandlerList>>,
    groups: DashMap<HandlerGroupId, (String, Vec<Subscription>)>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            groups: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn snapshot(&self, kind: EventKind) -> Option<HandlerList> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    pub(crate) fn insert(
        self: &Arc<Self>,
        kind: EventKind,
        options: SubscriptionOptions,
        handler: Handler,
    ) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let active = Arc::new(AtomicBool::new(true));
        let entry = Arc::new(HandlerEntry {
            id,
            options,
            handler,
            active: Arc::clone(&active),
        });

        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<Arc<HandlerEntry>> = handlers
            .get(&kind)
            .map(|current| current.iter().cloned().collect())
            .unwrap_or_default();
        // after every entry of equal or higher priority
        let position = list.partition_point(|e| e.options.priority >= options.priority);
        list.insert(position, entry);
        handlers.insert(kind, Arc::new(list));
        drop(handlers);

        tracing::debug!(
            event_kind = %kind,
            priority = ?options.priority,
            subscription_id = %id,
            "Subscribed"
        );

        Subscription {
            id,
            kind,
            active,
            registry: Arc::downgrade(self),
        }
    }

    pub(crate) fn remove(&self, kind: EventKind, id: SubscriptionId) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = handlers.get(&kind) else {
            return;
        };
        let list: Vec<Arc<HandlerEntry>> = current.iter().filter(|e| e.id != id).cloned().collect();
        if list.is_empty() {
            handlers.remove(&kind);
        } else {
            handlers.insert(kind, Arc::new(list));
        }
        tracing::debug!(event_kind = %kind, subscription_id = %id, "Unsubscribed");
    }

    pub(crate) fn insert_group(self: &Arc<Self>, group: HandlerGroup) -> HandlerGroupId {
        let id = HandlerGroupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriptions: Vec<Subscription> = group
            .entries
            .into_iter()
            .map(|(kind, options, handler)| self.insert(kind, options, handler))
            .collect();
        tracing::debug!(
            group_id = %id,
            group = %group.name,
            subscriptions = subscriptions.len(),
            "Registered handler group"
        );
        self.groups.insert(id, (group.name, subscriptions));
        id
    }

    pub(crate) fn remove_group(&self, id: HandlerGroupId) -> bool {
        let Some((_, (name, subscriptions))) = self.groups.remove(&id) else {
            return false;
        };
        for subscription in &subscriptions {
            subscription.cancel();
        }
        tracing::debug!(
            group_id = %id,
            group = %name,
            subscriptions = subscriptions.len(),
            "Unregistered handler group"
        );
        true
    }

    pub(crate) fn has_subscribers(&self, kind: EventKind) -> bool {
        self.snapshot(kind).is_some_and(|list| !list.is_empty())
    }

    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let kinds = handlers.len();
        let total = handlers.values().map(|list| list.len()).sum();
        (kinds, total, self.groups.len())
    }

    /// Drop every registration and deactivate its handle.
    pub(crate) fn clear(&self) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for entry in handlers.values().flat_map(|list| list.iter()) {
            entry.active.store(false, Ordering::Release);
        }
        handlers.clear();
        drop(handlers);
        self.groups.clear();
    }
}
