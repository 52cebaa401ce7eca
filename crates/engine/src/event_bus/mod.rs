//! In-process event bus.
//!
//! Mods talk to each other by publishing [`Event`]s. Subscribers register per
//! event kind with a [`Priority`]; each delivery walks the kind's handler list
//! from highest to lowest priority. Synchronous handlers run on the
//! publishing thread, async ones on a fixed [worker pool](worker_pool).
//!
//! A failing or panicking handler is logged and skipped; the rest of the
//! delivery continues. A handler may cancel a cancellable event, after which
//! only handlers registered with `receive_cancelled` still see it.

mod subscription;
mod worker_pool;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eira_domain::{Event, EventKind};
use tokio::runtime::Handle;

pub use subscription::{
    Handler, HandlerError, HandlerGroup, HandlerGroupId, Priority, Subscription, SubscriptionId,
    SubscriptionOptions,
};

use subscription::{HandlerEntry, Registry};
use worker_pool::WorkerPool;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Event bus is shut down")]
    Shutdown,
    #[error("Event bus requires a running tokio runtime")]
    NoRuntime,
}

/// Snapshot of the bus registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    /// Event kinds with at least one subscriber
    pub event_kinds: usize,
    pub total_subscriptions: usize,
    pub handler_groups: usize,
    /// Async invocations queued or running
    pub pending_jobs: usize,
}

pub struct EventBus {
    registry: Arc<Registry>,
    pool: WorkerPool,
    closed: AtomicBool,
}

impl EventBus {
    /// Create a bus whose async handlers run on `workers` pool tasks.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn new(workers: usize) -> Result<Self, BusError> {
        let handle = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        Ok(Self::with_handle(&handle, workers))
    }

    pub fn with_handle(handle: &Handle, workers: usize) -> Self {
        Self {
            registry: Registry::new(),
            pool: WorkerPool::start(handle, workers),
            closed: AtomicBool::new(false),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Deliver `event` on the worker pool and return immediately.
    pub fn publish(&self, event: Event) -> Result<(), BusError> {
        self.ensure_open()?;
        let event = Arc::new(event);
        let registry = Arc::clone(&self.registry);
        let pool = self.pool.clone();
        self.pool.submit(Box::new(move || deliver(&registry, &pool, &event)));
        Ok(())
    }

    /// Deliver `event` on the calling thread.
    ///
    /// Returns once every synchronous handler has run; async handlers are
    /// queued but not awaited. The returned event carries the final
    /// cancelled flag.
    pub fn publish_sync(&self, event: Event) -> Result<Arc<Event>, BusError> {
        self.ensure_open()?;
        let event = Arc::new(event);
        deliver(&self.registry, &self.pool, &event);
        Ok(event)
    }

    /// Like [`publish`](Self::publish), then run `callback` once every
    /// handler of the delivery has been attempted.
    pub fn publish_with_callback<F>(&self, event: Event, callback: F) -> Result<(), BusError>
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        self.ensure_open()?;
        let event = Arc::new(event);
        let registry = Arc::clone(&self.registry);
        let pool = self.pool.clone();
        self.pool.submit(Box::new(move || {
            deliver(&registry, &pool, &event);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                tracing::error!(
                    event_kind = %event.kind(),
                    panic = %panic_message(payload.as_ref()),
                    "Publish callback panicked"
                );
            }
        }));
        Ok(())
    }

    // =========================================================================
    // Subscribing
    // =========================================================================

    pub fn subscribe<F>(&self, kind: EventKind, options: SubscriptionOptions, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.registry.insert(kind, options, Arc::new(handler))
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.cancel();
    }

    pub fn register_handler_group(&self, group: HandlerGroup) -> HandlerGroupId {
        self.registry.insert_group(group)
    }

    /// Returns false if the group was not registered.
    pub fn unregister_handler_group(&self, id: HandlerGroupId) -> bool {
        self.registry.remove_group(id)
    }

    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.registry.has_subscribers(kind)
    }

    pub fn stats(&self) -> BusStats {
        let (event_kinds, total_subscriptions, handler_groups) = self.registry.counts();
        BusStats {
            event_kinds,
            total_subscriptions,
            handler_groups,
            pending_jobs: self.pool.pending(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Wait until every queued delivery and async handler has finished.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    /// Stop accepting events, drain in-flight async work, and drop every
    /// subscription. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(pending = self.pool.pending(), "Shutting down event bus");
        self.pool.shutdown().await;
        self.registry.clear();
        tracing::info!("Event bus shut down");
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_shut_down() {
            Err(BusError::Shutdown)
        } else {
            Ok(())
        }
    }
}

fn deliver(registry: &Registry, pool: &WorkerPool, event: &Arc<Event>) {
    let Some(entries) = registry.snapshot(event.kind()) else {
        return;
    };
    let cancellable = event.kind().is_cancellable();

    for entry in entries.iter() {
        if cancellable && event.is_cancelled() && !entry.options.receive_cancelled {
            continue;
        }
        if entry.options.is_async {
            let entry = Arc::clone(entry);
            let event = Arc::clone(event);
            pool.submit(Box::new(move || invoke(&entry, &event)));
        } else {
            invoke(entry, event);
        }
    }
}

fn invoke(entry: &HandlerEntry, event: &Event) {
    match panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(
                event_kind = %event.kind(),
                subscription_id = %entry.id,
                error = %e,
                "Event handler failed"
            );
        }
        Err(payload) => {
            tracing::error!(
                event_kind = %event.kind(),
                subscription_id = %entry.id,
                panic = %panic_message(payload.as_ref()),
                "Event handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
