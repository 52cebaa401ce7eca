//! Fixed-size pool that runs async handler invocations.
//!
//! `N` worker tasks share one unbounded job queue. Each job is a synchronous
//! closure and runs on tokio's blocking pool, so at most `N` async handlers
//! execute at once no matter how many events are queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio_util::task::TaskTracker;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Outstanding jobs, with a wakeup for anyone waiting on an empty queue.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub(crate) struct WorkerPool {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Job>>>>,
    pending: Arc<Pending>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers on `handle`.
    pub(crate) fn start(handle: &Handle, size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let pending = Arc::new(Pending::default());
        let tracker = TaskTracker::new();

        for worker in 0..size {
            let receiver = Arc::clone(&receiver);
            let pending = Arc::clone(&pending);
            tracker.spawn_on(
                async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };
                        if let Err(e) = tokio::task::spawn_blocking(job).await {
                            tracing::error!(worker, error = %e, "Event bus job aborted");
                        }
                        pending.finish();
                    }
                    tracing::debug!(worker, "Event bus worker stopped");
                },
                handle,
            );
        }

        tracing::debug!(workers = size, "Event bus worker pool started");
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            pending,
            tracker,
            size,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Queue a job. Once the pool is closing, the job runs on the caller's
    /// thread so work submitted during the drain is not lost.
    pub(crate) fn submit(&self, job: Job) {
        self.pending.begin();
        let rejected = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(sender) => sender.send(job).err().map(|e| e.0),
                None => Some(job),
            }
        };
        if let Some(job) = rejected {
            job();
            self.pending.finish();
        }
    }

    /// Resolves once no job is queued or running.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Close the queue, let the workers drain it, and wait for them to exit.
    pub(crate) async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!(workers = self.size, "Event bus worker pool drained");
    }
}
