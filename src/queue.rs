//! Coalescing background work queue
//!
//! Each queue owns one worker task. Producers never wait: `push` only takes
//! the queue lock long enough to drop, merge or append the item. Items run on
//! tokio's blocking pool because handlers call into the (blocking)
//! connector.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use crate::error::{SvnCacheError, SvnCacheResult};

/// Work that can be folded into a pending item for the same target
pub trait QueuedItem: PartialEq + Send + 'static {
    /// Whether this item may be dropped when an equal item is already pending
    fn can_skip(&self) -> bool {
        false
    }

    /// Whether `other` addresses the same target and can be folded into `self`
    fn can_merge(&self, other: &Self) -> bool;

    /// Fold `other` into `self`
    fn merge(&mut self, other: Self);
}

type Handler<T> = dyn Fn(T, &CancellationToken) -> SvnCacheResult<()> + Send + Sync;

struct Shared<T> {
    pending: Mutex<VecDeque<T>>,
    wakeup: Notify,
    idle: Notify,
    /// Pending plus running items
    in_flight: AtomicUsize,
    cancel: CancellationToken,
}

impl<T> Shared<T> {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Named FIFO queue with a dedicated worker
pub struct CoalescingQueue<T: QueuedItem> {
    name: String,
    shared: Arc<Shared<T>>,
    _stop_on_drop: DropGuard,
}

impl<T: QueuedItem> CoalescingQueue<T> {
    /// Start a queue on the current tokio runtime
    pub fn new<F>(name: impl Into<String>, handler: F) -> SvnCacheResult<Self>
    where
        F: Fn(T, &CancellationToken) -> SvnCacheResult<()> + Send + Sync + 'static,
    {
        let handle = Handle::try_current()
            .map_err(|e| SvnCacheError::Internal(format!("no tokio runtime for work queue: {}", e)))?;
        Ok(Self::with_handle(name, &handle, handler))
    }

    /// Start a queue on the given runtime
    pub fn with_handle<F>(name: impl Into<String>, handle: &Handle, handler: F) -> Self
    where
        F: Fn(T, &CancellationToken) -> SvnCacheResult<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            idle: Notify::new(),
            in_flight: AtomicUsize::new(0),
            cancel: cancel.clone(),
        });

        let handler: Arc<Handler<T>> = Arc::new(handler);
        handle.spawn(worker(name.clone(), Arc::clone(&shared), handler));
        debug!("Started work queue {}", name);

        Self {
            name,
            shared,
            _stop_on_drop: cancel.drop_guard(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an item without blocking on the worker
    pub fn push(&self, item: T) {
        if self.shared.cancel.is_cancelled() {
            trace!("Queue {} is stopped, dropping item", self.name);
            return;
        }
        let Ok(mut pending) = self.shared.pending.lock() else {
            warn!("Queue {} lock poisoned, dropping item", self.name);
            return;
        };
        if item.can_skip() && pending.iter().any(|p| *p == item) {
            trace!("Queue {}: skipped duplicate item", self.name);
            return;
        }
        if let Some(target) = pending.iter_mut().find(|p| p.can_merge(&item)) {
            target.merge(item);
            trace!("Queue {}: merged item", self.name);
            return;
        }
        pending.push_back(item);
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        drop(pending);
        self.shared.wakeup.notify_one();
    }

    /// Items waiting to run
    pub fn pending(&self) -> usize {
        self.shared.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Resolve once nothing is pending or running, or the queue is stopped
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.in_flight.load(Ordering::Acquire) == 0 || self.shared.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = self.shared.cancel.cancelled() => return,
            }
        }
    }

    /// Cancel the running item and stop the worker; pending items are dropped
    pub fn shutdown(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.clear();
        }
        self.shared.idle.notify_waiters();
        debug!("Stopped work queue {}", self.name);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

async fn worker<T: QueuedItem>(name: String, shared: Arc<Shared<T>>, handler: Arc<Handler<T>>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        let next = shared.pending.lock().ok().and_then(|mut p| p.pop_front());
        let Some(item) = next else {
            tokio::select! {
                _ = shared.wakeup.notified() => {}
                _ = shared.cancel.cancelled() => {}
            }
            continue;
        };

        let handler = Arc::clone(&handler);
        let token = shared.cancel.child_token();
        let result = tokio::task::spawn_blocking(move || handler(item, &token)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => debug!("Queue {}: item cancelled", name),
            Ok(Err(e)) => warn!("Queue {}: item failed: {}", name, e),
            Err(e) => warn!("Queue {}: item panicked: {}", name, e),
        }
        shared.finish_one();
    }
    trace!("Worker of queue {} exited", name);
}
