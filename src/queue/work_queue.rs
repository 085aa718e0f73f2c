//! FIFO hand-off queue with pop/acknowledge completion tracking

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

struct Inner<T> {
    items: VecDeque<T>,
    /// Items pushed but not yet acknowledged
    unfinished: usize,
}

/// An unbounded FIFO queue drained by concurrent workers
///
/// Every `pop` hands out a [`Lease`]; the item counts as finished only when
/// the lease is acknowledged, either explicitly or when it is dropped. This
/// makes "exactly one acknowledge per pop" hold on every path, including
/// early returns and unwinding.
pub struct WorkQueue<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
    available: Notify,
    drained: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            available: Notify::new(),
            drained: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueues an item and wakes one waiting consumer
    pub fn push(&self, item: T) {
        {
            let mut inner = self.lock();
            inner.items.push_back(item);
            inner.unfinished += 1;
        }
        self.available.notify_one();
    }

    /// Waits until an item is available and leases it to the caller
    ///
    /// Dropping the returned future before it completes loses no item.
    pub async fn pop(&self) -> Lease<'_, T> {
        loop {
            let notified = self.available.notified();
            if let Some(lease) = self.try_pop() {
                return lease;
            }
            notified.await;
        }
    }

    /// Leases the next item if one is queued
    pub fn try_pop(&self) -> Option<Lease<'_, T>> {
        let item = self.lock().items.pop_front()?;
        Some(Lease {
            queue: self,
            item: Some(item),
        })
    }

    /// Waits until every pushed item has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock().unfinished == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Items waiting to be popped
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items pushed and not yet acknowledged, leased ones included
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }

    fn acknowledge(&self) {
        let drained = {
            let mut inner = self.lock();
            inner.unfinished = inner.unfinished.saturating_sub(1);
            inner.unfinished == 0
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Nothing inside the guarded sections can panic, so a poisoned lock still holds consistent data
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An item popped from a [`WorkQueue`] and not yet acknowledged
pub struct Lease<'q, T> {
    queue: &'q WorkQueue<T>,
    item: Option<T>,
}

impl<T> Lease<'_, T> {
    pub fn item(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("lease item is only taken on acknowledge"),
        }
    }

    /// Marks the item as fully processed
    pub fn ack(mut self) {
        self.item.take();
        self.queue.acknowledge();
    }
}

impl<T> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if self.item.take().is_some() {
            self.queue.acknowledge();
        }
    }
}
