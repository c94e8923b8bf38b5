//! The bounded FIFO a publication engine fills and a caller drains.
//!
//! A `ResponseQueue` is shared (it is cheap to clone; clones refer to the
//! same underlying buffer). Several concurrent consumers calling `pop` or
//! iterating the `stream()` adapter partition the elements between them —
//! each response is handed to exactly one consumer, never broadcast.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::Stream;
use tokio::sync::Notify;

use fabric_errors::Error;

use crate::response::Response;

struct Inner {
    items: Mutex<VecDeque<Response>>,
    capacity: usize,
    closed: AtomicBool,
    notify: Notify,
}

/// A cooperative, backpressured queue of responses to one call.
#[derive(Clone)]
pub struct ResponseQueue {
    inner: Arc<Inner>,
}

impl ResponseQueue {
    pub fn new(capacity: usize) -> Self {
        ResponseQueue {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                capacity,
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Appends a response. Fails once the queue is closed or full; the
    /// publication engine treats a full queue as backpressure from a slow
    /// consumer, not as a delivery failure.
    pub fn push(&self, response: Response) -> Result<(), Error> {
        let mut items = self.inner.items.lock().unwrap();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::new("push to a closed response queue", vec![]));
        }
        if items.len() >= self.inner.capacity {
            return Err(Error::new("response queue is full", vec![]));
        }
        items.push_back(response);
        drop(items);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Marks the queue done. Further `push` calls return `Err`; consumers
    /// already waiting on an empty queue are woken and see `None`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a clone of the front element without removing it, waiting
    /// cooperatively until one is available or the queue closes.
    pub async fn peek_head(&self) -> Option<Response> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let items = self.inner.items.lock().unwrap();
                if let Some(r) = items.front() {
                    return Some(r.clone());
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Removes and returns the front element, waiting cooperatively until
    /// one is available or the queue closes with nothing left.
    pub async fn pop(&self) -> Option<Response> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut items = self.inner.items.lock().unwrap();
                if let Some(r) = items.pop_front() {
                    return Some(r);
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// A `Stream` adapter over `pop`. Consumes an owned handle to the shared
    /// buffer, so several independent streams over clones of the same queue
    /// still partition its elements rather than each seeing every item.
    pub fn stream(self) -> impl Stream<Item = Response> {
        async_stream::stream! {
            while let Some(r) = self.pop().await {
                yield r;
            }
        }
    }
}
