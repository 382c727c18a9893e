//! Turns the pull-based `poll` of a [`PriorityQueue`] into a push-based
//! async stream: every successful `poll` is buffered and a waiting
//! [`Consumer`] is woken, mirroring the single-slot wake pattern
//! `event.rs` uses for its timer/session wakeups (a shared `Notify` plus a
//! buffer, rather than one oneshot channel per waiter).

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::error::Result;
use crate::handle::{Handle, Ref};
use crate::queue::{Polled, Priority, PriorityChange, PriorityQueue};

struct Shared<Id, T> {
    ready: Mutex<VecDeque<Polled<Id, T>>>,
    notify: Notify,
    capacity: Option<usize>,
}

/// Wraps a [`PriorityQueue`], buffering every item that leaves it through
/// `poll` so that one or more [`Consumer`]s can await them.
pub struct Stream<Id, T, Q> {
    inner: Q,
    shared: Arc<Shared<Id, T>>,
}

impl<Id, T, Q: PriorityQueue<Id, T>> Stream<Id, T, Q> {
    pub fn new(inner: Q) -> Self {
        Self::with_capacity(inner, None)
    }

    /// Bounds the ready buffer: once it holds `capacity` items, the oldest
    /// buffered item is dropped to make room for the newest poll, rather
    /// than growing unboundedly when nothing is consuming. `None` means
    /// unbounded.
    pub fn with_capacity(inner: Q, capacity: Option<usize>) -> Self {
        Self {
            inner,
            shared: Arc::new(Shared { ready: Mutex::new(VecDeque::new()), notify: Notify::new(), capacity }),
        }
    }

    /// A handle that can asynchronously await items this stream buffers.
    /// Multiple consumers drain the same underlying buffer — each ready
    /// item goes to exactly one `next()` caller, not all of them.
    pub fn consumer(&self) -> Consumer<Id, T> {
        Consumer { shared: self.shared.clone() }
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.ready.lock().expect("stream buffer mutex poisoned").len()
    }

    /// Read-only access to the wrapped queue, for layers above that need
    /// more than the [`PriorityQueue`] vocabulary (e.g. iterating entries).
    pub fn inner(&self) -> &Q {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Q {
        &mut self.inner
    }
}

/// An async handle for draining items a [`Stream`] has buffered.
pub struct Consumer<Id, T> {
    shared: Arc<Shared<Id, T>>,
}

impl<Id, T> Clone for Consumer<Id, T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<Id, T> Consumer<Id, T> {
    /// Returns the next buffered item, waiting for one to arrive if the
    /// buffer is currently empty.
    pub async fn next(&self) -> Polled<Id, T> {
        loop {
            if let Some(item) = self.shared.ready.lock().expect("stream buffer mutex poisoned").pop_front() {
                return item;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Returns a buffered item without waiting, or `None` if none is ready.
    pub fn try_next(&self) -> Option<Polled<Id, T>> {
        self.shared.ready.lock().expect("stream buffer mutex poisoned").pop_front()
    }
}

impl<Id: Eq + Hash + Clone, T, Q: PriorityQueue<Id, T>> PriorityQueue<Id, T> for Stream<Id, T, Q> {
    fn insert(&mut self, priority: Priority, payload: T, id: Option<Id>) -> Result<Handle<Id, T>> {
        self.inner.insert(priority, payload, id)
    }

    fn peek(&self) -> Option<Handle<Id, T>> {
        self.inner.peek()
    }

    fn peek_priority(&self) -> Option<Priority> {
        self.inner.peek_priority()
    }

    fn poll(&mut self) -> Option<Polled<Id, T>> {
        let result = self.inner.poll();
        if let Some(polled) = &result {
            let mut ready = self.shared.ready.lock().expect("stream buffer mutex poisoned");
            if let Some(capacity) = self.shared.capacity {
                while ready.len() >= capacity {
                    ready.pop_front();
                    warn!(capacity, "stream ready buffer full, dropping oldest item");
                }
            }
            ready.push_back(polled.clone());
            drop(ready);
            self.shared.notify.notify_one();
        }
        result
    }

    fn remove(&mut self, reference: Ref<Id, T>) -> Result<Option<Polled<Id, T>>> {
        self.inner.remove(reference)
    }

    fn set_priority(&mut self, reference: Ref<Id, T>, new_priority: Priority) -> Result<PriorityChange<Id, T>> {
        self.inner.set_priority(reference, new_priority)
    }

    fn get(&self, reference: Ref<Id, T>) -> Result<Option<Handle<Id, T>>> {
        self.inner.get(reference)
    }

    fn has(&self, reference: Ref<Id, T>) -> bool {
        self.inner.has(reference)
    }

    fn clear(&mut self) {
        self.inner.clear();
        self.shared.ready.lock().expect("stream buffer mutex poisoned").clear();
    }

    fn size(&self) -> usize {
        self.inner.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::PairingHeap;

    #[tokio::test]
    async fn consumer_receives_items_as_they_are_polled() {
        let mut stream = Stream::new(PairingHeap::new());
        let consumer = stream.consumer();
        stream.insert(1, "a", None).unwrap();
        stream.insert(2, "b", None).unwrap();

        assert_eq!(stream.poll().unwrap().payload.as_ref(), &"a");
        let received = consumer.next().await;
        assert_eq!(received.payload.as_ref(), &"a");
    }

    #[tokio::test]
    async fn next_awaits_until_an_item_is_polled() {
        let mut stream = Stream::new(PairingHeap::new());
        let consumer = stream.consumer();
        let waiter = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.next().await }
        });
        tokio::task::yield_now().await;
        stream.insert(5, "late", None).unwrap();
        stream.poll();
        let received = waiter.await.unwrap();
        assert_eq!(received.payload.as_ref(), &"late");
    }

    #[tokio::test]
    async fn try_next_does_not_block_on_an_empty_buffer() {
        let stream: Stream<String, &str, PairingHeap<String, &str>> = Stream::new(PairingHeap::new());
        let consumer = stream.consumer();
        assert!(consumer.try_next().is_none());
    }

    #[tokio::test]
    async fn two_consumers_share_one_buffer() {
        let mut stream = Stream::new(PairingHeap::new());
        let a = stream.consumer();
        let b = stream.consumer();
        stream.insert(1, "x", None).unwrap();
        stream.insert(2, "y", None).unwrap();
        stream.poll();
        stream.poll();
        let first = a.next().await;
        let second = b.next().await;
        assert_ne!(first.payload, second.payload);
    }

    #[tokio::test]
    async fn bounded_capacity_drops_the_oldest_buffered_item() {
        let mut stream = Stream::with_capacity(PairingHeap::new(), Some(1));
        let consumer = stream.consumer();
        stream.insert(1, "a", None).unwrap();
        stream.insert(2, "b", None).unwrap();
        stream.poll();
        stream.poll();
        assert_eq!(stream.buffered_len(), 1);
        assert_eq!(consumer.try_next().unwrap().payload.as_ref(), &"b");
    }

    #[tokio::test]
    async fn clear_drops_buffered_items() {
        let mut stream = Stream::new(PairingHeap::new());
        stream.insert(1, "x", None).unwrap();
        stream.poll();
        assert_eq!(stream.buffered_len(), 1);
        stream.clear();
        assert_eq!(stream.buffered_len(), 0);
    }
}
