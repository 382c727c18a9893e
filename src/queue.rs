use std::sync::Arc;

use crate::error::Result;
use crate::handle::{Handle, Ref};

/// A priority value. Interpreted by the scheduler layer as a wall-clock
/// instant in milliseconds; interpreted by the bare heap as an opaque,
/// totally ordered key.
pub type Priority = i64;

/// The result of a successful `poll` or `remove`: the handle that was
/// removed, the priority it held, and its payload.
pub struct Polled<Id, T> {
    pub handle: Handle<Id, T>,
    pub priority: Priority,
    pub payload: Arc<T>,
}

impl<Id, T> Clone for Polled<Id, T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            priority: self.priority,
            payload: self.payload.clone(),
        }
    }
}

impl<Id: std::fmt::Debug, T> std::fmt::Debug for Polled<Id, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Polled")
            .field("handle", &self.handle)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// The outcome of `set_priority`: either the priority was unchanged (a
/// no-op), or it changed, carrying the handle that now refers to the item
/// (the increase path reissues a new handle — see heap.rs).
#[derive(Debug)]
pub enum PriorityChange<Id, T> {
    Unchanged,
    Changed {
        handle: Handle<Id, T>,
        before: Priority,
        after: Priority,
    },
}

/// The operations every layer of the queue (bare heap, event-observed heap,
/// stream-observed heap, scheduled facade) implements. Higher layers
/// decorate a lower layer's behavior without changing this contract.
pub trait PriorityQueue<Id, T> {
    fn insert(&mut self, priority: Priority, payload: T, id: Option<Id>) -> Result<Handle<Id, T>>;

    fn peek(&self) -> Option<Handle<Id, T>>;

    fn poll(&mut self) -> Option<Polled<Id, T>>;

    fn remove(&mut self, reference: Ref<Id, T>) -> Result<Option<Polled<Id, T>>>;

    fn set_priority(
        &mut self,
        reference: Ref<Id, T>,
        new_priority: Priority,
    ) -> Result<PriorityChange<Id, T>>;

    fn get(&self, reference: Ref<Id, T>) -> Result<Option<Handle<Id, T>>>;

    fn has(&self, reference: Ref<Id, T>) -> bool;

    fn clear(&mut self);

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The priority of the current root, if any. Not part of spec.md's
    /// public vocabulary (`peek` returns a bare handle); the scheduler layer
    /// needs the priority itself to compute a timer delay, so every layer
    /// forwards it.
    fn peek_priority(&self) -> Option<Priority>;
}
