//! Named-event fan-out around a [`PriorityQueue`], and the listener registry
//! that drives it. Modeled on the registration patterns in `crypto.rs`
//! (typed outcomes delivered to callbacks) rather than any single upstream
//! event bus.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::handle::{Handle, Ref};
use crate::queue::{Polled, Priority, PriorityChange, PriorityQueue};

/// Every state change an [`Events`]-wrapped queue can report.
pub enum Event<Id, T> {
    Inserted { handle: Handle<Id, T>, priority: Priority },
    Polled { polled: Polled<Id, T> },
    Removed { polled: Polled<Id, T> },
    PriorityChanged { handle: Handle<Id, T>, before: Priority, after: Priority },
    Cleared,
    Peeked { handle: Handle<Id, T> },
    Got { handle: Handle<Id, T> },
    /// Fired when `has` finds a match. `has` only ever reports `true` or
    /// `false`; the `false` case is a non-event (nothing happened), so
    /// there is nothing to carry beyond the fact that it matched.
    Has,
    /// Fired once, the instant a poll or remove drops the queue to empty.
    Empty,
    /// Fired instead of `Removed`/`PriorityChanged` when the mutating call
    /// failed; the listener sees the error without the caller needing a
    /// second channel for it.
    Error { what: &'static str, message: String },
}

impl<Id, T> Event<Id, T> {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Inserted { .. } => "insert",
            Event::Polled { .. } => "poll",
            Event::Removed { .. } => "remove",
            Event::PriorityChanged { .. } => "update",
            Event::Cleared => "clear",
            Event::Peeked { .. } => "peek",
            Event::Got { .. } => "get",
            Event::Has => "has",
            Event::Empty => "empty",
            Event::Error { .. } => "error",
        }
    }
}

impl<Id: std::fmt::Debug, T> std::fmt::Debug for Event<Id, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("name", &self.name()).finish_non_exhaustive()
    }
}

const ALL: &str = "all";

type Listener<Id, T> = Box<dyn FnMut(&Event<Id, T>) + Send>;

/// A `name -> listeners` table plus a catch-all `"all"` bucket, addressable
/// by a listener id returned from `on`/`once` and accepted by `off`.
pub struct EventEmitter<Id, T> {
    listeners: HashMap<&'static str, Vec<(u64, Listener<Id, T>)>>,
    next_id: u64,
}

impl<Id, T> Default for EventEmitter<Id, T> {
    fn default() -> Self {
        Self { listeners: HashMap::new(), next_id: 0 }
    }
}

impl<Id, T> EventEmitter<Id, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one named event (use `"all"` for every
    /// event). Returns an id usable with `off`.
    pub fn on(&mut self, name: &'static str, listener: impl FnMut(&Event<Id, T>) + Send + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.entry(name).or_default().push((id, Box::new(listener)));
        id
    }

    /// Like `on`, but the listener removes itself after its first call.
    pub fn once(&mut self, name: &'static str, mut listener: impl FnMut(&Event<Id, T>) + Send + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        // `fired` is only ever touched from inside `emit`, which holds
        // `&mut self`, so there is no concurrent access to race on; a plain
        // `Cell` would do, but the listener closure must be `Send`.
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        self.listeners.entry(name).or_default().push((
            id,
            Box::new(move |event| {
                if !fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    listener(event);
                }
            }),
        ));
        id
    }

    pub fn off(&mut self, id: u64) -> bool {
        let mut removed = false;
        for bucket in self.listeners.values_mut() {
            let before = bucket.len();
            bucket.retain(|(listener_id, _)| *listener_id != id);
            removed |= bucket.len() != before;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn emit(&mut self, event: Event<Id, T>) {
        let name = event.name();
        trace!(event = name, "emit");
        if let Some(bucket) = self.listeners.get_mut(name) {
            for (_, listener) in bucket.iter_mut() {
                listener(&event);
            }
        }
        if name != ALL {
            if let Some(bucket) = self.listeners.get_mut(ALL) {
                for (_, listener) in bucket.iter_mut() {
                    listener(&event);
                }
            }
        }
    }
}

/// Wraps a [`PriorityQueue`], firing an [`Event`] on its emitter after every
/// mutation that the wrapped queue actually performed.
pub struct Events<Id, T, Q> {
    inner: Q,
    // `get`/`has` are `&self` in the `PriorityQueue` contract but still
    // need to emit; a `RefCell` gives them that without weakening the
    // trait's read-only signature. Nothing here is accessed concurrently —
    // callers that share an `Events` across threads do so behind a `Mutex`
    // (see `Scheduler`), which already serializes every access.
    emitter: RefCell<EventEmitter<Id, T>>,
}

impl<Id, T, Q: PriorityQueue<Id, T>> Events<Id, T, Q> {
    pub fn new(inner: Q) -> Self {
        Self { inner, emitter: RefCell::new(EventEmitter::new()) }
    }

    pub fn on(&self, name: &'static str, listener: impl FnMut(&Event<Id, T>) + Send + 'static) -> u64 {
        self.emitter.borrow_mut().on(name, listener)
    }

    pub fn once(&self, name: &'static str, listener: impl FnMut(&Event<Id, T>) + Send + 'static) -> u64 {
        self.emitter.borrow_mut().once(name, listener)
    }

    pub fn off(&self, id: u64) -> bool {
        self.emitter.borrow_mut().off(id)
    }

    /// Read-only access to the wrapped queue, for layers above that need
    /// more than the [`PriorityQueue`] vocabulary (e.g. iterating entries).
    pub fn inner(&self) -> &Q {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Q {
        &mut self.inner
    }

    fn emit_empty_if_drained(&self)
    where
        Id: Eq + Hash + Clone,
    {
        if self.inner.is_empty() {
            self.emitter.borrow_mut().emit(Event::Empty);
        }
    }
}

impl<Id: Eq + Hash + Clone, T, Q: PriorityQueue<Id, T>> PriorityQueue<Id, T> for Events<Id, T, Q> {
    fn insert(&mut self, priority: Priority, payload: T, id: Option<Id>) -> Result<Handle<Id, T>> {
        let result = self.inner.insert(priority, payload, id);
        let mut emitter = self.emitter.borrow_mut();
        match &result {
            Ok(handle) => emitter.emit(Event::Inserted { handle: handle.clone(), priority }),
            Err(err) => emitter.emit(Event::Error { what: "insert", message: err.to_string() }),
        }
        drop(emitter);
        result
    }

    fn peek(&self) -> Option<Handle<Id, T>> {
        let result = self.inner.peek();
        if let Some(handle) = &result {
            self.emitter.borrow_mut().emit(Event::Peeked { handle: handle.clone() });
        }
        result
    }

    fn peek_priority(&self) -> Option<Priority> {
        self.inner.peek_priority()
    }

    fn poll(&mut self) -> Option<Polled<Id, T>> {
        let result = self.inner.poll();
        if let Some(polled) = &result {
            self.emitter.borrow_mut().emit(Event::Polled { polled: polled.clone() });
            self.emit_empty_if_drained();
        }
        result
    }

    fn remove(&mut self, reference: Ref<Id, T>) -> Result<Option<Polled<Id, T>>> {
        let result = self.inner.remove(reference);
        match &result {
            Ok(Some(polled)) => {
                self.emitter.borrow_mut().emit(Event::Removed { polled: polled.clone() });
                self.emit_empty_if_drained();
            }
            Ok(None) => {}
            Err(err) => self.emitter.borrow_mut().emit(Event::Error { what: "remove", message: err.to_string() }),
        }
        result
    }

    fn set_priority(&mut self, reference: Ref<Id, T>, new_priority: Priority) -> Result<PriorityChange<Id, T>> {
        let result = self.inner.set_priority(reference, new_priority);
        match &result {
            Ok(PriorityChange::Changed { handle, before, after }) => {
                self.emitter.borrow_mut().emit(Event::PriorityChanged {
                    handle: handle.clone(),
                    before: *before,
                    after: *after,
                })
            }
            Ok(PriorityChange::Unchanged) => {}
            Err(err) => self.emitter.borrow_mut().emit(Event::Error { what: "set_priority", message: err.to_string() }),
        }
        result
    }

    fn get(&self, reference: Ref<Id, T>) -> Result<Option<Handle<Id, T>>> {
        let result = self.inner.get(reference);
        if let Ok(Some(handle)) = &result {
            self.emitter.borrow_mut().emit(Event::Got { handle: handle.clone() });
        }
        result
    }

    fn has(&self, reference: Ref<Id, T>) -> bool {
        let result = self.inner.has(reference);
        if result {
            self.emitter.borrow_mut().emit(Event::Has);
        }
        result
    }

    fn clear(&mut self) {
        self.inner.clear();
        self.emitter.borrow_mut().emit(Event::Cleared);
    }

    fn size(&self) -> usize {
        self.inner.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::PairingHeap;
    use std::sync::{Arc, Mutex};

    fn names_sink() -> (Arc<Mutex<Vec<&'static str>>>, impl FnMut(&Event<String, &'static str>) + Send) {
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        (names, move |event: &Event<String, &'static str>| sink.lock().unwrap().push(event.name()))
    }

    #[test]
    fn insert_and_poll_fire_named_events() {
        let (names, sink) = names_sink();
        let mut q = Events::new(PairingHeap::new());
        q.on("insert", sink);
        let (poll_names, poll_sink) = names_sink();
        q.on("poll", poll_sink);
        q.insert(1, "a", None).unwrap();
        q.poll();
        assert_eq!(*names.lock().unwrap(), vec!["insert"]);
        assert_eq!(*poll_names.lock().unwrap(), vec!["poll"]);
    }

    #[test]
    fn all_bucket_receives_every_event() {
        let (names, sink) = names_sink();
        let mut q = Events::new(PairingHeap::new());
        q.on("all", sink);
        q.insert(1, "a", None).unwrap();
        q.poll();
        q.clear();
        assert_eq!(*names.lock().unwrap(), vec!["insert", "poll", "empty", "clear"]);
    }

    #[test]
    fn empty_fires_only_when_last_item_leaves() {
        let (names, sink) = names_sink();
        let mut q = Events::new(PairingHeap::new());
        q.on("empty", sink);
        q.insert(1, "a", None).unwrap();
        q.insert(2, "b", None).unwrap();
        q.poll();
        assert!(names.lock().unwrap().is_empty());
        q.poll();
        assert_eq!(*names.lock().unwrap(), vec!["empty"]);
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let (names, sink) = names_sink();
        let mut q = Events::new(PairingHeap::new());
        q.once("insert", sink);
        q.insert(1, "a", None).unwrap();
        q.insert(2, "b", None).unwrap();
        assert_eq!(*names.lock().unwrap(), vec!["insert"]);
    }

    #[test]
    fn off_stops_delivery() {
        let (names, sink) = names_sink();
        let mut q = Events::new(PairingHeap::new());
        let id = q.on("insert", sink);
        q.insert(1, "a", None).unwrap();
        assert!(q.off(id));
        q.insert(2, "b", None).unwrap();
        assert_eq!(*names.lock().unwrap(), vec!["insert"]);
    }

    #[test]
    fn peek_get_and_has_emit_on_a_hit() {
        let (peek_names, peek_sink) = names_sink();
        let (get_names, get_sink) = names_sink();
        let (has_names, has_sink) = names_sink();
        let mut q = Events::new(PairingHeap::new());
        q.on("peek", peek_sink);
        q.on("get", get_sink);
        q.on("has", has_sink);
        let handle = q.insert(1, "a", Some("k".to_string())).unwrap();

        q.peek();
        q.get(Ref::Handle(handle.clone())).unwrap();
        assert!(q.has(Ref::Id("k".to_string())));

        assert_eq!(*peek_names.lock().unwrap(), vec!["peek"]);
        assert_eq!(*get_names.lock().unwrap(), vec!["get"]);
        assert_eq!(*has_names.lock().unwrap(), vec!["has"]);
    }

    #[test]
    fn get_and_has_stay_silent_on_a_miss() {
        let (get_names, get_sink) = names_sink();
        let (has_names, has_sink) = names_sink();
        let mut q: Events<String, &str, PairingHeap<String, &str>> = Events::new(PairingHeap::new());
        q.on("get", get_sink);
        q.on("has", has_sink);

        assert!(q.get(Ref::Id("missing".to_string())).unwrap().is_none());
        assert!(!q.has(Ref::Id("missing".to_string())));

        assert!(get_names.lock().unwrap().is_empty());
        assert!(has_names.lock().unwrap().is_empty());
    }

    #[test]
    fn duplicate_insert_error_emits_error_event() {
        let (names, sink) = names_sink();
        let mut q = Events::new(PairingHeap::new());
        q.on("error", sink);
        q.insert(1, "a", Some("k".to_string())).unwrap();
        let _ = q.insert(2, "b", Some("k".to_string()));
        assert_eq!(*names.lock().unwrap(), vec!["error"]);
    }
}
