use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::handle::{Handle, Ref};

/// A dual-indexed handle table: every stored payload gets a stable identity
/// (a [`Handle`]), resolvable either by an optional user-supplied id or by
/// payload identity (pointer equality of the payload's `Arc`, not value
/// equality — two distinct `Arc<T>`s with equal contents are distinct
/// payloads as far as the registry is concerned).
pub struct Registry<Id, T> {
    by_serial: HashMap<u64, Handle<Id, T>>,
    by_id: HashMap<Id, u64>,
    by_payload: HashMap<usize, u64>,
    next_serial: u64,
}

impl<Id, T> Default for Registry<Id, T> {
    fn default() -> Self {
        Self {
            by_serial: HashMap::new(),
            by_id: HashMap::new(),
            by_payload: HashMap::new(),
            next_serial: 0,
        }
    }
}

fn payload_key<T>(payload: &Arc<T>) -> usize {
    Arc::as_ptr(payload) as usize
}

impl<Id: Eq + Hash + Clone, T> Registry<Id, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, payload: Arc<T>, id: Option<Id>) -> Result<Handle<Id, T>> {
        let key = payload_key(&payload);
        if self.by_payload.contains_key(&key) {
            return Err(Error::DuplicatePayload);
        }
        if let Some(id) = &id {
            if self.by_id.contains_key(id) {
                return Err(Error::DuplicateId);
            }
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        let handle = Handle::new(serial, id.clone(), payload);
        self.by_payload.insert(key, serial);
        if let Some(id) = id {
            self.by_id.insert(id, serial);
        }
        self.by_serial.insert(serial, handle.clone());
        trace!(serial, "registered");
        Ok(handle)
    }

    /// Resolves a reference to the registry's canonical handle for it.
    ///
    /// An id or payload reference that matches nothing yields `Ok(None)` — a
    /// miss is not an error. A `Handle` reference that is not (or is no
    /// longer) the registry's canonical handle for its payload is stale and
    /// yields `Err(StaleHandle)`.
    pub fn resolve_handle(&self, reference: &Ref<Id, T>) -> Result<Option<Handle<Id, T>>> {
        match reference {
            Ref::Id(id) => Ok(self
                .by_id
                .get(id)
                .and_then(|serial| self.by_serial.get(serial))
                .cloned()),
            Ref::Payload(payload) => Ok(self
                .by_payload
                .get(&payload_key(payload))
                .and_then(|serial| self.by_serial.get(serial))
                .cloned()),
            Ref::Handle(handle) => match self.by_serial.get(&handle.serial()) {
                Some(canonical) if canonical == handle => Ok(Some(handle.clone())),
                _ => Err(Error::StaleHandle),
            },
        }
    }

    /// `resolve_handle` without ever raising `StaleHandle` — a stale or
    /// absent reference is simply "not present".
    pub fn has(&self, reference: &Ref<Id, T>) -> bool {
        matches!(self.resolve_handle(reference), Ok(Some(_)))
    }

    pub fn unregister(&mut self, serial: u64) {
        if let Some(handle) = self.by_serial.remove(&serial) {
            if let Some(id) = handle.id() {
                self.by_id.remove(id);
            }
            self.by_payload.remove(&payload_key(handle.payload_arc()));
            trace!(serial, "unregistered");
        }
    }

    pub fn clear(&mut self) {
        self.by_serial.clear();
        self.by_id.clear();
        self.by_payload.clear();
    }

    pub fn size(&self) -> usize {
        self.by_serial.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Handle<Id, T>, &T)> {
        self.by_serial.values().map(|h| (h, h.payload()))
    }
}
