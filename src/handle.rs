use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An immutable, registry-scoped reference to a stored payload.
///
/// Cloning a `Handle` is cheap (it is a reference-counted pointer to the
/// registry entry); all clones compare equal to each other and to the
/// canonical handle the registry handed out for the same payload. Once a
/// handle's underlying entry is removed from the registry, the handle itself
/// does not change, but the registry stops recognizing it as canonical (it
/// becomes *stale* — see [`crate::error::Error::StaleHandle`]).
pub struct Handle<Id, T>(Arc<Inner<Id, T>>);

struct Inner<Id, T> {
    serial: u64,
    id: Option<Id>,
    payload: Arc<T>,
}

impl<Id, T> Handle<Id, T> {
    pub(crate) fn new(serial: u64, id: Option<Id>, payload: Arc<T>) -> Self {
        Self(Arc::new(Inner { serial, id, payload }))
    }

    /// The monotonic serial this handle was issued with. Unique for the
    /// lifetime of the registry that issued it.
    pub(crate) fn serial(&self) -> u64 {
        self.0.serial
    }

    /// The user-supplied id this handle was registered under, if any.
    pub fn id(&self) -> Option<&Id> {
        self.0.id.as_ref()
    }

    /// A shared reference to the stored payload.
    pub fn payload(&self) -> &T {
        &self.0.payload
    }

    pub(crate) fn payload_arc(&self) -> &Arc<T> {
        &self.0.payload
    }
}

impl<Id, T> Clone for Handle<Id, T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<Id, T> PartialEq for Handle<Id, T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.serial == other.0.serial
    }
}

impl<Id, T> Eq for Handle<Id, T> {}

impl<Id, T> Hash for Handle<Id, T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.serial.hash(state)
    }
}

impl<Id: std::fmt::Debug, T> std::fmt::Debug for Handle<Id, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("serial", &self.0.serial)
            .field("id", &self.0.id)
            .finish_non_exhaustive()
    }
}

/// A reference to a registered payload, by any of the three ways a caller
/// might be holding onto one.
pub enum Ref<Id, T> {
    Id(Id),
    Handle(Handle<Id, T>),
    Payload(Arc<T>),
}

impl<Id, T> From<Handle<Id, T>> for Ref<Id, T> {
    fn from(handle: Handle<Id, T>) -> Self {
        Ref::Handle(handle)
    }
}

impl<Id, T> From<Arc<T>> for Ref<Id, T> {
    fn from(payload: Arc<T>) -> Self {
        Ref::Payload(payload)
    }
}

// `Ref::Id` cannot get a blanket `From<Id>` impl without conflicting with the
// two impls above once `Id` is allowed to unify with `Handle`/`Arc<T>`, so
// callers construct it directly: `Ref::Id(my_id)`.
