//! Canonical two-pass pairing heap with intrusive child/sibling/prev
//! pointers, backed by a single arena (`Vec<Option<Node>>`) instead of raw
//! pointers: arena indices play the role the source's node pointers played,
//! `None` plays the role of a null pointer, and there is no aliasing to
//! reason about.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::handle::{Handle, Ref};
use crate::queue::{Polled, Priority, PriorityChange, PriorityQueue};
use crate::registry::Registry;

type NodeId = usize;
type Comparator = Arc<dyn Fn(Priority, Priority) -> Ordering + Send + Sync>;

struct Node<Id, T> {
    priority: Priority,
    handle: Handle<Id, T>,
    child: Option<NodeId>,
    sibling: Option<NodeId>,
    prev: Option<NodeId>,
}

/// A mergeable min-heap addressable by [`Handle`], registry-coherent by
/// construction: a node exists in the heap iff its payload has a handle in
/// the underlying [`Registry`].
pub struct PairingHeap<Id, T> {
    nodes: Vec<Option<Node<Id, T>>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    registry: Registry<Id, T>,
    by_serial: HashMap<u64, NodeId>,
    compare: Comparator,
}

impl<Id, T> Default for PairingHeap<Id, T>
where
    Id: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Id, T> PairingHeap<Id, T>
where
    Id: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_comparator(Arc::new(|a: Priority, b: Priority| a.cmp(&b)))
    }

    /// Builds a heap ordered by a caller-supplied total preorder instead of
    /// numeric `<`. `compare(a, b)` follows [`Ordering`] conventions.
    pub fn with_comparator(
        compare: impl Fn(Priority, Priority) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            registry: Registry::new(),
            by_serial: HashMap::new(),
            compare: Arc::new(compare),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Handle<Id, T>, &T)> {
        self.registry.iter()
    }

    fn alloc(&mut self, node: Node<Id, T>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn dealloc(&mut self, id: NodeId) {
        self.nodes[id] = None;
        self.free.push(id);
    }

    fn node(&self, id: NodeId) -> &Node<Id, T> {
        self.nodes[id].as_ref().expect("dangling node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<Id, T> {
        self.nodes[id].as_mut().expect("dangling node id")
    }

    /// Makes the lower-priority (or, on a tie, the first-argument) node the
    /// parent and the other its new first child. Returns the parent.
    fn link(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let pa = self.node(a).priority;
        let pb = self.node(b).priority;
        let (parent, child) = if (self.compare)(pa, pb) != Ordering::Greater {
            (a, b)
        } else {
            (b, a)
        };
        let old_first_child = self.node(parent).child;
        {
            let child_node = self.node_mut(child);
            child_node.prev = Some(parent);
            child_node.sibling = old_first_child;
        }
        if let Some(old_first) = old_first_child {
            self.node_mut(old_first).prev = Some(child);
        }
        self.node_mut(parent).child = Some(child);
        parent
    }

    fn link_opt(&mut self, a: Option<NodeId>, b: Option<NodeId>) -> Option<NodeId> {
        match (a, b) {
            (None, None) => None,
            (Some(x), None) => Some(x),
            (None, Some(y)) => Some(y),
            (Some(x), Some(y)) => Some(self.link(x, y)),
        }
    }

    /// Detaches a non-root node from its parent/sibling list.
    fn cut(&mut self, n: NodeId) -> Result<()> {
        let prev = self
            .node(n)
            .prev
            .ok_or(Error::InvariantViolation("cut called on a root node"))?;
        let sibling = self.node(n).sibling;
        let is_first_child = self.node(prev).child == Some(n);
        if is_first_child {
            self.node_mut(prev).child = sibling;
        } else {
            self.node_mut(prev).sibling = sibling;
        }
        if let Some(sib) = sibling {
            self.node_mut(sib).prev = Some(prev);
        }
        let node = self.node_mut(n);
        node.prev = None;
        node.sibling = None;
        Ok(())
    }

    fn clear_links(&mut self, n: NodeId) {
        let node = self.node_mut(n);
        node.prev = None;
        node.sibling = None;
    }

    /// Two-pass fold of a child list back into a single tree after its
    /// parent is removed. Pass one links consecutive pairs left to right;
    /// pass two folds the resulting list right to left.
    fn combine_siblings(&mut self, first: Option<NodeId>) -> Option<NodeId> {
        let first = first?;
        let mut children = Vec::new();
        let mut cur = Some(first);
        while let Some(n) = cur {
            cur = self.node(n).sibling;
            children.push(n);
        }
        let mut pairs = Vec::new();
        let mut it = children.into_iter();
        loop {
            match (it.next(), it.next()) {
                (Some(a), Some(b)) => {
                    self.clear_links(a);
                    self.clear_links(b);
                    pairs.push(self.link(a, b));
                }
                (Some(a), None) => {
                    self.clear_links(a);
                    pairs.push(a);
                    break;
                }
                (None, _) => break,
            }
        }
        match pairs.len() {
            0 => None,
            1 => Some(pairs[0]),
            len => {
                let mut r = self.link(pairs[len - 2], pairs[len - 1]);
                for &p in pairs[..len - 2].iter().rev() {
                    r = self.link(p, r);
                }
                Some(r)
            }
        }
    }

    /// Removes a node (root or not) from the tree and the registry,
    /// returning its freed contents. The caller is responsible for anything
    /// that should happen to the returned payload.
    fn detach_node(&mut self, node_id: NodeId) -> Result<Node<Id, T>> {
        if Some(node_id) == self.root {
            let node = self.nodes[node_id].take().expect("dangling root id");
            self.dealloc(node_id);
            self.root = self.combine_siblings(node.child);
            self.by_serial.remove(&node.handle.serial());
            self.registry.unregister(node.handle.serial());
            Ok(node)
        } else {
            self.cut(node_id)?;
            let node = self.nodes[node_id].take().expect("dangling node id");
            self.dealloc(node_id);
            self.by_serial.remove(&node.handle.serial());
            self.registry.unregister(node.handle.serial());
            let rebuilt = self.combine_siblings(node.child);
            self.root = self.link_opt(self.root, rebuilt);
            Ok(node)
        }
    }

    fn insert_arc(&mut self, priority: Priority, payload: Arc<T>, id: Option<Id>) -> Result<Handle<Id, T>> {
        let handle = self.registry.register(payload, id)?;
        let node_id = self.alloc(Node {
            priority,
            handle: handle.clone(),
            child: None,
            sibling: None,
            prev: None,
        });
        self.by_serial.insert(handle.serial(), node_id);
        self.root = match self.root {
            None => Some(node_id),
            Some(root) => Some(self.link(root, node_id)),
        };
        debug!(serial = handle.serial(), priority, "heap insert");
        Ok(handle)
    }

    fn node_id_for(&self, handle: &Handle<Id, T>) -> NodeId {
        *self
            .by_serial
            .get(&handle.serial())
            .expect("registry/heap coherence: resolved handle has no node")
    }
}

impl<Id, T> PriorityQueue<Id, T> for PairingHeap<Id, T>
where
    Id: Eq + Hash + Clone,
{
    fn insert(&mut self, priority: Priority, payload: T, id: Option<Id>) -> Result<Handle<Id, T>> {
        self.insert_arc(priority, Arc::new(payload), id)
    }

    fn peek(&self) -> Option<Handle<Id, T>> {
        self.root.map(|r| self.node(r).handle.clone())
    }

    fn peek_priority(&self) -> Option<Priority> {
        self.root.map(|r| self.node(r).priority)
    }

    fn poll(&mut self) -> Option<Polled<Id, T>> {
        let root = self.root?;
        let node = self
            .detach_node(root)
            .expect("detaching the root never cuts a non-root node");
        debug!(
            serial = node.handle.serial(),
            priority = node.priority,
            "heap poll"
        );
        let payload = node.handle.payload_arc().clone();
        Some(Polled {
            handle: node.handle,
            priority: node.priority,
            payload,
        })
    }

    fn remove(&mut self, reference: Ref<Id, T>) -> Result<Option<Polled<Id, T>>> {
        let Some(handle) = self.registry.resolve_handle(&reference)? else {
            return Ok(None);
        };
        let node_id = self.node_id_for(&handle);
        let node = self.detach_node(node_id)?;
        debug!(serial = handle.serial(), "heap remove");
        let payload = node.handle.payload_arc().clone();
        Ok(Some(Polled {
            handle: node.handle,
            priority: node.priority,
            payload,
        }))
    }

    fn set_priority(
        &mut self,
        reference: Ref<Id, T>,
        new_priority: Priority,
    ) -> Result<PriorityChange<Id, T>> {
        let Some(handle) = self.registry.resolve_handle(&reference)? else {
            return Err(Error::NotFound);
        };
        let node_id = self.node_id_for(&handle);
        let before = self.node(node_id).priority;
        match (self.compare)(new_priority, before) {
            Ordering::Equal => Ok(PriorityChange::Unchanged),
            Ordering::Less => {
                self.node_mut(node_id).priority = new_priority;
                if Some(node_id) != self.root {
                    self.cut(node_id)?;
                    let root = self.root.expect("non-root node implies non-empty heap");
                    self.root = Some(self.link(root, node_id));
                }
                debug!(serial = handle.serial(), before, after = new_priority, "heap decrease");
                Ok(PriorityChange::Changed {
                    handle,
                    before,
                    after: new_priority,
                })
            }
            Ordering::Greater => {
                let id = handle.id().cloned();
                let payload = handle.payload_arc().clone();
                self.detach_node(node_id)?;
                let new_handle = self
                    .insert_arc(new_priority, payload, id)
                    .expect("reinsert of a just-detached payload cannot conflict");
                debug!(
                    old_serial = handle.serial(),
                    new_serial = new_handle.serial(),
                    before,
                    after = new_priority,
                    "heap increase (reissued handle)"
                );
                Ok(PriorityChange::Changed {
                    handle: new_handle,
                    before,
                    after: new_priority,
                })
            }
        }
    }

    fn get(&self, reference: Ref<Id, T>) -> Result<Option<Handle<Id, T>>> {
        self.registry.resolve_handle(&reference)
    }

    fn has(&self, reference: Ref<Id, T>) -> bool {
        self.registry.has(&reference)
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.by_serial.clear();
        self.root = None;
        self.registry.clear();
    }

    fn size(&self) -> usize {
        self.registry.size()
    }
}

impl<Id, T> fmt::Debug for PairingHeap<Id, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingHeap")
            .field("size", &self.by_serial.len())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn new_heap() -> PairingHeap<String, &'static str> {
        PairingHeap::new()
    }

    // S1 — ordering
    #[test]
    fn polls_in_ascending_priority_order() {
        let mut heap = new_heap();
        heap.insert(3, "c", None).unwrap();
        heap.insert(1, "a", None).unwrap();
        heap.insert(2, "b", None).unwrap();
        let polled: Vec<_> = std::iter::from_fn(|| heap.poll()).collect();
        let payloads: Vec<_> = polled.iter().map(|p| *p.payload).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }

    // S2 — update causes re-order
    #[test]
    fn increasing_priority_reorders_and_reissues_handle() {
        let mut heap = new_heap();
        let x = heap.insert(10, "X", Some("x".to_string())).unwrap();
        heap.insert(20, "Y", Some("y".to_string())).unwrap();
        let change = heap.set_priority(Ref::Handle(x.clone()), 30).unwrap();
        let PriorityChange::Changed { handle: new_x, .. } = change else {
            panic!("expected a change")
        };
        assert_ne!(new_x, x);
        assert!(!heap.has(Ref::Handle(x)));

        let first = heap.poll().unwrap();
        assert_eq!(first.payload.as_ref(), &"Y");
        assert_eq!(first.priority, 20);
        let second = heap.poll().unwrap();
        assert_eq!(second.payload.as_ref(), &"X");
        assert_eq!(second.priority, 30);
    }

    #[test]
    fn decreasing_priority_moves_item_earlier() {
        let mut heap = new_heap();
        heap.insert(10, "a", None).unwrap();
        let b = heap.insert(20, "b", None).unwrap();
        heap.set_priority(Ref::Handle(b), 5).unwrap();
        let first = heap.poll().unwrap();
        assert_eq!(first.payload.as_ref(), &"b");
    }

    #[test]
    fn equal_priority_is_a_no_op() {
        let mut heap = new_heap();
        let a = heap.insert(10, "a", None).unwrap();
        let change = heap.set_priority(Ref::Handle(a.clone()), 10).unwrap();
        assert!(matches!(change, PriorityChange::Unchanged));
        assert!(heap.has(Ref::Handle(a)));
    }

    #[test]
    fn set_priority_on_unknown_ref_is_not_found() {
        let mut heap: PairingHeap<String, &str> = new_heap();
        let err = heap
            .set_priority(Ref::Id("missing".to_string()), 1)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    // S5 — duplicate id
    #[test]
    fn duplicate_id_does_not_affect_prior_entry() {
        let mut heap = new_heap();
        heap.insert(1, "x", Some("k".to_string())).unwrap();
        let err = heap.insert(2, "y", Some("k".to_string())).unwrap_err();
        assert!(matches!(err, Error::DuplicateId));
        assert_eq!(heap.poll().unwrap().payload.as_ref(), &"x");
    }

    // S6 — remove then re-insert
    #[test]
    fn remove_then_reinsert_same_id() {
        let mut heap = new_heap();
        heap.insert(1, "x", Some("k".to_string())).unwrap();
        let removed = heap
            .remove(Ref::Id("k".to_string()))
            .unwrap()
            .expect("present");
        assert_eq!(removed.payload.as_ref(), &"x");
        assert!(!heap.has(Ref::Id("k".to_string())));
        heap.insert(5, "z", Some("k".to_string())).unwrap();
        assert!(heap.has(Ref::Id("k".to_string())));
    }

    #[test]
    fn remove_on_miss_returns_none() {
        let mut heap: PairingHeap<String, &str> = new_heap();
        assert!(heap.remove(Ref::Id("nope".to_string())).unwrap().is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let mut heap = new_heap();
        heap.insert(1, "a", None).unwrap();
        heap.insert(2, "b", None).unwrap();
        heap.clear();
        assert_eq!(heap.size(), 0);
        assert!(heap.is_empty());
        assert!(heap.peek().is_none());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(i64),
        Poll,
        RemoveLast,
        Increase(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-1000i64..1000).prop_map(Op::Insert),
            Just(Op::Poll),
            Just(Op::RemoveLast),
            (-1000i64..1000).prop_map(Op::Increase),
        ]
    }

    proptest! {
        // Invariant 2/3: heap order and peek-is-minimum hold after any legal sequence.
        #[test]
        fn heap_order_and_min_peek_hold(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut heap: PairingHeap<u64, i64> = PairingHeap::new();
            let mut live: Vec<Handle<u64, i64>> = Vec::new();
            let mut model: std::collections::BTreeSet<(i64, u64)> = Default::default();

            for op in ops {
                match op {
                    Op::Insert(p) => {
                        let handle = heap.insert(p, p, None).unwrap();
                        model.insert((p, handle.serial()));
                        live.push(handle);
                    }
                    Op::Poll => {
                        let expected_min = model.iter().next().copied();
                        let polled = heap.poll();
                        match (polled, expected_min) {
                            (Some(p), Some((min_p, _))) => {
                                prop_assert_eq!(p.priority, min_p);
                                model.remove(&(p.priority, p.handle.serial()));
                                live.retain(|h| *h != p.handle);
                            }
                            (None, None) => {}
                            other => prop_assert!(false, "poll/model mismatch: {:?}", other),
                        }
                    }
                    Op::RemoveLast => {
                        if let Some(handle) = live.pop() {
                            if let Some(polled) = heap.remove(Ref::Handle(handle.clone())).unwrap() {
                                model.remove(&(polled.priority, polled.handle.serial()));
                            }
                        }
                    }
                    Op::Increase(delta) => {
                        if let Some(handle) = live.last().cloned() {
                            if heap.has(Ref::Handle(handle.clone())) {
                                let before = *heap.get(Ref::Handle(handle.clone())).unwrap().unwrap().payload();
                                let after = before + delta.unsigned_abs() as i64 + 1;
                                let change = heap.set_priority(Ref::Handle(handle.clone()), after).unwrap();
                                if let PriorityChange::Changed { handle: new_handle, before, after } = change {
                                    model.remove(&(before, handle.serial()));
                                    model.insert((after, new_handle.serial()));
                                    live.pop();
                                    live.push(new_handle);
                                }
                            }
                        }
                    }
                }
                prop_assert_eq!(heap.size(), model.len());
                if let Some(p) = heap.peek_priority() {
                    let min_p = model.iter().next().unwrap().0;
                    prop_assert_eq!(p, min_p);
                }
            }
        }

        // Round-trip: any permutation of distinct priorities polls out sorted.
        #[test]
        fn sorted_poll_for_any_permutation(mut priorities in prop::collection::hash_set(-500i64..500, 0..50)) {
            let mut values: Vec<i64> = priorities.drain().collect();
            let mut heap: PairingHeap<u64, i64> = PairingHeap::new();
            for &p in &values {
                heap.insert(p, p, None).unwrap();
            }
            values.sort();
            let polled: Vec<i64> = std::iter::from_fn(|| heap.poll()).map(|p| p.priority).collect();
            prop_assert_eq!(polled, values);
        }
    }
}
