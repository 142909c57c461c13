//! Container: one tree, one allocator, one root
//!
//! A `Container` owns the slab, the root handle, the two container-wide
//! version counters and the bookkeeping the replication path needs (the
//! receiver's child->parent map and the per-frame bubble dedup set). It is
//! deliberately single-threaded: the host component owns it on one thread
//! and every operation completes synchronously.
//!
//! `Tree` is the public face: an `Rc<RefCell<Container>>` whose strong
//! count doubles as the liveness token. Accessors hold only a `Weak`, so
//! an accessor that outlives its tree refuses every operation instead of
//! touching freed state.
//!
//! Version discipline, in one place:
//! - any data change bumps `data_version`
//! - create/destroy/re-parent/re-kind additionally bumps `struct_version`
//! - both bumps are gated by `writes_bump_versions`, which the delta-apply
//!   path turns off so replicated writes do not re-dirty the receiver

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use tagtree_core::{NodeId, NodeValue};

use crate::accessor::{Accessor, PathSeg};
use crate::slab::SlabAllocator;

/// The one-method contract the host component implements: schedule one
/// delivery of the accumulated delta. Idempotent per frame.
pub trait TickHost {
    fn request_tick_next_frame(&self);
}

pub(crate) struct Container {
    pub(crate) replicated: bool,
    pub(crate) allocator: SlabAllocator,
    pub(crate) root_id: NodeId,
    pub(crate) data_version: i32,
    pub(crate) struct_version: i32,
    /// Gate for all version bumps; false while applying a received delta.
    pub(crate) writes_bump_versions: bool,
    pub(crate) host: Option<Weak<dyn TickHost>>,
    /// child -> parent, receiver side only; rebuilt per struct epoch.
    pub(crate) parent_of: HashMap<NodeId, NodeId>,
    /// Nodes whose subtree version was already bumped this apply frame.
    pub(crate) frame_bubbled: HashSet<NodeId>,
    pub(crate) dirty_this_frame: bool,
}

impl Container {
    pub(crate) fn new() -> Self {
        let mut container = Container {
            replicated: false,
            allocator: SlabAllocator::new(),
            root_id: NodeId::INVALID,
            data_version: 0,
            struct_version: 0,
            writes_bump_versions: true,
            host: None,
            parent_of: HashMap::new(),
            frame_bubbled: HashSet::new(),
            dirty_this_frame: false,
        };
        container.install_root();
        container
    }

    fn install_root(&mut self) {
        self.root_id = self.allocator.allocate();
        if let Some(root) = self.allocator.get_mut(self.root_id) {
            root.override_to_empty_map();
        }
    }

    /// Drop everything including the root; only the serialization load
    /// path runs against this state.
    pub(crate) fn clear(&mut self) {
        self.allocator.reset();
        self.root_id = NodeId::INVALID;
    }

    pub(crate) fn reset(&mut self) {
        self.allocator.reset();
        self.install_root();
        self.data_version += 1;
        self.struct_version += 1;
    }

    pub(crate) fn copy_from(&mut self, other: &Container) {
        self.writes_bump_versions = other.writes_bump_versions;
        self.allocator.reset();
        self.root_id = self.deep_copy_from(other, other.root_id);
        self.data_version += 1;
        self.struct_version += 1;
    }

    pub(crate) fn node_count(&self) -> u32 {
        self.allocator.current_active()
    }

    pub(crate) fn mark_dirty_this_frame(&mut self) {
        if !self.dirty_this_frame {
            self.dirty_this_frame = true;
            if let Some(host) = self.host.as_ref().and_then(|w| w.upgrade()) {
                host.request_tick_next_frame();
            }
        }
    }

    pub(crate) fn update_data_version(&mut self) {
        if !self.writes_bump_versions {
            return;
        }
        self.data_version += 1;
        self.mark_dirty_this_frame();
    }

    pub(crate) fn update_data_and_struct_version(&mut self) {
        if !self.writes_bump_versions {
            return;
        }
        self.data_version += 1;
        self.struct_version += 1;
        self.mark_dirty_this_frame();
    }

    /// Bump a slot's data version and the container counter together.
    pub(crate) fn bump_node_data_version(&mut self, id: NodeId) {
        if self.allocator.bump_data_version(id) {
            self.update_data_version();
        }
    }

    // ----- release family ------------------------------------------------

    /// Free a single node. Returns the number of slots freed (0 or 1).
    pub(crate) fn release_node(&mut self, id: NodeId) -> i32 {
        if !id.is_valid() {
            return 0;
        }
        if self.allocator.deallocate(id) { 1 } else { 0 }
    }

    /// Free the node and everything reachable below it.
    pub(crate) fn release_recursive(&mut self, id: NodeId) -> i32 {
        let mut freed = 0;
        self.release_subtree_impl(id, &mut freed);
        freed
    }

    fn release_subtree_impl(&mut self, id: NodeId, freed: &mut i32) {
        if !id.is_valid() {
            return;
        }
        let children = match self.allocator.get(id) {
            Some(cell) => collect_children(cell),
            None => return,
        };
        if let Some(children) = children {
            for child in children {
                self.release_subtree_impl(child, freed);
            }
        }
        *freed += self.release_node(id);
    }

    /// Free a compound's children recursively and empty the compound
    /// itself. Leaves non-compounds untouched.
    pub(crate) fn release_children(&mut self, id: NodeId) -> i32 {
        if !id.is_valid() {
            return 0;
        }
        let children = match self.allocator.get(id) {
            Some(cell) => collect_children(cell),
            None => return 0,
        };
        let Some(children) = children else {
            return 0;
        };
        let mut freed = 0;
        for child in children {
            self.release_subtree_impl(child, &mut freed);
        }
        if let Some(cell) = self.allocator.get_mut(id) {
            match cell {
                NodeValue::Map(map) => map.clear(),
                NodeValue::List(list) => list.children.clear(),
                _ => {}
            }
        }
        freed
    }

    /// Nodes in the subtree rooted at `id`, the node itself included.
    pub(crate) fn subtree_node_count(&self, id: NodeId) -> i32 {
        if !id.is_valid() {
            return 0;
        }
        let Some(cell) = self.allocator.get(id) else {
            return 0;
        };
        let mut count = 1;
        if let Some(children) = collect_children(cell) {
            for child in children {
                count += self.subtree_node_count(child);
            }
        }
        count
    }

    // ----- copy feasibility and deep copy --------------------------------

    pub(crate) fn supports_copy_from(&self, source: &Container, source_id: NodeId) -> bool {
        let nodes = source.subtree_node_count(source_id);
        nodes != 0 && self.allocator.free_remaining() >= nodes as u32
    }

    /// Swap needs both subtrees to fit at once; checked up front so a
    /// failed swap mutates neither side.
    pub(crate) fn supports_double_copy(&self, a: NodeId, b: NodeId) -> bool {
        let nodes_a = self.subtree_node_count(a);
        let nodes_b = self.subtree_node_count(b);
        nodes_a != 0 && nodes_b != 0 && self.allocator.free_remaining() >= (nodes_a + nodes_b) as u32
    }

    /// Deep copy out of another container; feasibility-checked.
    pub(crate) fn deep_copy_from(&mut self, source: &Container, source_id: NodeId) -> NodeId {
        if !self.supports_copy_from(source, source_id) {
            return NodeId::INVALID;
        }
        self.deep_copy_from_impl(source, source_id)
    }

    fn deep_copy_from_impl(&mut self, source: &Container, source_id: NodeId) -> NodeId {
        let snapshot = match source.allocator.get(source_id) {
            Some(cell) => cell.clone(),
            None => return NodeId::INVALID,
        };
        // Post-feasibility-check allocation cannot fail.
        let new_id = self.allocator.allocate();
        if !new_id.is_valid() {
            return NodeId::INVALID;
        }
        match snapshot {
            NodeValue::Map(source_map) => {
                if let Some(cell) = self.allocator.get_mut(new_id) {
                    cell.override_to_empty_map();
                }
                for (key, child) in source_map.iter() {
                    let new_child = self.deep_copy_from_impl(source, *child);
                    if new_child.is_valid() {
                        if let Some(map) = self.allocator.get_mut(new_id).and_then(|c| c.map_data_mut()) {
                            map.insert(key.clone(), new_child);
                        }
                    }
                }
            }
            NodeValue::List(source_list) => {
                if let Some(cell) = self.allocator.get_mut(new_id) {
                    cell.override_to_empty_list();
                }
                for child in &source_list.children {
                    let new_child = self.deep_copy_from_impl(source, *child);
                    if new_child.is_valid() {
                        if let Some(list) = self.allocator.get_mut(new_id).and_then(|c| c.list_data_mut()) {
                            list.children.push(new_child);
                        }
                    }
                }
            }
            leaf => {
                if let Some(cell) = self.allocator.get_mut(new_id) {
                    cell.override_from_if_not_compound(&leaf);
                }
            }
        }
        new_id
    }

    /// Deep copy within this container (swap / same-tree copy path);
    /// feasibility-checked.
    pub(crate) fn deep_copy_local(&mut self, source_id: NodeId) -> NodeId {
        let nodes = self.subtree_node_count(source_id);
        if nodes == 0 || self.allocator.free_remaining() < nodes as u32 {
            return NodeId::INVALID;
        }
        self.deep_copy_local_impl(source_id)
    }

    fn deep_copy_local_impl(&mut self, source_id: NodeId) -> NodeId {
        let snapshot = match self.allocator.get(source_id) {
            Some(cell) => cell.clone(),
            None => return NodeId::INVALID,
        };
        let new_id = self.allocator.allocate();
        if !new_id.is_valid() {
            return NodeId::INVALID;
        }
        match snapshot {
            NodeValue::Map(source_map) => {
                if let Some(cell) = self.allocator.get_mut(new_id) {
                    cell.override_to_empty_map();
                }
                for (key, child) in source_map.iter() {
                    let new_child = self.deep_copy_local_impl(*child);
                    if new_child.is_valid() {
                        if let Some(map) = self.allocator.get_mut(new_id).and_then(|c| c.map_data_mut()) {
                            map.insert(key.clone(), new_child);
                        }
                    }
                }
            }
            NodeValue::List(source_list) => {
                if let Some(cell) = self.allocator.get_mut(new_id) {
                    cell.override_to_empty_list();
                }
                for child in &source_list.children {
                    let new_child = self.deep_copy_local_impl(*child);
                    if new_child.is_valid() {
                        if let Some(list) = self.allocator.get_mut(new_id).and_then(|c| c.list_data_mut()) {
                            list.children.push(new_child);
                        }
                    }
                }
            }
            leaf => {
                if let Some(cell) = self.allocator.get_mut(new_id) {
                    cell.override_from_if_not_compound(&leaf);
                }
            }
        }
        new_id
    }

    // ----- receiver-side parent map and bubbling --------------------------

    pub(crate) fn rebuild_all_parents(&mut self) {
        self.parent_of.clear();
        self.rebuild_parents_for_node(self.root_id);
    }

    fn rebuild_parents_for_node(&mut self, parent_id: NodeId) {
        if !parent_id.is_valid() {
            return;
        }
        let children = match self.allocator.get(parent_id) {
            Some(cell) => collect_children(cell),
            None => return,
        };
        if let Some(children) = children {
            for child in children {
                self.parent_of.insert(child, parent_id);
                self.rebuild_parents_for_node(child);
            }
        }
    }

    /// Bump subtree versions from `leaf_id` up to the root using the
    /// parent map, at most once per node per apply frame.
    pub(crate) fn bubble_subtree_version_for_id(&mut self, leaf_id: NodeId) {
        if self.frame_bubbled.insert(leaf_id) {
            self.allocator.inc_subtree_version(leaf_id);
        }
        let mut current = leaf_id;
        while let Some(parent) = self.parent_of.get(&current).copied() {
            if self.frame_bubbled.insert(parent) {
                self.allocator.inc_subtree_version(parent);
            }
            current = parent;
        }
        let root = self.root_id;
        if self.frame_bubbled.insert(root) {
            self.allocator.inc_subtree_version(root);
        }
    }

    /// Writer-side bubble: re-walk the accessor's path from the root,
    /// bumping the subtree version of the root and every node visited.
    pub(crate) fn bubble_along_path(&mut self, path: &[PathSeg]) {
        let mut current = self.root_id;
        if !current.is_valid() {
            return;
        }
        self.allocator.inc_subtree_version(current);
        for segment in path {
            let next = match self.allocator.get(current) {
                Some(cell) => match segment {
                    PathSeg::Key(key) => cell.map_data().and_then(|m| m.get(key)),
                    PathSeg::Index(index) => cell.list_data().and_then(|l| l.get(*index)),
                },
                None => None,
            };
            match next {
                Some(id) => {
                    self.allocator.inc_subtree_version(id);
                    current = id;
                }
                None => break,
            }
        }
    }
}

/// Children of a compound cell, or `None` for a leaf.
pub(crate) fn collect_children(cell: &NodeValue) -> Option<Vec<NodeId>> {
    match cell {
        NodeValue::Map(map) => Some(map.iter().map(|(_, id)| *id).collect()),
        NodeValue::List(list) => Some(list.children.clone()),
        _ => None,
    }
}

/// A replicated attribute tree. Owns its container; handing out accessors
/// never extends the container's lifetime.
pub struct Tree {
    inner: Rc<RefCell<Container>>,
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            inner: Rc::new(RefCell::new(Container::new())),
        }
    }

    pub(crate) fn inner(&self) -> &Rc<RefCell<Container>> {
        &self.inner
    }

    /// Root accessor with a primed resolve cache.
    pub fn accessor(&self) -> Accessor {
        let container = self.inner.borrow();
        Accessor::root(Rc::downgrade(&self.inner), container.root_id, container.struct_version)
    }

    /// Drop all nodes and start over with an empty root map. Bumps both
    /// counters so stale accessors re-resolve.
    pub fn reset(&self) {
        self.inner.borrow_mut().reset();
    }

    /// Replace contents with a deep copy of `other`. Copying between two
    /// freshly-constructed empty trees is a no-op so default construction
    /// and replication plumbing do not burn version numbers.
    pub fn copy_from(&self, other: &Tree) {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let mut dst = self.inner.borrow_mut();
        let src = other.inner.borrow();
        let both_pristine = dst.data_version == 0
            && dst.struct_version == 0
            && src.data_version == 0
            && src.struct_version == 0
            && dst.node_count() == 1
            && src.node_count() == 1;
        if both_pristine {
            return;
        }
        dst.copy_from(&src);
    }

    pub fn node_count(&self) -> u32 {
        self.inner.borrow().node_count()
    }

    pub fn data_version(&self) -> i32 {
        self.inner.borrow().data_version
    }

    pub fn struct_version(&self) -> i32 {
        self.inner.borrow().struct_version
    }

    pub fn is_replicated(&self) -> bool {
        self.inner.borrow().replicated
    }

    /// Wire up the host that schedules replication ticks.
    pub fn set_host(&self, host: Weak<dyn TickHost>) {
        self.inner.borrow_mut().host = Some(host);
    }

    pub fn is_dirty_this_frame(&self) -> bool {
        self.inner.borrow().dirty_this_frame
    }

    /// The host calls this after emitting a delta.
    pub fn clear_dirty_this_frame(&self) {
        self.inner.borrow_mut().dirty_this_frame = false;
    }
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn fresh_tree_invariants() {
        let tree = Tree::new();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.data_version(), 0);
        assert_eq!(tree.struct_version(), 0);
        let container = tree.inner().borrow();
        let root = container.allocator.get(container.root_id).unwrap();
        assert!(root.map_data().is_some(), "root is an empty map");
        assert!(root.map_data().unwrap().is_empty());
    }

    #[test]
    fn reset_bumps_both_counters() {
        let tree = Tree::new();
        tree.reset();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.data_version(), 1);
        assert_eq!(tree.struct_version(), 1);
    }

    #[test]
    fn copy_between_pristine_trees_is_noop() {
        let a = Tree::new();
        let b = Tree::new();
        a.copy_from(&b);
        assert_eq!(a.data_version(), 0);
        assert_eq!(a.struct_version(), 0);
        assert_eq!(a.node_count(), 1);
    }

    struct CountingHost {
        ticks: Cell<u32>,
    }

    impl TickHost for CountingHost {
        fn request_tick_next_frame(&self) {
            self.ticks.set(self.ticks.get() + 1);
        }
    }

    #[test]
    fn dirtying_requests_one_tick_per_frame() {
        let tree = Tree::new();
        let host = Rc::new(CountingHost { ticks: Cell::new(0) });
        let host_dyn: Rc<dyn TickHost> = host.clone();
        tree.set_host(Rc::downgrade(&host_dyn));

        {
            let mut container = tree.inner().borrow_mut();
            container.update_data_version();
            container.update_data_version();
            container.update_data_version();
        }
        assert_eq!(host.ticks.get(), 1, "dirty flag coalesces tick requests");
        assert!(tree.is_dirty_this_frame());

        tree.clear_dirty_this_frame();
        tree.inner().borrow_mut().update_data_version();
        assert_eq!(host.ticks.get(), 2);
    }

    #[test]
    fn release_recursive_counts_all_nodes() {
        let tree = Tree::new();
        let mut container = tree.inner().borrow_mut();

        // Hand-build root -> {a: {b: leaf}} plus a sibling leaf.
        let a = container.allocator.allocate();
        let b = container.allocator.allocate();
        let leaf = container.allocator.allocate();
        let sibling = container.allocator.allocate();
        container.allocator.get_mut(a).unwrap().override_to_empty_map();
        container.allocator.get_mut(b).unwrap().override_to_empty_map();
        container.allocator.get_mut(leaf).unwrap().override_to(1i32);
        container.allocator.get_mut(sibling).unwrap().override_to(2i32);
        let root = container.root_id;
        container
            .allocator
            .get_mut(root)
            .unwrap()
            .map_data_mut()
            .unwrap()
            .insert(tagtree_core::Name::new("a"), a);
        container
            .allocator
            .get_mut(a)
            .unwrap()
            .map_data_mut()
            .unwrap()
            .insert(tagtree_core::Name::new("b"), b);
        container
            .allocator
            .get_mut(b)
            .unwrap()
            .map_data_mut()
            .unwrap()
            .insert(tagtree_core::Name::new("leaf"), leaf);
        container
            .allocator
            .get_mut(root)
            .unwrap()
            .map_data_mut()
            .unwrap()
            .insert(tagtree_core::Name::new("sibling"), sibling);

        assert_eq!(container.subtree_node_count(a), 3);
        assert_eq!(container.release_recursive(a), 3);
        assert_eq!(container.node_count(), 2, "root and sibling remain");
        assert_eq!(container.release_recursive(a), 0, "already gone");
    }

    #[test]
    fn release_children_empties_compound_in_place() {
        let tree = Tree::new();
        let mut container = tree.inner().borrow_mut();
        let root = container.root_id;
        let child = container.allocator.allocate();
        container.allocator.get_mut(child).unwrap().override_to(5i64);
        container
            .allocator
            .get_mut(root)
            .unwrap()
            .map_data_mut()
            .unwrap()
            .insert(tagtree_core::Name::new("x"), child);

        assert_eq!(container.release_children(root), 1);
        assert!(container.allocator.get(root).unwrap().map_data().unwrap().is_empty());
        assert!(container.allocator.get(child).is_none());
        assert_eq!(container.release_children(root), 0);
    }

    #[test]
    fn deep_copy_local_duplicates_subtree() {
        let tree = Tree::new();
        let mut container = tree.inner().borrow_mut();
        let list = container.allocator.allocate();
        let e0 = container.allocator.allocate();
        let e1 = container.allocator.allocate();
        container.allocator.get_mut(list).unwrap().override_to_empty_list();
        container.allocator.get_mut(e0).unwrap().override_to(1i32);
        container.allocator.get_mut(e1).unwrap().override_to(2i32);
        container
            .allocator
            .get_mut(list)
            .unwrap()
            .list_data_mut()
            .unwrap()
            .children
            .extend([e0, e1]);

        let copy = container.deep_copy_local(list);
        assert!(copy.is_valid());
        assert_ne!(copy, list);
        let copied_children = container
            .allocator
            .get(copy)
            .unwrap()
            .list_data()
            .unwrap()
            .children
            .clone();
        assert_eq!(copied_children.len(), 2);
        assert_ne!(copied_children[0], e0, "children are fresh nodes");
        assert_eq!(
            container.allocator.get(copied_children[0]).unwrap().get::<i32>(),
            Some(1)
        );
    }

    #[test]
    fn version_suppression_gates_counters() {
        let tree = Tree::new();
        let mut container = tree.inner().borrow_mut();
        container.writes_bump_versions = false;
        container.update_data_and_struct_version();
        assert_eq!(container.data_version, 0);
        assert_eq!(container.struct_version, 0);
        assert!(!container.dirty_this_frame);
    }
}
