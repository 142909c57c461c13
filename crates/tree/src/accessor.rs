//! Path accessor
//!
//! An `Accessor` is a cheap value-typed cursor: a weak reference to the
//! container plus a path of map keys and list indices. It resolves lazily
//! and caches the terminal handle, validated against the container's
//! struct version: as long as no structural change happened, a resolved
//! accessor costs one version compare per operation.
//!
//! Every write follows the same protocol:
//! 1. bump the slot's data version,
//! 2. bump the container data version (plus the struct version when the
//!    mutation created, destroyed, re-parented or re-kinded a node),
//! 3. bubble subtree versions from the root down the path.
//!
//! Accessors whose tree has been dropped fail every operation with
//! `InvalidContainer`; nothing dangles.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tagtree_core::{
    BitReader, BitWriter, CellScalar, Name, NodeId, NodeKind, NodeValue, OpReport, OpResult,
};

use crate::container::{Container, Tree};

/// Paths deeper than this fail to resolve; bounds recursion everywhere.
pub const MAX_PATH_DEPTH: usize = 64;

/// Longest accessor path accepted from the network.
pub const MAX_NET_PATH_SEGMENTS: u32 = 2048;

/// One step of an accessor path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(Name),
    Index(i32),
}

/// How `resolve` treats missing or wrong-kinded intermediate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreateMode {
    /// Create missing map entries; convert `Empty` cells to the needed
    /// compound kind; never destroy existing data.
    Ensure,
    /// Create missing map entries; re-kind existing cells, releasing their
    /// children first.
    Force,
}

/// Value-typed cursor into a [`Tree`].
#[derive(Clone, Debug)]
pub struct Accessor {
    pub(crate) container: Weak<RefCell<Container>>,
    pub(crate) path: Vec<PathSeg>,

    // Resolve cache, validated by struct version.
    pub(crate) cached_id: Cell<NodeId>,
    cached_struct_version: Cell<i32>,

    // Observation marks for change detection; -1 = never observed.
    last_seen_id: Cell<NodeId>,
    last_seen_data_version: Cell<i32>,
    last_seen_container_version: Cell<i32>,
    last_seen_subtree_version: Cell<i32>,
}

impl Accessor {
    pub(crate) fn root(
        container: Weak<RefCell<Container>>,
        root_id: NodeId,
        struct_version: i32,
    ) -> Self {
        let accessor = Accessor::detached(container, Vec::new());
        accessor.cached_id.set(root_id);
        accessor.cached_struct_version.set(struct_version);
        accessor
    }

    fn detached(container: Weak<RefCell<Container>>, path: Vec<PathSeg>) -> Self {
        Accessor {
            container,
            path,
            cached_id: Cell::new(NodeId::INVALID),
            cached_struct_version: Cell::new(-1),
            last_seen_id: Cell::new(NodeId::INVALID),
            last_seen_data_version: Cell::new(-1),
            last_seen_container_version: Cell::new(-1),
            last_seen_subtree_version: Cell::new(-1),
        }
    }

    /// An accessor that answers `InvalidContainer` to everything.
    pub fn invalid() -> Self {
        Accessor::detached(Weak::new(), Vec::new())
    }

    /// True while the owning tree is alive.
    pub fn is_valid(&self) -> bool {
        self.container.strong_count() > 0
    }

    pub fn path_segments(&self) -> &[PathSeg] {
        &self.path
    }

    // ----- navigation -----------------------------------------------------

    /// Child accessor under a map key. The cache is primed from this
    /// accessor's cached node when possible; resolution re-validates it.
    pub fn child_by_key(&self, key: impl Into<Name>) -> Accessor {
        let key = key.into();
        let mut path = self.path.clone();
        path.push(PathSeg::Key(key.clone()));
        let child = Accessor::detached(self.container.clone(), path);

        if let Some(rc) = self.container.upgrade() {
            let cont = rc.borrow();
            if let Some(id) = cont
                .allocator
                .get(self.cached_id.get())
                .and_then(|cell| cell.map_data())
                .and_then(|map| map.get(&key))
            {
                child.cached_id.set(id);
                child.cached_struct_version.set(self.cached_struct_version.get());
            }
        }
        child
    }

    /// Child accessor at a list index.
    pub fn child_by_index(&self, index: i32) -> Accessor {
        let mut path = self.path.clone();
        path.push(PathSeg::Index(index));
        let child = Accessor::detached(self.container.clone(), path);

        if let Some(rc) = self.container.upgrade() {
            let cont = rc.borrow();
            if let Some(id) = cont
                .allocator
                .get(self.cached_id.get())
                .and_then(|cell| cell.list_data())
                .and_then(|list| list.get(index))
            {
                child.cached_id.set(id);
                child.cached_struct_version.set(self.cached_struct_version.get());
            }
        }
        child
    }

    /// Parent accessor, re-resolved; invalid if the parent path is dead.
    pub fn parent(&self) -> Accessor {
        if !self.is_valid() || self.path.is_empty() {
            return Accessor::invalid();
        }
        let parent = self.parent_preview();
        let Some(rc) = self.container.upgrade() else {
            return Accessor::invalid();
        };
        let cont = rc.borrow();
        if !parent.resolve_read(&cont).is_success() {
            return Accessor::invalid();
        }
        parent
    }

    /// Parent accessor without resolving; for callers that only need the
    /// path.
    pub fn parent_preview(&self) -> Accessor {
        if !self.is_valid() || self.path.is_empty() {
            return Accessor::invalid();
        }
        let mut path = self.path.clone();
        path.pop();
        Accessor::detached(self.container.clone(), path)
    }

    /// Pure path comparison: `p` names the same container and its path is
    /// a prefix of `c`'s (a node is its own ancestor).
    pub fn is_ancestor(p: &Accessor, c: &Accessor) -> bool {
        if !Weak::ptr_eq(&p.container, &c.container) {
            return false;
        }
        if p.path.len() > c.path.len() {
            return false;
        }
        p.path.iter().zip(&c.path).all(|(a, b)| a == b)
    }

    /// True when `other` lies on this accessor's path (same container).
    pub fn is_descendant_of(&self, other: &Accessor) -> bool {
        Accessor::is_ancestor(other, self)
    }

    /// True when this accessor lies on `other`'s path (same container).
    pub fn is_ancestor_of(&self, other: &Accessor) -> bool {
        Accessor::is_ancestor(self, other)
    }

    // ----- resolution -----------------------------------------------------

    /// Resolve read-only and report how it went.
    pub fn try_resolve(&self) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let cont = rc.borrow();
        self.resolve_read(&cont)
    }

    fn cache_is_current(&self, cont: &Container) -> bool {
        if self.cached_struct_version.get() == cont.struct_version {
            cont.allocator.is_valid(self.cached_id.get())
        } else if self.cached_id.get().is_valid() && cont.allocator.is_valid(self.cached_id.get()) {
            // Structure changed elsewhere but this handle survived.
            self.cached_struct_version.set(cont.struct_version);
            true
        } else {
            false
        }
    }

    /// Read-only resolution: walks the path from the root without touching
    /// the tree. Mutates only the accessor's own cache cells.
    pub(crate) fn resolve_read(&self, cont: &Container) -> OpReport {
        if self.cache_is_current(cont) {
            return OpReport::new(OpResult::Success);
        }
        if self.path.len() > MAX_PATH_DEPTH {
            tracing::error!(depth = self.path.len(), max = MAX_PATH_DEPTH, "path too deep");
            return OpReport::new(OpResult::InvalidContainer);
        }

        let mut current = cont.root_id;
        if !current.is_valid() || !cont.allocator.is_valid(current) {
            return OpReport::new(OpResult::InvalidId);
        }

        for (i, segment) in self.path.iter().enumerate() {
            let cell = match cont.allocator.get(current) {
                Some(cell) => cell,
                None => return OpReport::new(OpResult::InvalidId),
            };
            match segment {
                PathSeg::Key(key) => {
                    let Some(map) = cell.map_data() else {
                        return OpReport::with_message(
                            OpResult::NodeTypeMismatch,
                            format!(
                                "node [{}] is {}, not a map",
                                self.path_string(i),
                                cell.kind().name()
                            ),
                        );
                    };
                    match map.get(key) {
                        Some(child) => current = child,
                        None => return OpReport::new(OpResult::NotFoundNode),
                    }
                }
                PathSeg::Index(index) => {
                    let Some(list) = cell.list_data() else {
                        return OpReport::with_message(
                            OpResult::NodeTypeMismatch,
                            format!(
                                "node [{}] is {}, not a list",
                                self.path_string(i),
                                cell.kind().name()
                            ),
                        );
                    };
                    match list.get(*index) {
                        Some(child) => current = child,
                        None => return OpReport::new(OpResult::NotFoundNode),
                    }
                }
            }
            if !cont.allocator.is_valid(current) {
                return OpReport::new(OpResult::InvalidId);
            }
        }

        self.cached_id.set(current);
        self.cached_struct_version.set(cont.struct_version);
        OpReport::new(OpResult::Success)
    }

    /// Creating resolution: walks the path, materializing missing map
    /// entries and converting cells as the mode allows. Every structural
    /// mutation bumps both container counters.
    pub(crate) fn resolve_create(&self, cont: &mut Container, mode: CreateMode) -> OpReport {
        if self.cache_is_current(cont) {
            return OpReport::new(OpResult::Success);
        }
        if self.path.len() > MAX_PATH_DEPTH {
            tracing::error!(depth = self.path.len(), max = MAX_PATH_DEPTH, "path too deep");
            return OpReport::new(OpResult::InvalidContainer);
        }

        let mut current = cont.root_id;
        if !current.is_valid() || !cont.allocator.is_valid(current) {
            return OpReport::new(OpResult::InvalidId);
        }

        for (i, segment) in self.path.iter().enumerate() {
            let kind = match cont.allocator.get(current) {
                Some(cell) => cell.kind(),
                None => return OpReport::new(OpResult::InvalidId),
            };
            match segment {
                PathSeg::Key(key) => {
                    if kind != NodeKind::Map {
                        if mode == CreateMode::Force {
                            cont.release_children(current);
                            if let Some(cell) = cont.allocator.get_mut(current) {
                                cell.override_to_empty_map();
                            }
                            cont.allocator.bump_data_version(current);
                            cont.update_data_and_struct_version();
                        } else if kind == NodeKind::Empty {
                            if let Some(cell) = cont.allocator.get_mut(current) {
                                cell.override_to_empty_map();
                            }
                            cont.allocator.bump_data_version(current);
                            cont.update_data_and_struct_version();
                        } else {
                            return OpReport::with_message(
                                OpResult::PermissionDenied,
                                format!(
                                    "node [{}] is {}; ensure mode does not re-kind",
                                    self.path_string(i),
                                    kind.name()
                                ),
                            );
                        }
                    }
                    let existing = cont
                        .allocator
                        .get(current)
                        .and_then(|cell| cell.map_data())
                        .and_then(|map| map.get(key));
                    match existing {
                        Some(child) => current = child,
                        None => {
                            let new_child = cont.allocator.allocate();
                            if !new_child.is_valid() {
                                return OpReport::new(OpResult::InvalidId);
                            }
                            if let Some(map) =
                                cont.allocator.get_mut(current).and_then(|c| c.map_data_mut())
                            {
                                map.insert(key.clone(), new_child);
                            }
                            cont.allocator.bump_data_version(current);
                            cont.update_data_and_struct_version();
                            current = new_child;
                        }
                    }
                }
                PathSeg::Index(index) => {
                    if kind != NodeKind::List {
                        if mode == CreateMode::Force {
                            cont.release_children(current);
                            if let Some(cell) = cont.allocator.get_mut(current) {
                                cell.override_to_empty_list();
                            }
                            cont.allocator.bump_data_version(current);
                            cont.update_data_and_struct_version();
                        } else if kind == NodeKind::Empty {
                            if let Some(cell) = cont.allocator.get_mut(current) {
                                cell.override_to_empty_list();
                            }
                            cont.allocator.bump_data_version(current);
                            cont.update_data_and_struct_version();
                        } else {
                            return OpReport::with_message(
                                OpResult::PermissionDenied,
                                format!(
                                    "node [{}] is {}; ensure mode does not re-kind",
                                    self.path_string(i),
                                    kind.name()
                                ),
                            );
                        }
                    }
                    let in_range = cont
                        .allocator
                        .get(current)
                        .and_then(|cell| cell.list_data())
                        .map(|list| list.is_valid_index(*index))
                        .unwrap_or(false);
                    if !in_range {
                        // Lists never grow through index resolution.
                        return OpReport::with_message(
                            OpResult::PermissionDenied,
                            format!(
                                "node [{}] not found; lists only grow through list_add/list_insert",
                                self.path_string(i)
                            ),
                        );
                    }
                    current = cont
                        .allocator
                        .get(current)
                        .and_then(|cell| cell.list_data())
                        .and_then(|list| list.get(*index))
                        .unwrap_or(NodeId::INVALID);
                }
            }
            if !cont.allocator.is_valid(current) {
                return OpReport::new(OpResult::InvalidId);
            }
        }

        self.cached_id.set(current);
        self.cached_struct_version.set(cont.struct_version);
        OpReport::new(OpResult::Success)
    }

    // ----- identity and kind checks ---------------------------------------

    pub fn exists(&self) -> bool {
        self.try_resolve().is_success()
    }

    pub fn kind(&self) -> Option<NodeKind> {
        let rc = self.container.upgrade()?;
        let cont = rc.borrow();
        if !self.resolve_read(&cont).is_success() {
            return None;
        }
        cont.allocator.get(self.cached_id.get()).map(|c| c.kind())
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind().map(NodeKind::name).unwrap_or("$Invalid$")
    }

    pub fn is_empty_value(&self) -> bool {
        self.kind() == Some(NodeKind::Empty)
    }

    pub fn is_map(&self) -> bool {
        self.kind() == Some(NodeKind::Map)
    }

    pub fn is_list(&self) -> bool {
        self.kind() == Some(NodeKind::List)
    }

    pub fn is_array(&self) -> bool {
        self.kind().map(NodeKind::is_array).unwrap_or(false)
    }

    /// Scalar leaf: neither array nor compound.
    pub fn is_scalar(&self) -> bool {
        self.kind()
            .map(|k| (k as u8) < NodeKind::ArrayInt8 as u8)
            .unwrap_or(false)
    }

    pub fn is_empty_map(&self) -> bool {
        self.with_resolved_cell(|cell| cell.map_data().map(|m| m.is_empty()))
            .flatten()
            .unwrap_or(false)
    }

    pub fn is_filled_map(&self) -> bool {
        self.with_resolved_cell(|cell| cell.map_data().map(|m| !m.is_empty()))
            .flatten()
            .unwrap_or(false)
    }

    pub fn is_empty_list(&self) -> bool {
        self.with_resolved_cell(|cell| cell.list_data().map(|l| l.is_empty()))
            .flatten()
            .unwrap_or(false)
    }

    pub fn is_filled_list(&self) -> bool {
        self.with_resolved_cell(|cell| cell.list_data().map(|l| !l.is_empty()))
            .flatten()
            .unwrap_or(false)
    }

    /// Run `f` on the resolved cell; `None` when resolution fails.
    pub(crate) fn with_resolved_cell<R>(&self, f: impl FnOnce(&NodeValue) -> R) -> Option<R> {
        let rc = self.container.upgrade()?;
        let cont = rc.borrow();
        if !self.resolve_read(&cont).is_success() {
            return None;
        }
        cont.allocator.get(self.cached_id.get()).map(f)
    }

    /// This node's data version counter.
    pub fn data_version(&self) -> Option<i32> {
        let rc = self.container.upgrade()?;
        let cont = rc.borrow();
        if !self.resolve_read(&cont).is_success() {
            return None;
        }
        cont.allocator.data_version(self.cached_id.get())
    }

    /// This node's subtree version counter.
    pub fn subtree_version(&self) -> Option<i32> {
        let rc = self.container.upgrade()?;
        let cont = rc.borrow();
        if !self.resolve_read(&cont).is_success() {
            return None;
        }
        cont.allocator.subtree_version(self.cached_id.get())
    }

    // ----- change detection -----------------------------------------------

    pub fn is_data_changed(&self) -> bool {
        let Some(rc) = self.container.upgrade() else {
            return false;
        };
        let cont = rc.borrow();
        if self.last_seen_container_version.get() == cont.data_version {
            return false;
        }
        if !self.resolve_read(&cont).is_success() {
            return self.last_seen_data_version.get() != -1;
        }
        if self.last_seen_id.get() != self.cached_id.get() {
            return true;
        }
        cont.allocator.data_version(self.cached_id.get()).unwrap_or(-1)
            != self.last_seen_data_version.get()
    }

    pub fn is_data_changed_and_mark(&self) -> bool {
        let changed = self.is_data_changed();
        if changed {
            self.mark();
        }
        changed
    }

    /// Persist the current observation; later `is_data_changed` answers
    /// relative to this point.
    pub fn mark(&self) {
        let Some(rc) = self.container.upgrade() else {
            return;
        };
        let cont = rc.borrow();
        if self.resolve_read(&cont).is_success() {
            let id = self.cached_id.get();
            self.last_seen_id.set(id);
            self.last_seen_data_version
                .set(cont.allocator.data_version(id).unwrap_or(-1));
            self.last_seen_subtree_version
                .set(cont.allocator.subtree_version(id).unwrap_or(-1));
            self.last_seen_container_version.set(cont.data_version);
        } else {
            self.last_seen_id.set(NodeId::INVALID);
            self.last_seen_data_version.set(-1);
            self.last_seen_container_version.set(cont.data_version);
        }
    }

    pub fn is_subtree_changed(&self) -> bool {
        let Some(rc) = self.container.upgrade() else {
            return false;
        };
        let cont = rc.borrow();
        if self.last_seen_container_version.get() == cont.data_version {
            return false;
        }
        if !self.resolve_read(&cont).is_success() {
            return self.last_seen_subtree_version.get() != -1;
        }
        if self.last_seen_id.get() != self.cached_id.get() {
            return true;
        }
        cont.allocator
            .subtree_version(self.cached_id.get())
            .unwrap_or(-1)
            != self.last_seen_subtree_version.get()
    }

    pub fn is_subtree_changed_and_mark(&self) -> bool {
        let changed = self.is_subtree_changed();
        self.mark_subtree();
        changed
    }

    pub fn mark_subtree(&self) {
        let Some(rc) = self.container.upgrade() else {
            return;
        };
        let cont = rc.borrow();
        if self.resolve_read(&cont).is_success() {
            let id = self.cached_id.get();
            self.last_seen_id.set(id);
            self.last_seen_subtree_version
                .set(cont.allocator.subtree_version(id).unwrap_or(-1));
        } else {
            self.last_seen_id.set(NodeId::INVALID);
            self.last_seen_subtree_version.set(-1);
        }
    }

    // ----- typed reads ----------------------------------------------------

    pub fn get<T: CellScalar>(&self) -> Option<T> {
        self.with_resolved_cell(|cell| cell.get::<T>()).flatten()
    }

    pub fn get_generic_int(&self) -> Option<i64> {
        self.with_resolved_cell(NodeValue::generic_int).flatten()
    }

    pub fn get_generic_float(&self) -> Option<f64> {
        self.with_resolved_cell(NodeValue::generic_float).flatten()
    }

    // ----- typed writes ---------------------------------------------------

    /// Shared post-mutation protocol for data-only writes. One accessor
    /// operation moves the container data version at most once: when a
    /// creating resolve already bumped it, the value write rides along.
    fn finish_data_write(
        &self,
        cont: &mut Container,
        result: OpResult,
        pre_data_version: i32,
    ) -> OpReport {
        match result {
            OpResult::Success => {
                cont.allocator.bump_data_version(self.cached_id.get());
                if cont.data_version == pre_data_version {
                    cont.update_data_version();
                }
                cont.bubble_along_path(&self.path);
                OpReport::new(OpResult::Success)
            }
            OpResult::SameAndNotChange => OpReport::new(OpResult::SameAndNotChange),
            other => {
                let kind = cont
                    .allocator
                    .get(self.cached_id.get())
                    .map(|c| c.kind().name())
                    .unwrap_or("$Invalid$");
                OpReport::with_message(
                    other,
                    format!("node [{}] is {}", self.path_string(self.path.len()), kind),
                )
            }
        }
    }

    /// Set if the path resolves and the kind already matches.
    pub fn try_set<T: CellScalar>(&self, value: T) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        let result = match cont.allocator.get_mut(self.cached_id.get()) {
            Some(cell) => cell.try_set(value),
            None => OpResult::InvalidId,
        };
        self.finish_data_write(&mut cont, result, pre_data_version)
    }

    /// Create the path if needed; set if the node is fresh (`Empty`) or
    /// already holds the matching kind. Existing different-kinded nodes
    /// are left alone.
    pub fn ensure_set<T: CellScalar>(&self, value: T) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_create(&mut cont, CreateMode::Ensure);
        if !report.is_success() {
            return report;
        }
        let result = match cont.allocator.get_mut(self.cached_id.get()) {
            Some(cell) => {
                if cell.is_empty_kind() {
                    cell.override_to(value)
                } else {
                    cell.try_set(value)
                }
            }
            None => OpResult::InvalidId,
        };
        self.finish_data_write(&mut cont, result, pre_data_version)
    }

    /// Force the path into existence and overwrite kind and value. The
    /// dangerous one: intermediate nodes are re-kinded, compound children
    /// are released.
    pub fn override_to<T: CellScalar>(&self, value: T) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_create(&mut cont, CreateMode::Force);
        if !report.is_success() {
            return report;
        }
        let id = self.cached_id.get();
        let was_compound = cont
            .allocator
            .get(id)
            .map(NodeValue::is_compound)
            .unwrap_or(false);
        if was_compound {
            cont.release_children(id);
        }
        let result = match cont.allocator.get_mut(id) {
            Some(cell) => cell.override_to(value),
            None => OpResult::InvalidId,
        };
        match result {
            OpResult::Success => {
                cont.allocator.bump_data_version(id);
                if cont.data_version == pre_data_version {
                    if was_compound {
                        cont.update_data_and_struct_version();
                    } else {
                        cont.update_data_version();
                    }
                }
                cont.bubble_along_path(&self.path);
                OpReport::new(OpResult::Success)
            }
            other => OpReport::new(other),
        }
    }

    pub fn try_set_generic_int(&self, value: i64) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        let result = match cont.allocator.get_mut(self.cached_id.get()) {
            Some(cell) => cell.try_set_generic_int(value),
            None => OpResult::InvalidId,
        };
        self.finish_data_write(&mut cont, result, pre_data_version)
    }

    pub fn try_set_generic_float(&self, value: f64) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        let result = match cont.allocator.get_mut(self.cached_id.get()) {
            Some(cell) => cell.try_set_generic_float(value),
            None => OpResult::InvalidId,
        };
        self.finish_data_write(&mut cont, result, pre_data_version)
    }

    /// Reset a leaf back to `Empty` (a data change); on a compound this
    /// degrades to clearing its children.
    pub fn try_set_empty(&self) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        {
            let mut cont = rc.borrow_mut();
            let pre_data_version = cont.data_version;
            let report = self.resolve_read(&cont);
            if !report.is_success() {
                return report;
            }
            let id = self.cached_id.get();
            let kind = cont.allocator.get(id).map(NodeValue::kind);
            match kind {
                Some(NodeKind::Empty) => return OpReport::new(OpResult::SameAndNotChange),
                Some(NodeKind::Map) => {}
                Some(NodeKind::List) => {}
                Some(_) => {
                    if let Some(cell) = cont.allocator.get_mut(id) {
                        cell.reset();
                    }
                    return self.finish_data_write(&mut cont, OpResult::Success, pre_data_version);
                }
                None => return OpReport::new(OpResult::InvalidId),
            }
        }
        // Compound: clear instead of re-kind.
        if self.is_map() { self.map_clear() } else { self.list_clear() }
    }

    /// `try_set_empty` with path creation.
    pub fn ensure_set_empty(&self) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        {
            let mut cont = rc.borrow_mut();
            let report = self.resolve_create(&mut cont, CreateMode::Ensure);
            if !report.is_success() {
                return report;
            }
        }
        self.try_set_empty()
    }

    /// Make sure this node is a map, converting only `Empty` cells.
    pub fn ensure_map(&self) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_create(&mut cont, CreateMode::Ensure);
        if !report.is_success() {
            return report;
        }
        let id = self.cached_id.get();
        match cont.allocator.get(id).map(NodeValue::kind) {
            Some(NodeKind::Map) => OpReport::new(OpResult::SameAndNotChange),
            Some(NodeKind::Empty) => {
                if let Some(cell) = cont.allocator.get_mut(id) {
                    cell.override_to_empty_map();
                }
                cont.allocator.bump_data_version(id);
                if cont.data_version == pre_data_version {
                    cont.update_data_and_struct_version();
                }
                cont.bubble_along_path(&self.path);
                OpReport::new(OpResult::Success)
            }
            Some(kind) => OpReport::with_message(
                OpResult::NodeTypeMismatch,
                format!(
                    "node [{}] is {}, not convertible to map",
                    self.path_string(self.path.len()),
                    kind.name()
                ),
            ),
            None => OpReport::new(OpResult::InvalidId),
        }
    }

    /// Make sure this node is a list, converting only `Empty` cells.
    pub fn ensure_list(&self) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_create(&mut cont, CreateMode::Ensure);
        if !report.is_success() {
            return report;
        }
        let id = self.cached_id.get();
        match cont.allocator.get(id).map(NodeValue::kind) {
            Some(NodeKind::List) => OpReport::new(OpResult::SameAndNotChange),
            Some(NodeKind::Empty) => {
                if let Some(cell) = cont.allocator.get_mut(id) {
                    cell.override_to_empty_list();
                }
                cont.allocator.bump_data_version(id);
                if cont.data_version == pre_data_version {
                    cont.update_data_and_struct_version();
                }
                cont.bubble_along_path(&self.path);
                OpReport::new(OpResult::Success)
            }
            Some(kind) => OpReport::with_message(
                OpResult::NodeTypeMismatch,
                format!(
                    "node [{}] is {}, not convertible to list",
                    self.path_string(self.path.len()),
                    kind.name()
                ),
            ),
            None => OpReport::new(OpResult::InvalidId),
        }
    }

    // ----- map operations -------------------------------------------------

    pub fn map_has_key(&self, key: impl Into<Name>) -> OpReport {
        let key = key.into();
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let cont = rc.borrow();
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        match cont.allocator.get(self.cached_id.get()).and_then(|c| c.map_data()) {
            Some(map) if map.contains_key(&key) => OpReport::new(OpResult::Success),
            Some(_) => OpReport::new(OpResult::NotFoundSubNode),
            None => OpReport::new(OpResult::NodeTypeMismatch),
        }
    }

    /// Keys in insertion order; `None` when this is not a resolvable map.
    pub fn map_keys(&self) -> Option<Vec<Name>> {
        self.with_resolved_cell(|cell| {
            cell.map_data()
                .map(|map| map.keys().cloned().collect::<Vec<_>>())
        })
        .flatten()
    }

    pub fn map_len(&self) -> Option<usize> {
        self.with_resolved_cell(|cell| cell.map_data().map(|m| m.len()))
            .flatten()
    }

    /// Remove one key and release its subtree.
    pub fn map_remove(&self, key: impl Into<Name>) -> OpReport {
        let key = key.into();
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        let id = self.cached_id.get();
        let child = match cont.allocator.get(id).and_then(|c| c.map_data()) {
            Some(map) => match map.get(&key) {
                Some(child) => child,
                None => return OpReport::new(OpResult::NotFoundSubNode),
            },
            None => return OpReport::new(OpResult::NodeTypeMismatch),
        };
        if cont.release_recursive(child) > 0 {
            if let Some(map) = cont.allocator.get_mut(id).and_then(|c| c.map_data_mut()) {
                map.remove(&key);
            }
            cont.allocator.bump_data_version(id);
            cont.update_data_and_struct_version();
            cont.bubble_along_path(&self.path);
        }
        OpReport::new(OpResult::Success)
    }

    /// Release all children; versions only move when something was freed.
    pub fn map_clear(&self) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        let id = self.cached_id.get();
        if cont.allocator.get(id).and_then(|c| c.map_data()).is_none() {
            return OpReport::new(OpResult::NodeTypeMismatch);
        }
        if cont.release_children(id) > 0 {
            cont.allocator.bump_data_version(id);
            cont.update_data_and_struct_version();
            cont.bubble_along_path(&self.path);
        }
        OpReport::new(OpResult::Success)
    }

    /// One accessor per map entry, insertion order.
    pub fn accessors_from_map(&self) -> Result<Vec<Accessor>, OpReport> {
        let keys = match self.map_keys() {
            Some(keys) => keys,
            None => {
                let report = self.try_resolve();
                return Err(if report.is_success() {
                    OpReport::new(OpResult::NodeTypeMismatch)
                } else {
                    report
                });
            }
        };
        Ok(keys.into_iter().map(|k| self.child_by_key(k)).collect())
    }

    // ----- list operations ------------------------------------------------

    pub fn list_len(&self) -> Option<usize> {
        self.with_resolved_cell(|cell| cell.list_data().map(|l| l.len()))
            .flatten()
    }

    /// Append a fresh empty node; converts an `Empty` cell to a list
    /// first. Returns the child accessor.
    pub fn list_add(&self) -> Result<Accessor, OpReport> {
        let Some(rc) = self.container.upgrade() else {
            return Err(OpReport::new(OpResult::InvalidContainer));
        };
        let new_index;
        {
            let mut cont = rc.borrow_mut();
            let pre_data_version = cont.data_version;
            let report = self.resolve_create(&mut cont, CreateMode::Ensure);
            if !report.is_success() {
                tracing::warn!("list_add on an unresolvable path");
                return Err(report);
            }
            let id = self.cached_id.get();
            if cont.allocator.get(id).map(NodeValue::is_empty_kind).unwrap_or(false) {
                if let Some(cell) = cont.allocator.get_mut(id) {
                    cell.override_to_empty_list();
                }
            }
            if cont.allocator.get(id).and_then(|c| c.list_data()).is_none() {
                tracing::warn!("list_add on non-list node");
                return Err(OpReport::new(OpResult::NodeTypeMismatch));
            }
            let new_id = cont.allocator.allocate();
            if !new_id.is_valid() {
                return Err(OpReport::new(OpResult::AllocateFailed));
            }
            let Some(list) = cont.allocator.get_mut(id).and_then(|c| c.list_data_mut()) else {
                return Err(OpReport::new(OpResult::InvalidContainer));
            };
            list.children.push(new_id);
            new_index = (list.len() - 1) as i32;
            cont.allocator.bump_data_version(id);
            if cont.data_version == pre_data_version {
                cont.update_data_and_struct_version();
            }
            cont.bubble_along_path(&self.path);
        }
        Ok(self.child_by_index(new_index))
    }

    /// Insert a fresh empty node at `index`; `index == len` appends.
    pub fn list_insert(&self, index: i32) -> Result<Accessor, OpReport> {
        let Some(rc) = self.container.upgrade() else {
            return Err(OpReport::new(OpResult::InvalidContainer));
        };
        {
            let mut cont = rc.borrow_mut();
            let report = self.resolve_read(&cont);
            if !report.is_success() {
                return Err(report);
            }
            let id = self.cached_id.get();
            let len = match cont.allocator.get(id).and_then(|c| c.list_data()) {
                Some(list) => list.len() as i32,
                None => return Err(OpReport::new(OpResult::NodeTypeMismatch)),
            };
            if index < 0 || index > len {
                tracing::warn!(index, len, "list_insert index out of range");
                return Err(OpReport::with_message(
                    OpResult::PermissionDenied,
                    format!("insert index {index} out of range for list of {len}"),
                ));
            }
            let new_id = cont.allocator.allocate();
            if !new_id.is_valid() {
                return Err(OpReport::new(OpResult::AllocateFailed));
            }
            if let Some(list) = cont.allocator.get_mut(id).and_then(|c| c.list_data_mut()) {
                list.children.insert(index as usize, new_id);
            }
            cont.allocator.bump_data_version(id);
            cont.update_data_and_struct_version();
            cont.bubble_along_path(&self.path);
        }
        Ok(self.child_by_index(index))
    }

    /// Remove one element and release its subtree. With `swap_remove` the
    /// last element takes the removed slot; removing the last element
    /// just shrinks the list either way.
    pub fn list_remove(&self, index: i32, swap_remove: bool) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        let id = self.cached_id.get();
        let child = {
            let Some(list) = cont.allocator.get(id).and_then(|c| c.list_data()) else {
                return OpReport::new(OpResult::NodeTypeMismatch);
            };
            if !list.is_valid_index(index) {
                return OpReport::new(OpResult::NotFoundSubNode);
            }
            list.children[index as usize]
        };
        if let Some(list) = cont.allocator.get_mut(id).and_then(|c| c.list_data_mut()) {
            if swap_remove {
                list.children.swap_remove(index as usize);
            } else {
                list.children.remove(index as usize);
            }
        }
        if cont.release_recursive(child) > 0 {
            cont.allocator.bump_data_version(id);
            cont.update_data_and_struct_version();
            cont.bubble_along_path(&self.path);
        }
        OpReport::new(OpResult::Success)
    }

    pub fn list_clear(&self) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return report;
        }
        let id = self.cached_id.get();
        if cont.allocator.get(id).and_then(|c| c.list_data()).is_none() {
            return OpReport::new(OpResult::NodeTypeMismatch);
        }
        if cont.release_children(id) > 0 {
            cont.allocator.bump_data_version(id);
            cont.update_data_and_struct_version();
            cont.bubble_along_path(&self.path);
        }
        OpReport::new(OpResult::Success)
    }

    /// This node's own index, when it is a list element.
    pub fn list_current_index(&self) -> Option<i32> {
        if !self.exists() {
            return None;
        }
        match self.path.last() {
            Some(PathSeg::Index(i)) => Some(*i),
            _ => None,
        }
    }

    /// Nearest list index on the path, searching from the leaf up.
    pub fn list_last_parent_index(&self) -> Option<i32> {
        if !self.exists() {
            return None;
        }
        self.path.iter().rev().find_map(|seg| match seg {
            PathSeg::Index(i) => Some(*i),
            _ => None,
        })
    }

    /// One accessor per list element.
    pub fn accessors_from_list(&self) -> Result<Vec<Accessor>, OpReport> {
        let len = match self.list_len() {
            Some(len) => len,
            None => {
                let report = self.try_resolve();
                return Err(if report.is_success() {
                    OpReport::new(OpResult::NodeTypeMismatch)
                } else {
                    report
                });
            }
        };
        Ok((0..len as i32).map(|i| self.child_by_index(i)).collect())
    }

    // ----- removal --------------------------------------------------------

    /// Release this node and everything below it. Returns the number of
    /// nodes freed.
    pub fn remove(&self) -> i32 {
        let Some(rc) = self.container.upgrade() else {
            return 0;
        };
        let mut cont = rc.borrow_mut();
        if !self.resolve_read(&cont).is_success() {
            return 0;
        }
        let id = self.cached_id.get();
        let freed = cont.release_recursive(id);

        // Unhook from the parent so the slot does not dangle.
        if let Some(PathSeg::Key(key)) = self.path.last() {
            let parent = self.parent_preview();
            if parent.resolve_read(&cont).is_success() {
                let parent_id = parent.cached_id.get();
                if let Some(map) = cont.allocator.get_mut(parent_id).and_then(|c| c.map_data_mut()) {
                    map.remove(key);
                }
                cont.allocator.bump_data_version(parent_id);
            }
        } else if let Some(PathSeg::Index(index)) = self.path.last() {
            let parent = self.parent_preview();
            if parent.resolve_read(&cont).is_success() {
                let parent_id = parent.cached_id.get();
                if let Some(list) = cont.allocator.get_mut(parent_id).and_then(|c| c.list_data_mut())
                {
                    if *index >= 0 && (*index as usize) < list.children.len() {
                        list.children.remove(*index as usize);
                    }
                }
                cont.allocator.bump_data_version(parent_id);
            }
        }

        cont.update_data_and_struct_version();
        cont.bubble_along_path(&self.path);

        self.cached_id.set(NodeId::INVALID);
        self.cached_struct_version.set(-1);
        freed
    }

    // ----- copy / swap ----------------------------------------------------

    /// Copy the source node's value (or subtree) over this node. Both
    /// paths must already resolve.
    pub fn try_copy_from(&self, source: &Accessor) -> OpReport {
        self.copy_from_inner(source, false)
    }

    /// Like `try_copy_from`, but this side's path is created on demand.
    pub fn ensure_copy_from(&self, source: &Accessor) -> OpReport {
        self.copy_from_inner(source, true)
    }

    fn copy_from_inner(&self, source: &Accessor, ensure: bool) -> OpReport {
        let (Some(dst_rc), Some(src_rc)) = (self.container.upgrade(), source.container.upgrade())
        else {
            return OpReport::new(OpResult::InvalidContainer);
        };

        if Rc::ptr_eq(&dst_rc, &src_rc) {
            let mut cont = dst_rc.borrow_mut();
            let pre_data_version = cont.data_version;
            let report = source.resolve_read(&cont);
            if !report.is_success() {
                return report;
            }
            let report = if ensure {
                self.resolve_create(&mut cont, CreateMode::Ensure)
            } else {
                self.resolve_read(&cont)
            };
            if !report.is_success() {
                return report;
            }
            self.copy_impl_same(&mut cont, source, pre_data_version)
        } else {
            let mut dst = dst_rc.borrow_mut();
            let src = src_rc.borrow();
            let pre_data_version = dst.data_version;
            let report = source.resolve_read(&src);
            if !report.is_success() {
                return report;
            }
            let report = if ensure {
                self.resolve_create(&mut dst, CreateMode::Ensure)
            } else {
                self.resolve_read(&dst)
            };
            if !report.is_success() {
                return report;
            }
            self.copy_impl_cross(&mut dst, &src, source, pre_data_version)
        }
    }

    fn copy_impl_same(
        &self,
        cont: &mut Container,
        source: &Accessor,
        pre_data_version: i32,
    ) -> OpReport {
        let dst_id = self.cached_id.get();
        let src_id = source.cached_id.get();
        if dst_id == src_id {
            return OpReport::new(OpResult::Success);
        }
        let both_leaves = {
            let dst_cell = cont.allocator.get(dst_id);
            let src_cell = cont.allocator.get(src_id);
            match (dst_cell, src_cell) {
                (Some(d), Some(s)) => !d.is_compound() && !s.is_compound(),
                _ => return OpReport::new(OpResult::InvalidId),
            }
        };
        if both_leaves {
            let Some(snapshot) = cont.allocator.get(src_id).cloned() else {
                return OpReport::new(OpResult::InvalidContainer);
            };
            let result = cont
                .allocator
                .get_mut(dst_id)
                .map(|cell| cell.override_from_if_not_compound(&snapshot))
                .unwrap_or(OpResult::InvalidId);
            return self.finish_data_write(cont, result, pre_data_version);
        }
        let new_id = cont.deep_copy_local(src_id);
        if !new_id.is_valid() {
            return OpReport::new(OpResult::AllocateFailed);
        }
        OpReport::new(self.redirect_node(cont, dst_id, new_id, pre_data_version))
    }

    fn copy_impl_cross(
        &self,
        dst: &mut Container,
        src: &Container,
        source: &Accessor,
        pre_data_version: i32,
    ) -> OpReport {
        let dst_id = self.cached_id.get();
        let src_id = source.cached_id.get();
        let both_leaves = {
            let dst_cell = dst.allocator.get(dst_id);
            let src_cell = src.allocator.get(src_id);
            match (dst_cell, src_cell) {
                (Some(d), Some(s)) => !d.is_compound() && !s.is_compound(),
                _ => return OpReport::new(OpResult::InvalidId),
            }
        };
        if both_leaves {
            let Some(snapshot) = src.allocator.get(src_id).cloned() else {
                return OpReport::new(OpResult::InvalidContainer);
            };
            let result = dst
                .allocator
                .get_mut(dst_id)
                .map(|cell| cell.override_from_if_not_compound(&snapshot))
                .unwrap_or(OpResult::InvalidId);
            return self.finish_data_write(dst, result, pre_data_version);
        }
        let new_id = dst.deep_copy_from(src, src_id);
        if !new_id.is_valid() {
            return OpReport::new(OpResult::AllocateFailed);
        }
        OpReport::new(self.redirect_node(dst, dst_id, new_id, pre_data_version))
    }

    /// Rewrite the parent's child slot from `old_id` to `new_id`, bump
    /// versions, bubble, release the old subtree. Path-empty means this
    /// accessor is the root and the container's root handle moves.
    pub(crate) fn redirect_node(
        &self,
        cont: &mut Container,
        old_id: NodeId,
        new_id: NodeId,
        pre_data_version: i32,
    ) -> OpResult {
        if self.path.is_empty() {
            cont.root_id = new_id;
        } else {
            let parent = self.parent_preview();
            if !parent.resolve_read(cont).is_success() {
                return OpResult::InvalidId;
            }
            let parent_id = parent.cached_id.get();
            let Some(last_segment) = self.path.last() else {
                return OpResult::InvalidContainer;
            };
            match last_segment {
                PathSeg::Key(key) => {
                    let Some(map) = cont.allocator.get_mut(parent_id).and_then(|c| c.map_data_mut())
                    else {
                        return OpResult::NodeTypeMismatch;
                    };
                    match map.slot_mut(key) {
                        Some(slot) => *slot = new_id,
                        None => return OpResult::NotFoundSubNode,
                    }
                }
                PathSeg::Index(index) => {
                    let Some(list) =
                        cont.allocator.get_mut(parent_id).and_then(|c| c.list_data_mut())
                    else {
                        return OpResult::NodeTypeMismatch;
                    };
                    if *index < 0 || (*index as usize) >= list.children.len() {
                        return OpResult::NotFoundSubNode;
                    }
                    list.children[*index as usize] = new_id;
                }
            }
            cont.allocator.bump_data_version(parent_id);
        }

        self.cached_id.set(new_id);
        cont.allocator.bump_data_version(new_id);
        if cont.data_version == pre_data_version {
            cont.update_data_and_struct_version();
        }
        self.cached_struct_version.set(cont.struct_version);
        cont.bubble_along_path(&self.path);

        if old_id.is_valid() && old_id != new_id {
            cont.release_recursive(old_id);
        }
        OpResult::Success
    }

    /// Exchange two subtrees. Rejects ancestor/descendant pairs and swaps
    /// that would overrun either allocator; a rejected swap mutates
    /// nothing.
    pub fn try_swap(&self, other: &Accessor) -> OpReport {
        let (Some(a_rc), Some(b_rc)) = (self.container.upgrade(), other.container.upgrade())
        else {
            return OpReport::new(OpResult::InvalidContainer);
        };

        if Rc::ptr_eq(&a_rc, &b_rc) {
            let mut cont = a_rc.borrow_mut();
            let report = other.resolve_read(&cont);
            if !report.is_success() {
                return report;
            }
            let report = self.resolve_read(&cont);
            if !report.is_success() {
                return report;
            }
            let a_id = self.cached_id.get();
            let b_id = other.cached_id.get();
            if a_id == b_id {
                return OpReport::new(OpResult::Success);
            }
            if Accessor::is_ancestor(self, other) || Accessor::is_ancestor(other, self) {
                return OpReport::new(OpResult::InvalidId);
            }
            if !cont.supports_double_copy(a_id, b_id) {
                return OpReport::new(OpResult::AllocateFailed);
            }
            let pre_data_version = cont.data_version;
            let new_a = cont.deep_copy_local(b_id);
            let new_b = cont.deep_copy_local(a_id);
            if !new_a.is_valid() || !new_b.is_valid() {
                if new_a.is_valid() {
                    cont.release_recursive(new_a);
                }
                if new_b.is_valid() {
                    cont.release_recursive(new_b);
                }
                return OpReport::new(OpResult::AllocateFailed);
            }
            let first = self.redirect_node(&mut cont, a_id, new_a, pre_data_version);
            let second = other.redirect_node(&mut cont, b_id, new_b, pre_data_version);
            if first != OpResult::Success || second != OpResult::Success {
                return OpReport::new(OpResult::InvalidContainer);
            }
            OpReport::new(OpResult::Success)
        } else {
            {
                let a = a_rc.borrow();
                let b = b_rc.borrow();
                let report = other.resolve_read(&b);
                if !report.is_success() {
                    return report;
                }
                let report = self.resolve_read(&a);
                if !report.is_success() {
                    return report;
                }
                let fits = a.supports_copy_from(&b, other.cached_id.get())
                    && b.supports_copy_from(&a, self.cached_id.get());
                if !fits {
                    return OpReport::new(OpResult::AllocateFailed);
                }
            }
            let a_old = self.cached_id.get();
            let b_old = other.cached_id.get();
            let new_a = {
                let mut a = a_rc.borrow_mut();
                let b = b_rc.borrow();
                a.deep_copy_from(&b, b_old)
            };
            let new_b = {
                let mut b = b_rc.borrow_mut();
                let a = a_rc.borrow();
                b.deep_copy_from(&a, a_old)
            };
            if !new_a.is_valid() || !new_b.is_valid() {
                if new_a.is_valid() {
                    a_rc.borrow_mut().release_recursive(new_a);
                }
                if new_b.is_valid() {
                    b_rc.borrow_mut().release_recursive(new_b);
                }
                return OpReport::new(OpResult::AllocateFailed);
            }
            let first = {
                let mut a = a_rc.borrow_mut();
                let pre = a.data_version;
                self.redirect_node(&mut a, a_old, new_a, pre)
            };
            let second = {
                let mut b = b_rc.borrow_mut();
                let pre = b.data_version;
                other.redirect_node(&mut b, b_old, new_b, pre)
            };
            if first != OpResult::Success || second != OpResult::Success {
                return OpReport::new(OpResult::InvalidContainer);
            }
            OpReport::new(OpResult::Success)
        }
    }

    // ----- deep equality --------------------------------------------------

    /// Deep value equality: same kinds and values throughout, lists
    /// order-sensitive, maps key-set-sensitive. Works across containers.
    pub fn is_equal(&self, other: &Accessor) -> bool {
        let (Some(a_rc), Some(b_rc)) = (self.container.upgrade(), other.container.upgrade())
        else {
            return false;
        };
        if Rc::ptr_eq(&a_rc, &b_rc) {
            let cont = a_rc.borrow();
            if !self.resolve_read(&cont).is_success() || !other.resolve_read(&cont).is_success() {
                return false;
            }
            if self.cached_id.get() == other.cached_id.get() {
                return true;
            }
            equal_node_deep(&cont, self.cached_id.get(), &cont, other.cached_id.get())
        } else {
            let a = a_rc.borrow();
            let b = b_rc.borrow();
            if !self.resolve_read(&a).is_success() || !other.resolve_read(&b).is_success() {
                return false;
            }
            equal_node_deep(&a, self.cached_id.get(), &b, other.cached_id.get())
        }
    }

    // ----- visiting -------------------------------------------------------

    /// Depth-first walk. The visitor sees `(depth, kind, map_key,
    /// list_index, accessor)` for every node, compounds before their
    /// children. No borrow is held while the visitor runs, so reading and
    /// even mutating the tree from inside it is allowed.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(i32, NodeKind, Option<&Name>, Option<i32>, &Accessor),
    {
        if !self.exists() {
            return;
        }
        self.visit_impl(0, None, None, &mut visitor);
    }

    fn visit_impl<F>(&self, depth: i32, key: Option<&Name>, index: Option<i32>, visitor: &mut F)
    where
        F: FnMut(i32, NodeKind, Option<&Name>, Option<i32>, &Accessor),
    {
        enum Shape {
            Leaf,
            Map(Vec<Name>),
            List(usize),
        }
        let shape = {
            let Some(rc) = self.container.upgrade() else {
                return;
            };
            let cont = rc.borrow();
            if !self.resolve_read(&cont).is_success() {
                return;
            }
            let Some(cell) = cont.allocator.get(self.cached_id.get()) else {
                return;
            };
            match cell {
                NodeValue::Map(map) => (cell.kind(), Shape::Map(map.keys().cloned().collect())),
                NodeValue::List(list) => (cell.kind(), Shape::List(list.len())),
                other => (other.kind(), Shape::Leaf),
            }
        };
        let (kind, shape) = shape;
        visitor(depth, kind, key, index, self);
        match shape {
            Shape::Leaf => {}
            Shape::Map(keys) => {
                for child_key in keys {
                    let child = self.child_by_key(child_key.clone());
                    child.visit_impl(depth + 1, Some(&child_key), None, visitor);
                }
            }
            Shape::List(len) => {
                for i in 0..len as i32 {
                    let child = self.child_by_index(i);
                    child.visit_impl(depth + 1, None, Some(i), visitor);
                }
            }
        }
    }

    // ----- paths ----------------------------------------------------------

    pub(crate) fn path_string(&self, up_to: usize) -> String {
        let mut out = String::from("Root");
        for segment in self.path.iter().take(up_to.min(self.path.len())) {
            out.push_str(" -> ");
            match segment {
                PathSeg::Key(key) => out.push_str(key.as_str()),
                PathSeg::Index(index) => out.push_str(&format!("[{index}]")),
            }
        }
        out
    }

    /// Path string; prefixed with a marker when the path no longer
    /// resolves.
    pub fn path(&self) -> String {
        if !self.is_valid() {
            return "$Invalid Accessor$".to_string();
        }
        if !self.exists() {
            return format!("$Node Not Exist$ {}", self.path_string(self.path.len()));
        }
        self.path_string(self.path.len())
    }

    /// Path string without resolving.
    pub fn preview_path(&self) -> String {
        if !self.is_valid() {
            return "$Invalid Accessor$".to_string();
        }
        self.path_string(self.path.len())
    }

    // ----- net codec ------------------------------------------------------

    /// Serialize presence + path. The host's object reference travels in
    /// the surrounding message; this codec only covers the path.
    pub fn write_net(&self, w: &mut BitWriter) {
        let present = self.is_valid();
        w.write_bit(present);
        if !present {
            return;
        }
        w.write_packed_u32(self.path.len() as u32);
        for segment in &self.path {
            match segment {
                PathSeg::Key(key) => {
                    w.write_u8(0);
                    w.write_name(key);
                }
                PathSeg::Index(index) => {
                    w.write_u8(1);
                    w.write_zigzag_i32(*index);
                }
            }
        }
    }

    /// Rebuild an accessor from the wire, bound to `tree`. A path longer
    /// than `MAX_NET_PATH_SEGMENTS` or an unknown segment tag flags the
    /// reader and yields an invalid accessor.
    pub fn read_net(r: &mut BitReader, tree: &Tree) -> Accessor {
        if !r.read_bit() {
            return Accessor::invalid();
        }
        let count = r.read_packed_u32();
        if count > MAX_NET_PATH_SEGMENTS {
            tracing::warn!(count, limit = MAX_NET_PATH_SEGMENTS, "accessor path too long");
            r.set_error();
            return Accessor::invalid();
        }
        let mut path = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match r.read_u8() {
                0 => path.push(PathSeg::Key(r.read_name())),
                1 => path.push(PathSeg::Index(r.read_zigzag_i32())),
                tag => {
                    tracing::warn!(tag, "unknown accessor path segment tag");
                    r.set_error();
                    return Accessor::invalid();
                }
            }
            if r.is_error() {
                return Accessor::invalid();
            }
        }
        Accessor::detached(Rc::downgrade(tree.inner()), path)
    }
}

impl PartialEq for Accessor {
    /// Same container and same path; resolution state is irrelevant.
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.container, &other.container) && self.path == other.path
    }
}

/// Structural deep equality between two nodes, possibly in different
/// containers.
pub(crate) fn equal_node_deep(
    a_cont: &Container,
    a_id: NodeId,
    b_cont: &Container,
    b_id: NodeId,
) -> bool {
    let (Some(a), Some(b)) = (a_cont.allocator.get(a_id), b_cont.allocator.get(b_id)) else {
        return false;
    };
    if a.kind() != b.kind() {
        return false;
    }
    match (a, b) {
        (NodeValue::Map(am), NodeValue::Map(bm)) => {
            if am.len() != bm.len() {
                return false;
            }
            am.iter().all(|(key, a_child)| match bm.get(key) {
                Some(b_child) => equal_node_deep(a_cont, *a_child, b_cont, b_child),
                None => false,
            })
        }
        (NodeValue::List(al), NodeValue::List(bl)) => {
            al.children.len() == bl.children.len()
                && al
                    .children
                    .iter()
                    .zip(&bl.children)
                    .all(|(x, y)| equal_node_deep(a_cont, *x, b_cont, *y))
        }
        _ => a.equals_values(b),
    }
}

// Named typed accessors, one quartet per leaf kind. The generic
// `get/try_set/ensure_set/override_to` remain available; these exist so
// call sites read like the operation they perform.
macro_rules! typed_accessors {
    ($( $ty:ty => $get:ident, $try_set:ident, $ensure_set:ident, $override_to:ident; )+) => {
        impl Accessor {
            $(
                pub fn $get(&self) -> Option<$ty> {
                    self.get::<$ty>()
                }

                pub fn $try_set(&self, value: $ty) -> OpReport {
                    self.try_set::<$ty>(value)
                }

                pub fn $ensure_set(&self, value: $ty) -> OpReport {
                    self.ensure_set::<$ty>(value)
                }

                pub fn $override_to(&self, value: $ty) -> OpReport {
                    self.override_to::<$ty>(value)
                }
            )+
        }
    };
}

typed_accessors! {
    bool => get_bool, try_set_bool, ensure_set_bool, override_to_bool;
    i8 => get_i8, try_set_i8, ensure_set_i8, override_to_i8;
    i16 => get_i16, try_set_i16, ensure_set_i16, override_to_i16;
    i32 => get_i32, try_set_i32, ensure_set_i32, override_to_i32;
    i64 => get_i64, try_set_i64, ensure_set_i64, override_to_i64;
    f32 => get_f32, try_set_f32, ensure_set_f32, override_to_f32;
    f64 => get_f64, try_set_f64, ensure_set_f64, override_to_f64;
    tagtree_core::Name => get_name, try_set_name, ensure_set_name, override_to_name;
    String => get_string, try_set_string, ensure_set_string, override_to_string;
    tagtree_core::Color => get_color, try_set_color, ensure_set_color, override_to_color;
    tagtree_core::Uuid => get_guid, try_set_guid, ensure_set_guid, override_to_guid;
    tagtree_core::ClassPath => get_class_path, try_set_class_path, ensure_set_class_path, override_to_class_path;
    tagtree_core::ObjectPath => get_object_path, try_set_object_path, ensure_set_object_path, override_to_object_path;
    tagtree_core::DateTime => get_date_time, try_set_date_time, ensure_set_date_time, override_to_date_time;
    tagtree_core::Rotator => get_rotator, try_set_rotator, ensure_set_rotator, override_to_rotator;
    tagtree_core::Vec2 => get_vec2, try_set_vec2, ensure_set_vec2, override_to_vec2;
    tagtree_core::Vec3 => get_vec3, try_set_vec3, ensure_set_vec3, override_to_vec3;
    tagtree_core::IntVec2 => get_int_vec2, try_set_int_vec2, ensure_set_int_vec2, override_to_int_vec2;
    tagtree_core::IntVec3 => get_int_vec3, try_set_int_vec3, ensure_set_int_vec3, override_to_int_vec3;
    tagtree_core::Int64Vec2 => get_int64_vec2, try_set_int64_vec2, ensure_set_int64_vec2, override_to_int64_vec2;
    tagtree_core::Int64Vec3 => get_int64_vec3, try_set_int64_vec3, ensure_set_int64_vec3, override_to_int64_vec3;
    Vec<i8> => get_array_i8, try_set_array_i8, ensure_set_array_i8, override_to_array_i8;
    Vec<i16> => get_array_i16, try_set_array_i16, ensure_set_array_i16, override_to_array_i16;
    Vec<i32> => get_array_i32, try_set_array_i32, ensure_set_array_i32, override_to_array_i32;
    Vec<i64> => get_array_i64, try_set_array_i64, ensure_set_array_i64, override_to_array_i64;
    Vec<f32> => get_array_f32, try_set_array_f32, ensure_set_array_f32, override_to_array_f32;
    Vec<f64> => get_array_f64, try_set_array_f64, ensure_set_array_f64, override_to_array_f64;
}
