//! Tree statistics and integrity checking

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use tagtree_core::{NodeId, NodeKind};

use crate::container::{Container, Tree, collect_children};

/// Aggregate shape of a tree; serializable for report output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerStats {
    pub total_nodes: i32,
    pub map_nodes: i32,
    pub list_nodes: i32,
    pub value_nodes: i32,
    pub max_depth: i32,
    pub kind_counts: HashMap<NodeKind, i32>,
}

fn collect_stats(cont: &Container, id: NodeId, depth: i32, stats: &mut ContainerStats) {
    let Some(cell) = cont.allocator.get(id) else {
        return;
    };
    stats.total_nodes += 1;
    stats.max_depth = stats.max_depth.max(depth);
    let kind = cell.kind();
    *stats.kind_counts.entry(kind).or_insert(0) += 1;
    match kind {
        NodeKind::Map => stats.map_nodes += 1,
        NodeKind::List => stats.list_nodes += 1,
        _ => stats.value_nodes += 1,
    }
    if let Some(children) = collect_children(cell) {
        for child in children {
            collect_stats(cont, child, depth + 1, stats);
        }
    }
}

fn validate_node(cont: &Container, id: NodeId, visiting: &mut HashSet<NodeId>) -> bool {
    if !id.is_valid() {
        return false;
    }
    if !visiting.insert(id) {
        tracing::error!(id = %id, "cycle detected in tree");
        return false;
    }
    let Some(cell) = cont.allocator.get(id) else {
        tracing::error!(id = %id, "child handle does not resolve");
        return false;
    };
    let ok = match collect_children(cell) {
        Some(children) => children
            .into_iter()
            .all(|child| validate_node(cont, child, visiting)),
        None => true,
    };
    visiting.remove(&id);
    ok
}

impl Tree {
    /// Walk the reachable tree and aggregate shape counters.
    pub fn statistics(&self) -> ContainerStats {
        let cont = self.inner().borrow();
        let mut stats = ContainerStats::default();
        if cont.root_id.is_valid() {
            collect_stats(&cont, cont.root_id, 0, &mut stats);
        }
        stats
    }

    /// Structural health check: the root is a live map, every reachable
    /// child handle resolves, and no cycles exist.
    pub fn validate_integrity(&self) -> bool {
        let cont = self.inner().borrow();
        if !cont.root_id.is_valid() {
            tracing::error!("integrity: invalid root handle");
            return false;
        }
        match cont.allocator.get(cont.root_id) {
            Some(root) if root.map_data().is_some() => {}
            Some(_) => {
                tracing::error!("integrity: root is not a map");
                return false;
            }
            None => {
                tracing::error!("integrity: root handle does not resolve");
                return false;
            }
        }
        let mut visiting = HashSet::new();
        validate_node(&cont, cont.root_id, &mut visiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagtree_core::Name;

    #[test]
    fn statistics_count_shapes() {
        let tree = Tree::new();
        let root = tree.accessor();
        root.child_by_key("hp").ensure_set_i32(1);
        root.child_by_key("pet").child_by_key("name").ensure_set_string("Mog".into());
        let bag = root.child_by_key("bag");
        assert!(bag.ensure_list().is_ok());
        bag.list_add().unwrap();

        let stats = tree.statistics();
        assert_eq!(stats.total_nodes, 6);
        assert_eq!(stats.map_nodes, 2);
        assert_eq!(stats.list_nodes, 1);
        assert_eq!(stats.value_nodes, 3);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.kind_counts[&NodeKind::Int32], 1);
        assert_eq!(stats.kind_counts[&NodeKind::Empty], 1);
    }

    #[test]
    fn integrity_holds_through_mutation() {
        let tree = Tree::new();
        assert!(tree.validate_integrity());
        let root = tree.accessor();
        root.child_by_key("a").child_by_key("b").ensure_set_i32(1);
        root.child_by_key("a").map_remove("b");
        assert!(root.child_by_key("list").ensure_list().is_ok());
        assert!(tree.validate_integrity());
    }

    #[test]
    fn integrity_catches_dangling_child() {
        let tree = Tree::new();
        {
            let mut cont = tree.inner().borrow_mut();
            let ghost = NodeId::new(500, 3);
            let root = cont.root_id;
            cont.allocator
                .get_mut(root)
                .unwrap()
                .map_data_mut()
                .unwrap()
                .insert(Name::new("ghost"), ghost);
        }
        assert!(!tree.validate_integrity());
    }
}
