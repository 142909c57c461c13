//! Human-readable tree dumps
//!
//! JSON-ish output meant for logs and debug consoles, not for parsing:
//! scalars carry their kind in parentheses, and the version-annotated
//! variant prefixes every node with its data/subtree counters.

use tagtree_core::{NodeId, NodeValue};

use crate::accessor::Accessor;
use crate::container::{Container, Tree};

const MAX_DUMP_DEPTH: usize = 64;

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn leaf_text(cell: &NodeValue) -> String {
    match cell {
        NodeValue::Empty => "$Empty$".to_string(),
        NodeValue::Bool(v) => if *v { "True" } else { "False" }.to_string(),
        NodeValue::Int8(v) => format!("{v} (Int8)"),
        NodeValue::Int16(v) => format!("{v} (Int16)"),
        NodeValue::Int32(v) => format!("{v} (Int32)"),
        NodeValue::Int64(v) => format!("{v} (Int64)"),
        NodeValue::Float32(v) => format!("{v} (Float32)"),
        NodeValue::Float64(v) => format!("{v} (Float64)"),
        NodeValue::Name(v) => format!("\"{v}\" (Name)"),
        NodeValue::String(v) => format!("\"{v}\" (String)"),
        NodeValue::Color(v) => format!("({},{},{},{}) (Color)", v.r, v.g, v.b, v.a),
        NodeValue::Guid(v) => format!("{v} (Guid)"),
        NodeValue::ClassPath(v) => format!("{} (ClassPath)", v.0),
        NodeValue::ObjectPath(v) => format!("{} (ObjectPath)", v.0),
        NodeValue::DateTime(v) => format!("{} (DateTime)", v.ticks),
        NodeValue::Rotator(v) => format!("(P={} Y={} R={}) (Rotator)", v.pitch, v.yaw, v.roll),
        NodeValue::Vec2(v) => format!("({}, {}) (Vec2)", v.x, v.y),
        NodeValue::Vec3(v) => format!("({}, {}, {}) (Vec3)", v.x, v.y, v.z),
        NodeValue::IntVec2(v) => format!("({}, {}) (IntVec2)", v.x, v.y),
        NodeValue::IntVec3(v) => format!("({}, {}, {}) (IntVec3)", v.x, v.y, v.z),
        NodeValue::Int64Vec2(v) => format!("({}, {}) (Int64Vec2)", v.x, v.y),
        NodeValue::Int64Vec3(v) => format!("({}, {}, {}) (Int64Vec3)", v.x, v.y, v.z),
        NodeValue::ArrayInt8(v) => format!("[{}] (ArrayInt8)", join(v)),
        NodeValue::ArrayInt16(v) => format!("[{}] (ArrayInt16)", join(v)),
        NodeValue::ArrayInt32(v) => format!("[{}] (ArrayInt32)", join(v)),
        NodeValue::ArrayInt64(v) => format!("[{}] (ArrayInt64)", join(v)),
        NodeValue::ArrayFloat32(v) => format!("[{}] (ArrayFloat32)", join(v)),
        NodeValue::ArrayFloat64(v) => format!("[{}] (ArrayFloat64)", join(v)),
        NodeValue::Map(_) => "(Map)".to_string(),
        NodeValue::List(_) => "(List)".to_string(),
    }
}

fn version_prefix(cont: &Container, id: NodeId, show_versions: bool) -> String {
    if !show_versions {
        return String::new();
    }
    let data = cont.allocator.data_version(id).unwrap_or(-1);
    let subtree = cont.allocator.subtree_version(id).unwrap_or(-1);
    format!("[V:{data}][SV:{subtree}] ")
}

fn node_text(cont: &Container, id: NodeId, depth: usize, show_versions: bool, out: &mut String) {
    if depth > MAX_DUMP_DEPTH {
        out.push_str("$Too Deep$");
        return;
    }
    let Some(cell) = cont.allocator.get(id) else {
        out.push_str("$Invalid$");
        return;
    };
    let indent = |d: usize| "  ".repeat(d);
    match cell {
        NodeValue::Map(map) => {
            out.push_str(&version_prefix(cont, id, show_versions));
            out.push_str("{\n");
            let mut first = true;
            for (key, child) in map.iter() {
                if !first {
                    out.push_str(",\n");
                }
                first = false;
                out.push_str(&indent(depth + 1));
                out.push('"');
                out.push_str(key.as_str());
                out.push_str("\": ");
                node_text(cont, *child, depth + 1, show_versions, out);
            }
            if !first {
                out.push('\n');
            }
            out.push_str(&indent(depth));
            out.push('}');
        }
        NodeValue::List(list) => {
            out.push_str(&version_prefix(cont, id, show_versions));
            out.push_str("[\n");
            for (i, child) in list.children.iter().enumerate() {
                if i > 0 {
                    out.push_str(",\n");
                }
                out.push_str(&indent(depth + 1));
                node_text(cont, *child, depth + 1, show_versions, out);
            }
            if !list.is_empty() {
                out.push('\n');
            }
            out.push_str(&indent(depth));
            out.push(']');
        }
        leaf => {
            out.push_str(&version_prefix(cont, id, show_versions));
            out.push_str(&leaf_text(leaf));
        }
    }
}

impl Accessor {
    /// Dump this subtree. `show_versions` annotates every node with its
    /// data and subtree counters.
    pub fn to_text(&self, show_versions: bool) -> String {
        let Some(rc) = self.container.upgrade() else {
            return "$Invalid Accessor$".to_string();
        };
        let cont = rc.borrow();
        if !self.resolve_read(&cont).is_success() {
            return "$Node Not Exist$".to_string();
        }
        let mut out = String::new();
        node_text(&cont, self.cached_id.get(), 0, show_versions, &mut out);
        out
    }
}

impl Tree {
    /// Container header plus the root subtree.
    pub fn to_text(&self) -> String {
        let header = {
            let cont = self.inner().borrow();
            format!(
                "=== Tree ===\n\
                 Data Version: {}\n\
                 Struct Version: {}\n\
                 Node Count: {}\n\
                 ============\n",
                cont.data_version,
                cont.struct_version,
                cont.node_count(),
            )
        };
        format!("{header}{}", self.accessor().to_text(false))
    }

    /// Verbose dump: allocator statistics and per-node versions included.
    pub fn to_debug_text(&self) -> String {
        let header = {
            let cont = self.inner().borrow();
            let stats = cont.allocator.stats();
            format!(
                "=== Tree Debug ===\n\
                 Root: {}\n\
                 Data Version: {}\n\
                 Struct Version: {}\n\
                 Writes Bump Versions: {}\n\
                 Total Allocated: {}\n\
                 Total Deallocated: {}\n\
                 Current Active: {}\n\
                 Peak Active: {}\n\
                 Chunks: {}\n\
                 Free Remaining: {}\n\
                 Memory: {} bytes\n\
                 ==================\n",
                cont.root_id,
                cont.data_version,
                cont.struct_version,
                cont.writes_bump_versions,
                stats.total_allocated,
                stats.total_deallocated,
                stats.current_active,
                stats.peak_active,
                cont.allocator.chunk_count(),
                cont.allocator.free_remaining(),
                cont.allocator.memory_usage(),
            )
        };
        format!("{header}{}", self.accessor().to_text(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_shows_structure_and_kinds() {
        let tree = Tree::new();
        let root = tree.accessor();
        root.child_by_key("hp").ensure_set_i32(100);
        let items = root.child_by_key("items");
        assert!(items.ensure_list().is_ok());
        items.list_add().unwrap().override_to_string("a".to_string());

        let text = root.to_text(false);
        assert!(text.contains("\"hp\": 100 (Int32)"));
        assert!(text.contains("\"a\" (String)"));
        assert!(text.starts_with('{'));

        let debug = tree.to_debug_text();
        assert!(debug.contains("Current Active: 4"));
        assert!(debug.contains("[V:"));
    }

    #[test]
    fn dead_path_dump_is_marked() {
        let tree = Tree::new();
        let ghost = tree.accessor().child_by_key("missing");
        assert_eq!(ghost.to_text(false), "$Node Not Exist$");
    }
}
