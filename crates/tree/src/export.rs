//! Typed subtree exchange
//!
//! `TypedNode` is an owned, self-contained mirror of a subtree: no
//! handles, no slab. It exists for the boundaries the bit-level wire
//! format is wrong for: persistence in external stores, IPC with
//! non-tree systems, test fixtures, debugging.
//!
//! Binary exchange goes through bincode, human-readable exchange through
//! JSON. Maps export as ordered key/value vectors so the same subtree
//! always serializes to identical bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

use tagtree_core::{
    ClassPath, Color, DateTime, Int64Vec2, Int64Vec3, IntVec2, IntVec3, Name, NodeId, NodeValue,
    ObjectPath, OpReport, OpResult, Rotator, Uuid, Vec2, Vec3,
};

use crate::accessor::{Accessor, CreateMode};
use crate::container::Container;

/// Error during typed export/import.
#[derive(Debug)]
pub enum ExportError {
    /// The accessor's path does not resolve.
    NodeNotFound,
    /// The owning tree is gone.
    InvalidContainer,
    /// Bincode encoding/decoding error (original error preserved).
    Bincode(Box<bincode::Error>),
    /// JSON encoding/decoding error.
    Json(serde_json::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::NodeNotFound => write!(f, "node not found at accessor path"),
            ExportError::InvalidContainer => write!(f, "tree destroyed"),
            ExportError::Bincode(e) => write!(f, "bincode error: {}", e),
            ExportError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Bincode(e) => Some(e.as_ref()),
            ExportError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bincode::Error> for ExportError {
    fn from(e: bincode::Error) -> Self {
        ExportError::Bincode(Box::new(e))
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Json(e)
    }
}

/// Owned recursive mirror of one subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedNode {
    Empty,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Name(String),
    String(String),
    Color(Color),
    Guid(Uuid),
    ClassPath(ClassPath),
    ObjectPath(ObjectPath),
    DateTime(DateTime),
    Rotator(Rotator),
    Vec2(Vec2),
    Vec3(Vec3),
    IntVec2(IntVec2),
    IntVec3(IntVec3),
    Int64Vec2(Int64Vec2),
    Int64Vec3(Int64Vec3),
    ArrayInt8(Vec<i8>),
    ArrayInt16(Vec<i16>),
    ArrayInt32(Vec<i32>),
    ArrayInt64(Vec<i64>),
    ArrayFloat32(Vec<f32>),
    ArrayFloat64(Vec<f64>),
    Map(Vec<(String, TypedNode)>),
    List(Vec<TypedNode>),
}

impl TypedNode {
    /// Nodes this subtree needs in the slab, itself included.
    pub fn node_count(&self) -> u32 {
        match self {
            TypedNode::Map(entries) => {
                1 + entries.iter().map(|(_, n)| n.node_count()).sum::<u32>()
            }
            TypedNode::List(items) => 1 + items.iter().map(TypedNode::node_count).sum::<u32>(),
            _ => 1,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ExportError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<TypedNode, ExportError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<TypedNode, ExportError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn export_node(cont: &Container, id: NodeId) -> Option<TypedNode> {
    let cell = cont.allocator.get(id)?;
    Some(match cell {
        NodeValue::Empty => TypedNode::Empty,
        NodeValue::Bool(v) => TypedNode::Bool(*v),
        NodeValue::Int8(v) => TypedNode::Int8(*v),
        NodeValue::Int16(v) => TypedNode::Int16(*v),
        NodeValue::Int32(v) => TypedNode::Int32(*v),
        NodeValue::Int64(v) => TypedNode::Int64(*v),
        NodeValue::Float32(v) => TypedNode::Float32(*v),
        NodeValue::Float64(v) => TypedNode::Float64(*v),
        NodeValue::Name(v) => TypedNode::Name(v.as_str().to_string()),
        NodeValue::String(v) => TypedNode::String(v.clone()),
        NodeValue::Color(v) => TypedNode::Color(*v),
        NodeValue::Guid(v) => TypedNode::Guid(*v),
        NodeValue::ClassPath(v) => TypedNode::ClassPath(v.clone()),
        NodeValue::ObjectPath(v) => TypedNode::ObjectPath(v.clone()),
        NodeValue::DateTime(v) => TypedNode::DateTime(*v),
        NodeValue::Rotator(v) => TypedNode::Rotator(*v),
        NodeValue::Vec2(v) => TypedNode::Vec2(*v),
        NodeValue::Vec3(v) => TypedNode::Vec3(*v),
        NodeValue::IntVec2(v) => TypedNode::IntVec2(*v),
        NodeValue::IntVec3(v) => TypedNode::IntVec3(*v),
        NodeValue::Int64Vec2(v) => TypedNode::Int64Vec2(*v),
        NodeValue::Int64Vec3(v) => TypedNode::Int64Vec3(*v),
        NodeValue::ArrayInt8(v) => TypedNode::ArrayInt8(v.clone()),
        NodeValue::ArrayInt16(v) => TypedNode::ArrayInt16(v.clone()),
        NodeValue::ArrayInt32(v) => TypedNode::ArrayInt32(v.clone()),
        NodeValue::ArrayInt64(v) => TypedNode::ArrayInt64(v.clone()),
        NodeValue::ArrayFloat32(v) => TypedNode::ArrayFloat32(v.clone()),
        NodeValue::ArrayFloat64(v) => TypedNode::ArrayFloat64(v.clone()),
        NodeValue::Map(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, child) in map.iter() {
                entries.push((key.as_str().to_string(), export_node(cont, *child)?));
            }
            TypedNode::Map(entries)
        }
        NodeValue::List(list) => {
            let mut items = Vec::with_capacity(list.len());
            for child in &list.children {
                items.push(export_node(cont, *child)?);
            }
            TypedNode::List(items)
        }
    })
}

fn leaf_value(node: &TypedNode) -> Option<NodeValue> {
    Some(match node {
        TypedNode::Empty => NodeValue::Empty,
        TypedNode::Bool(v) => NodeValue::Bool(*v),
        TypedNode::Int8(v) => NodeValue::Int8(*v),
        TypedNode::Int16(v) => NodeValue::Int16(*v),
        TypedNode::Int32(v) => NodeValue::Int32(*v),
        TypedNode::Int64(v) => NodeValue::Int64(*v),
        TypedNode::Float32(v) => NodeValue::Float32(*v),
        TypedNode::Float64(v) => NodeValue::Float64(*v),
        TypedNode::Name(v) => NodeValue::Name(Name::new(v)),
        TypedNode::String(v) => NodeValue::String(v.clone()),
        TypedNode::Color(v) => NodeValue::Color(*v),
        TypedNode::Guid(v) => NodeValue::Guid(*v),
        TypedNode::ClassPath(v) => NodeValue::ClassPath(v.clone()),
        TypedNode::ObjectPath(v) => NodeValue::ObjectPath(v.clone()),
        TypedNode::DateTime(v) => NodeValue::DateTime(*v),
        TypedNode::Rotator(v) => NodeValue::Rotator(*v),
        TypedNode::Vec2(v) => NodeValue::Vec2(*v),
        TypedNode::Vec3(v) => NodeValue::Vec3(*v),
        TypedNode::IntVec2(v) => NodeValue::IntVec2(*v),
        TypedNode::IntVec3(v) => NodeValue::IntVec3(*v),
        TypedNode::Int64Vec2(v) => NodeValue::Int64Vec2(*v),
        TypedNode::Int64Vec3(v) => NodeValue::Int64Vec3(*v),
        TypedNode::ArrayInt8(v) => NodeValue::ArrayInt8(v.clone()),
        TypedNode::ArrayInt16(v) => NodeValue::ArrayInt16(v.clone()),
        TypedNode::ArrayInt32(v) => NodeValue::ArrayInt32(v.clone()),
        TypedNode::ArrayInt64(v) => NodeValue::ArrayInt64(v.clone()),
        TypedNode::ArrayFloat32(v) => NodeValue::ArrayFloat32(v.clone()),
        TypedNode::ArrayFloat64(v) => NodeValue::ArrayFloat64(v.clone()),
        TypedNode::Map(_) | TypedNode::List(_) => return None,
    })
}

fn import_node(cont: &mut Container, id: NodeId, node: &TypedNode) -> OpResult {
    if cont
        .allocator
        .get(id)
        .map(NodeValue::is_compound)
        .unwrap_or(false)
    {
        cont.release_children(id);
    }
    match node {
        TypedNode::Map(entries) => {
            if let Some(cell) = cont.allocator.get_mut(id) {
                cell.override_to_empty_map();
            } else {
                return OpResult::InvalidId;
            }
            for (key, child_node) in entries {
                let child_id = cont.allocator.allocate();
                if !child_id.is_valid() {
                    return OpResult::AllocateFailed;
                }
                if let Some(map) = cont.allocator.get_mut(id).and_then(|c| c.map_data_mut()) {
                    map.insert(Name::new(key), child_id);
                }
                let result = import_node(cont, child_id, child_node);
                if result != OpResult::Success {
                    return result;
                }
            }
            OpResult::Success
        }
        TypedNode::List(items) => {
            if let Some(cell) = cont.allocator.get_mut(id) {
                cell.override_to_empty_list();
            } else {
                return OpResult::InvalidId;
            }
            for child_node in items {
                let child_id = cont.allocator.allocate();
                if !child_id.is_valid() {
                    return OpResult::AllocateFailed;
                }
                if let Some(list) = cont.allocator.get_mut(id).and_then(|c| c.list_data_mut()) {
                    list.children.push(child_id);
                }
                let result = import_node(cont, child_id, child_node);
                if result != OpResult::Success {
                    return result;
                }
            }
            OpResult::Success
        }
        leaf => {
            let Some(value) = leaf_value(leaf) else {
                return OpResult::InvalidContainer;
            };
            match cont.allocator.get_mut(id) {
                Some(cell) => {
                    *cell = value;
                    OpResult::Success
                }
                None => OpResult::InvalidId,
            }
        }
    }
}

impl Accessor {
    /// Export this subtree as an owned `TypedNode`.
    pub fn export_typed(&self) -> Result<TypedNode, ExportError> {
        let Some(rc) = self.container.upgrade() else {
            return Err(ExportError::InvalidContainer);
        };
        let cont = rc.borrow();
        if !self.resolve_read(&cont).is_success() {
            return Err(ExportError::NodeNotFound);
        }
        export_node(&cont, self.cached_id.get()).ok_or(ExportError::NodeNotFound)
    }

    /// Overwrite this node with `node`'s content, creating the path on
    /// demand. Fit is checked up front: a subtree that does not fit the
    /// allocator is rejected before anything is touched.
    pub fn import_typed(&self, node: &TypedNode) -> OpReport {
        let Some(rc) = self.container.upgrade() else {
            return OpReport::new(OpResult::InvalidContainer);
        };
        let mut cont = rc.borrow_mut();
        let pre_data_version = cont.data_version;
        let report = self.resolve_create(&mut cont, CreateMode::Force);
        if !report.is_success() {
            return report;
        }
        // Children only; the target node itself is already allocated.
        if cont.allocator.free_remaining() < node.node_count() - 1 {
            return OpReport::new(OpResult::AllocateFailed);
        }
        let id = self.cached_id.get();
        let result = import_node(&mut cont, id, node);
        if result != OpResult::Success {
            return OpReport::new(result);
        }
        cont.allocator.bump_data_version(id);
        if cont.data_version == pre_data_version {
            cont.update_data_and_struct_version();
        }
        cont.bubble_along_path(&self.path);
        OpReport::new(OpResult::Success)
    }
}
