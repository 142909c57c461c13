//! tagtree-core: value model and wire primitives for the tagtree attribute tree
//!
//! This crate is the foundation the tree crate builds on:
//!
//! - `Name`: interned short strings for map keys and path segments
//! - `NodeId`: 32-bit generational handle (16-bit slot + 16-bit generation)
//! - `NodeValue` / `NodeKind`: the tagged value cell with kind-checked,
//!   idempotence-aware access
//! - `OpResult` / `OpReport`: the result taxonomy every operation returns
//! - `wire`: bit-granular writer/reader, LEB128 varints, ZigZag packing,
//!   and the cell payload codec shared by replication and disk formats
//!
//! Key design principle: a cell owns only its own data. Children of
//! compound cells are referenced by `NodeId`, so the value model stays
//! flat and the wire format can encode handles instead of addresses.

pub mod id;
pub mod name;
pub mod result;
pub mod types;
pub mod value;
pub mod wire;

// Re-export key types
pub use id::{INVALID_INDEX, NodeId};
pub use name::Name;
pub use result::{OpReport, OpResult};
pub use types::{
    ClassPath, Color, DateTime, FLOAT_EPSILON, FLOAT_EPSILON_F32, Int64Vec2, Int64Vec3, IntVec2,
    IntVec3, ObjectPath, Rotator, Vec2, Vec3, nearly_equal_f32, nearly_equal_f64,
};
pub use value::{CellScalar, ListData, MapData, NodeKind, NodeValue};
pub use wire::{BitReader, BitWriter, read_value, write_value};

// The Guid value kind is uuid's type; re-export so downstream code does not
// need a direct uuid dependency.
pub use uuid::Uuid;
