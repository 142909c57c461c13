//! tagtree: a slab-backed attribute tree with versioned nodes and delta
//! replication
//!
//! The tree holds structured gameplay state on a server and replicates
//! incremental changes to clients with bandwidth proportional to what
//! actually changed.
//!
//! Key design principles:
//! - Nodes live in a chunked slab and are referenced by generational
//!   handles; the slab's metadata layout *is* the replication baseline.
//! - Three version counters answer "did anything change?" at three
//!   granularities: per-slot data version, per-slot subtree version
//!   (bubbled up the path on every write), and the container-wide pair.
//! - All access goes through [`Accessor`], a cheap path-addressed cursor
//!   that resolves lazily and refuses to touch a destroyed tree.
//!
//! # Quick tour
//!
//! ```
//! use tagtree::Tree;
//!
//! let tree = Tree::new();
//! let root = tree.accessor();
//! root.child_by_key("hp").ensure_set_i32(100);
//!
//! let items = root.child_by_key("items");
//! items.ensure_list();
//! items.list_add().unwrap().override_to_string("potion".to_string());
//!
//! assert_eq!(root.child_by_key("hp").get_i32(), Some(100));
//! assert_eq!(items.list_len(), Some(1));
//! ```
//!
//! Replication pairs [`Tree::write_delta`] on the sender with
//! [`Tree::apply_delta`] on the receiver; the transport shuttles the
//! bytes and the per-peer [`Baseline`] handles.

pub mod accessor;
pub mod container;
pub mod delta;
pub mod export;
pub mod search;
pub mod slab;
pub mod stats;
pub mod text;

// Re-export key types
pub use accessor::{Accessor, MAX_NET_PATH_SEGMENTS, MAX_PATH_DEPTH, PathSeg};
pub use container::{TickHost, Tree};
pub use delta::Baseline;
pub use export::{ExportError, TypedNode};
pub use search::{CompareOp, SearchCondition, SearchParameter};
pub use slab::{AllocStats, MAX_ACTIVE};
pub use stats::ContainerStats;

// Foundation types, re-exported so most users need only this crate.
pub use tagtree_core::{
    BitReader, BitWriter, ClassPath, Color, DateTime, FLOAT_EPSILON, Int64Vec2, Int64Vec3,
    IntVec2, IntVec3, Name, NodeId, NodeKind, NodeValue, ObjectPath, OpReport, OpResult, Rotator,
    Uuid, Vec2, Vec3,
};
