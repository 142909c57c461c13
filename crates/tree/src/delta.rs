//! Delta replication and container serialization
//!
//! The sender keeps, per peer, a `Baseline`: the container data version
//! plus a copy of every chunk's metadata. Emitting a delta is a scan of
//! live chunk metadata against that snapshot; no per-node dirty lists,
//! no tree walk. Cell payloads are fetched from the live slab only for
//! slots that actually differ.
//!
//! Wire shape per tick:
//! - full-sync bit set: the whole container dump follows (first contact)
//! - full-sync bit clear: both container counters, then ops. Removes
//!   (streamed inline as the scan finds them), adds, updates, terminator.
//!   Adds precede updates so freshly-parented handles resolve when an
//!   update payload references them.
//!
//! The receiver applies ops through `allocate_at`, which reproduces the
//! sender's slab layout exactly; that layout equivalence is what lets the
//! next baseline diff work at all.

use tagtree_core::{BitReader, BitWriter, NodeId, read_value, write_value};

use crate::container::{Container, Tree};
use crate::slab::{CHUNK_SHIFT, ChunkMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeltaOp {
    Add = 0,
    Update = 1,
    Remove = 2,
    EndOfDeltas = 3,
}

impl DeltaOp {
    fn from_u8(tag: u8) -> Option<DeltaOp> {
        Some(match tag {
            0 => DeltaOp::Add,
            1 => DeltaOp::Update,
            2 => DeltaOp::Remove,
            3 => DeltaOp::EndOfDeltas,
            _ => return None,
        })
    }
}

/// Per-peer snapshot of slab metadata. Opaque to the transport: it hands
/// the previous baseline in and stores the returned one for the next
/// tick, in order.
#[derive(Debug, Clone)]
pub struct Baseline {
    container_version: i32,
    chunks: Vec<ChunkMeta>,
}

impl Baseline {
    pub(crate) fn snapshot(cont: &Container) -> Baseline {
        let chunks = (0..cont.allocator.chunk_count())
            .filter_map(|i| cont.allocator.chunk_meta(i).cloned())
            .collect();
        Baseline {
            container_version: cont.data_version,
            chunks,
        }
    }

    pub fn container_version(&self) -> i32 {
        self.container_version
    }

    /// "Nothing to send" test between two baselines.
    pub fn is_equal(&self, other: &Baseline) -> bool {
        self.container_version == other.container_version
    }
}

/// Full container dump. In network mode the replication flag and both
/// container counters lead; the disk form omits them.
fn write_container(cont: &Container, w: &mut BitWriter, network: bool) {
    if network {
        w.write_bit(cont.replicated);
        w.write_i32_le(cont.data_version);
        w.write_i32_le(cont.struct_version);
    }
    w.write_node_id(cont.root_id);
    w.write_u32_le(cont.allocator.current_active());
    cont.allocator.for_each(|id, cell| {
        w.write_node_id(id);
        write_value(w, cell);
    });
}

/// Rebuild a container from a dump. `allocate_at` preserves the sender's
/// deterministic slot layout. On a disk load both counters are bumped
/// once so readers see a fresh epoch.
fn read_container(cont: &mut Container, r: &mut BitReader, network: bool) -> bool {
    if network {
        cont.replicated = r.read_bit();
        cont.data_version = r.read_i32_le();
        cont.struct_version = r.read_i32_le();
    }
    cont.clear();
    cont.root_id = r.read_node_id();
    let count = r.read_u32_le();
    for _ in 0..count {
        let id = r.read_node_id();
        if r.is_error() {
            return false;
        }
        match cont.allocator.allocate_at(id) {
            Some(cell) => *cell = read_value(r),
            None => {
                tracing::error!(id = %id, "container load: allocate_at failed, stream corrupt");
                r.set_error();
                return false;
            }
        }
        if r.is_error() {
            return false;
        }
    }
    if !network {
        cont.update_data_and_struct_version();
    }
    !r.is_error()
}

fn write_delta_inner(
    cont: &mut Container,
    w: &mut BitWriter,
    baseline: Option<&Baseline>,
) -> Option<Baseline> {
    let Some(baseline) = baseline else {
        // First contact. An untouched container has nothing worth
        // initializing on the peer yet.
        if cont.data_version == 0 && cont.struct_version == 0 {
            return None;
        }
        cont.replicated = true;
        w.write_bit(true);
        write_container(cont, w, true);
        let new_baseline = Baseline::snapshot(cont);
        tracing::debug!(bytes = w.byte_len(), "sent initial full sync");
        return Some(new_baseline);
    };

    if baseline.container_version == cont.data_version {
        return None;
    }

    w.write_bit(false);
    w.write_i32_le(cont.data_version);
    w.write_i32_le(cont.struct_version);

    let chunk_count = cont.allocator.chunk_count().max(baseline.chunks.len());
    let mut added: Vec<NodeId> = Vec::new();
    let mut modified: Vec<NodeId> = Vec::new();

    for chunk_index in 0..chunk_count {
        let live = cont.allocator.chunk_meta(chunk_index);
        let base = baseline.chunks.get(chunk_index);

        if let (Some(live_meta), Some(base_meta)) = (live, base) {
            if live_meta == base_meta {
                continue;
            }
        }
        let live_mask = live.map(|m| m.used_mask).unwrap_or(0);
        let base_mask = base.map(|m| m.used_mask).unwrap_or(0);
        let mut combined = live_mask | base_mask;

        while combined != 0 {
            let local = combined.trailing_zeros() as usize;
            let bit = 1u64 << local;
            combined &= !bit;

            let index = ((chunk_index as u16) << CHUNK_SHIFT) | local as u16;
            let in_live = live_mask & bit != 0;
            let in_base = base_mask & bit != 0;

            if in_live && !in_base {
                let meta = live.expect("in_live implies live meta");
                added.push(NodeId::new(index, meta.generations[local]));
            } else if !in_live && in_base {
                let meta = base.expect("in_base implies base meta");
                w.write_u8(DeltaOp::Remove as u8);
                w.write_node_id(NodeId::new(index, meta.generations[local]));
            } else if in_live && in_base {
                let live_meta = live.expect("in_live implies live meta");
                let base_meta = base.expect("in_base implies base meta");
                if live_meta.data_versions[local] != base_meta.data_versions[local]
                    || live_meta.generations[local] != base_meta.generations[local]
                {
                    modified.push(NodeId::new(index, live_meta.generations[local]));
                }
            }
        }
    }

    for id in added {
        if let Some(cell) = cont.allocator.get(id) {
            w.write_u8(DeltaOp::Add as u8);
            w.write_node_id(id);
            write_value(w, cell);
        }
    }
    for id in modified {
        if let Some(cell) = cont.allocator.get(id) {
            w.write_u8(DeltaOp::Update as u8);
            w.write_node_id(id);
            write_value(w, cell);
        }
    }
    w.write_u8(DeltaOp::EndOfDeltas as u8);

    Some(Baseline::snapshot(cont))
}

fn apply_delta_inner(cont: &mut Container, r: &mut BitReader) -> bool {
    // Receiving side: replicated writes must not re-dirty the container.
    cont.writes_bump_versions = false;

    if r.read_bit() {
        cont.clear();
        return read_container(cont, r, true);
    }

    cont.frame_bubbled.clear();
    let pre_struct_version = cont.struct_version;
    let mut rebuilt = false;

    cont.data_version = r.read_i32_le();
    cont.struct_version = r.read_i32_le();
    if r.is_error() {
        return false;
    }
    if pre_struct_version != cont.struct_version {
        // Structure changed: parents must be mapped before ops that
        // reference nodes about to disappear are processed.
        cont.rebuild_all_parents();
        rebuilt = true;
    }

    while !r.at_end() && !r.is_error() {
        let tag = r.read_u8();
        let Some(op) = DeltaOp::from_u8(tag) else {
            tracing::error!(tag, "invalid delta op received");
            r.set_error();
            return false;
        };
        if op == DeltaOp::EndOfDeltas {
            break;
        }
        let id = r.read_node_id();
        if r.is_error() {
            return false;
        }

        match op {
            DeltaOp::EndOfDeltas => break,
            DeltaOp::Remove => {
                cont.bubble_subtree_version_for_id(id);
                cont.release_node(id);
            }
            DeltaOp::Add | DeltaOp::Update => {
                if op == DeltaOp::Add && !rebuilt && pre_struct_version != cont.struct_version {
                    cont.rebuild_all_parents();
                    rebuilt = true;
                }
                let installed = match cont.allocator.allocate_at(id) {
                    Some(cell) => {
                        *cell = read_value(r);
                        true
                    }
                    None => false,
                };
                if !installed {
                    tracing::error!(id = %id, "delta apply: allocate_at failed");
                    r.set_error();
                    return false;
                }
                if r.is_error() {
                    return false;
                }
                cont.bubble_subtree_version_for_id(id);
            }
        }
    }

    !r.is_error()
}

impl Tree {
    /// Sender side of a replication tick. `baseline` is this peer's last
    /// acknowledged snapshot (`None` on first contact). Returns the new
    /// baseline when something was written, `None` when the peer is
    /// already current.
    pub fn write_delta(&self, w: &mut BitWriter, baseline: Option<&Baseline>) -> Option<Baseline> {
        let mut cont = self.inner().borrow_mut();
        write_delta_inner(&mut cont, w, baseline)
    }

    /// Receiver side of a replication tick. Returns false and flags the
    /// reader on a corrupt stream; the container stays internally
    /// consistent (possibly stale) either way.
    pub fn apply_delta(&self, r: &mut BitReader) -> bool {
        let mut cont = self.inner().borrow_mut();
        apply_delta_inner(&mut cont, r)
    }

    /// Snapshot of the current state, usable as a baseline for
    /// `write_delta` equality checks and tests.
    pub fn baseline(&self) -> Baseline {
        Baseline::snapshot(&self.inner().borrow())
    }

    /// Disk form of the container: the full dump without the replication
    /// header.
    pub fn save_bytes(&self) -> Vec<u8> {
        let cont = self.inner().borrow();
        let mut w = BitWriter::new();
        write_container(&cont, &mut w, false);
        w.finish()
    }

    /// Rebuild from `save_bytes` output. Bumps both counters once so
    /// change detectors treat the loaded state as a fresh epoch.
    pub fn load_bytes(&self, bytes: &[u8]) -> bool {
        let mut cont = self.inner().borrow_mut();
        let mut r = BitReader::new(bytes);
        read_container(&mut cont, &mut r, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_container_sends_nothing() {
        let tree = Tree::new();
        let mut w = BitWriter::new();
        assert!(tree.write_delta(&mut w, None).is_none());
        assert_eq!(w.byte_len(), 0);
    }

    #[test]
    fn equal_baseline_sends_nothing() {
        let tree = Tree::new();
        tree.accessor().child_by_key("hp").ensure_set_i32(1);
        let mut w = BitWriter::new();
        let baseline = tree.write_delta(&mut w, None).expect("initial sync");
        let mut w2 = BitWriter::new();
        assert!(tree.write_delta(&mut w2, Some(&baseline)).is_none());
        assert_eq!(w2.byte_len(), 0);
    }

    #[test]
    fn baseline_equality_is_container_version_only() {
        let tree = Tree::new();
        tree.accessor().child_by_key("hp").ensure_set_i32(1);
        let a = tree.baseline();
        let b = tree.baseline();
        assert!(a.is_equal(&b));
        tree.accessor().child_by_key("hp").try_set_i32(2);
        let c = tree.baseline();
        assert!(!a.is_equal(&c));
    }

    #[test]
    fn corrupt_op_stream_reports_failure() {
        let sender = Tree::new();
        sender.accessor().child_by_key("hp").ensure_set_i32(1);

        let receiver = Tree::new();
        // Hand-craft a non-full-sync frame with a bogus op code.
        let mut w = BitWriter::new();
        w.write_bit(false);
        w.write_i32_le(5);
        w.write_i32_le(5);
        w.write_u8(200);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert!(!receiver.apply_delta(&mut r));
        assert!(r.is_error());
    }

    #[test]
    fn disk_round_trip_bumps_epoch() {
        let tree = Tree::new();
        tree.accessor().child_by_key("hp").ensure_set_i32(42);
        let bytes = tree.save_bytes();

        let loaded = Tree::new();
        assert!(loaded.load_bytes(&bytes));
        assert_eq!(loaded.accessor().child_by_key("hp").get_i32(), Some(42));
        assert_eq!(loaded.node_count(), tree.node_count());
        assert_eq!(loaded.data_version(), 1, "load is one fresh epoch");
        assert_eq!(loaded.struct_version(), 1);
    }
}
