//! Chunked slab allocator
//!
//! Node storage is a growable vector of fixed 64-cell chunks. Each chunk
//! keeps its bookkeeping in a separate `ChunkMeta` block (used bitmask,
//! per-slot generations, the two version counters) because that block
//! is exactly what the replication baseline snapshots: diffing a peer's
//! last-seen state against the live slab is a field-for-field comparison
//! of these metadata blocks, with cell payloads re-fetched only for slots
//! that actually changed.
//!
//! Placement is deterministic on purpose. `allocate` packs the densest
//! chunk first so long-lived trees stay compact; `allocate_at` reproduces
//! the sender's exact `(slot, generation)` layout on the receiver.

use tagtree_core::{NodeId, NodeValue};

pub const CHUNK_SIZE: usize = 64;
pub const CHUNK_SHIFT: u32 = 6;
pub const CHUNK_MASK: u16 = 0x3F;
pub const MAX_CHUNKS: usize = 1024;

/// Hard cap on live nodes; index 0xFFFF is the invalid sentinel.
pub const MAX_ACTIVE: u32 = 65534;

/// Per-chunk bookkeeping. This struct *is* the replication baseline unit:
/// a baseline is a clone of every chunk's metadata, and "chunk unchanged"
/// is plain equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub used_mask: u64,
    pub generations: [u16; CHUNK_SIZE],
    pub data_versions: [i32; CHUNK_SIZE],
    pub subtree_versions: [i32; CHUNK_SIZE],
    pub used_count: u8,
}

impl Default for ChunkMeta {
    fn default() -> Self {
        ChunkMeta {
            used_mask: 0,
            generations: [0; CHUNK_SIZE],
            data_versions: [0; CHUNK_SIZE],
            subtree_versions: [0; CHUNK_SIZE],
            used_count: 0,
        }
    }
}

/// Outcome of deterministic placement into a specific slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocateAtOutcome {
    /// Slot was used with the expected generation; cell kept.
    Exist,
    /// Slot was used with a different generation; cell destroyed and
    /// reconstructed under the new generation.
    Replaced,
    /// Slot was free; now used under the given generation.
    NewOne,
}

struct Chunk {
    cells: Box<[NodeValue; CHUNK_SIZE]>,
    meta: ChunkMeta,
}

impl Chunk {
    fn new() -> Self {
        Chunk {
            cells: Box::new(std::array::from_fn(|_| NodeValue::Empty)),
            meta: ChunkMeta::default(),
        }
    }

    fn has_free_slot(&self) -> bool {
        self.meta.used_count < CHUNK_SIZE as u8
    }

    fn is_used(&self, local: u16) -> bool {
        (local as usize) < CHUNK_SIZE && self.meta.used_mask & (1u64 << local) != 0
    }

    fn allocate_slot(&mut self) -> Option<u16> {
        let free = !self.meta.used_mask;
        if free == 0 {
            return None;
        }
        let local = free.trailing_zeros() as u16;
        self.meta.used_mask |= 1u64 << local;
        self.meta.used_count += 1;
        self.meta.generations[local as usize] = self.meta.generations[local as usize].wrapping_add(1);
        self.meta.data_versions[local as usize] = 0;
        self.meta.subtree_versions[local as usize] = 0;
        self.cells[local as usize] = NodeValue::Empty;
        Some(local)
    }

    fn allocate_slot_at(&mut self, local: u16, generation: u16) -> AllocateAtOutcome {
        let i = local as usize;
        if self.is_used(local) {
            // Touch the data version even when nothing is replaced so
            // receiver-side change detectors fire for rewritten payloads.
            self.meta.data_versions[i] += 1;
            if self.meta.generations[i] == generation {
                return AllocateAtOutcome::Exist;
            }
            self.meta.generations[i] = generation;
            self.cells[i] = NodeValue::Empty;
            AllocateAtOutcome::Replaced
        } else {
            self.meta.used_mask |= 1u64 << local;
            self.meta.used_count += 1;
            self.meta.generations[i] = generation;
            self.meta.data_versions[i] += 1;
            self.cells[i] = NodeValue::Empty;
            AllocateAtOutcome::NewOne
        }
    }

    fn deallocate_slot(&mut self, local: u16, generation: u16) -> bool {
        if !self.is_used(local) || self.meta.generations[local as usize] != generation {
            return false;
        }
        let i = local as usize;
        self.cells[i] = NodeValue::Empty;
        self.meta.used_mask &= !(1u64 << local);
        self.meta.used_count -= 1;
        self.meta.data_versions[i] = 0;
        self.meta.subtree_versions[i] = 0;
        true
    }
}

/// Allocation statistics, cumulative over the allocator's lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocStats {
    pub total_allocated: u32,
    pub total_deallocated: u32,
    pub current_active: u32,
    pub peak_active: u32,
}

/// The slab: all node cells of one container plus their metadata.
pub struct SlabAllocator {
    chunks: Vec<Chunk>,
    stats: AllocStats,
}

impl SlabAllocator {
    pub fn new() -> Self {
        let mut slab = SlabAllocator {
            chunks: Vec::new(),
            stats: AllocStats::default(),
        };
        slab.chunks.push(Chunk::new());
        slab
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
        self.chunks.push(Chunk::new());
        self.stats = AllocStats::default();
    }

    fn split(id: NodeId) -> (usize, u16) {
        ((id.index >> CHUNK_SHIFT) as usize, id.index & CHUNK_MASK)
    }

    /// Allocate a fresh empty cell. Fails (invalid handle) at `MAX_ACTIVE`
    /// live nodes.
    pub fn allocate(&mut self) -> NodeId {
        if self.stats.current_active >= MAX_ACTIVE {
            tracing::error!(cap = MAX_ACTIVE, "slab full, allocation refused");
            return NodeId::INVALID;
        }

        let chunk_index = self.select_or_create_chunk();
        let Some(chunk_index) = chunk_index else {
            return NodeId::INVALID;
        };
        let Some(local) = self.chunks[chunk_index].allocate_slot() else {
            tracing::error!("slab chunk selection produced a full chunk");
            return NodeId::INVALID;
        };

        self.stats.total_allocated += 1;
        self.stats.current_active += 1;
        self.stats.peak_active = self.stats.peak_active.max(self.stats.current_active);

        let index = ((chunk_index as u16) << CHUNK_SHIFT) | local;
        NodeId::new(index, self.chunks[chunk_index].meta.generations[local as usize])
    }

    /// Deterministic placement for the replication path: install the
    /// handle's exact slot and generation, growing chunks as needed.
    ///
    /// Bumps the slot's data version even when the cell already existed
    /// with the same generation, so on a receiver `data_version` counts
    /// "this slot was touched by replication", not semantic writes.
    pub fn allocate_at(&mut self, id: NodeId) -> Option<&mut NodeValue> {
        if !id.is_valid() {
            return None;
        }
        let (chunk_index, local) = Self::split(id);
        if chunk_index >= MAX_CHUNKS {
            tracing::error!(id = %id, "allocate_at out of chunk range");
            return None;
        }
        while self.chunks.len() <= chunk_index {
            self.chunks.push(Chunk::new());
        }

        match self.chunks[chunk_index].allocate_slot_at(local, id.generation) {
            AllocateAtOutcome::Exist => {}
            AllocateAtOutcome::NewOne => {
                self.stats.total_allocated += 1;
                self.stats.current_active += 1;
                self.stats.peak_active = self.stats.peak_active.max(self.stats.current_active);
            }
            AllocateAtOutcome::Replaced => {
                self.stats.total_allocated += 1;
            }
        }
        Some(&mut self.chunks[chunk_index].cells[local as usize])
    }

    /// Free a cell; the handle's generation must match.
    pub fn deallocate(&mut self, id: NodeId) -> bool {
        if !id.is_valid() {
            return false;
        }
        let (chunk_index, local) = Self::split(id);
        if chunk_index >= self.chunks.len() {
            return false;
        }
        if self.chunks[chunk_index].deallocate_slot(local, id.generation) {
            self.stats.total_deallocated += 1;
            self.stats.current_active -= 1;
            true
        } else {
            false
        }
    }

    fn slot(&self, id: NodeId) -> Option<(usize, usize)> {
        if !id.is_valid() {
            return None;
        }
        let (chunk_index, local) = Self::split(id);
        let chunk = self.chunks.get(chunk_index)?;
        if !chunk.is_used(local) || chunk.meta.generations[local as usize] != id.generation {
            return None;
        }
        Some((chunk_index, local as usize))
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeValue> {
        let (c, l) = self.slot(id)?;
        Some(&self.chunks[c].cells[l])
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeValue> {
        let (c, l) = self.slot(id)?;
        Some(&mut self.chunks[c].cells[l])
    }

    pub fn data_version(&self, id: NodeId) -> Option<i32> {
        let (c, l) = self.slot(id)?;
        Some(self.chunks[c].meta.data_versions[l])
    }

    pub fn bump_data_version(&mut self, id: NodeId) -> bool {
        match self.slot(id) {
            Some((c, l)) => {
                self.chunks[c].meta.data_versions[l] += 1;
                true
            }
            None => false,
        }
    }

    pub fn subtree_version(&self, id: NodeId) -> Option<i32> {
        let (c, l) = self.slot(id)?;
        Some(self.chunks[c].meta.subtree_versions[l])
    }

    pub fn inc_subtree_version(&mut self, id: NodeId) {
        if let Some((c, l)) = self.slot(id) {
            self.chunks[c].meta.subtree_versions[l] += 1;
        }
    }

    /// Visit every allocated `(handle, cell)` pair in chunk-then-slot
    /// order. This is the canonical layout order the full dump relies on.
    pub fn for_each(&self, mut f: impl FnMut(NodeId, &NodeValue)) {
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            if chunk.meta.used_count == 0 {
                continue;
            }
            let mut mask = chunk.meta.used_mask;
            while mask != 0 {
                let local = mask.trailing_zeros() as u16;
                let index = ((chunk_index as u16) << CHUNK_SHIFT) | local;
                let id = NodeId::new(index, chunk.meta.generations[local as usize]);
                f(id, &chunk.cells[local as usize]);
                mask &= mask - 1;
            }
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_meta(&self, chunk_index: usize) -> Option<&ChunkMeta> {
        self.chunks.get(chunk_index).map(|c| &c.meta)
    }

    pub fn stats(&self) -> AllocStats {
        self.stats
    }

    pub fn current_active(&self) -> u32 {
        self.stats.current_active
    }

    pub fn free_remaining(&self) -> u32 {
        65535 - self.stats.current_active
    }

    pub fn memory_usage(&self) -> usize {
        self.chunks.len() * (std::mem::size_of::<Chunk>() + CHUNK_SIZE * std::mem::size_of::<NodeValue>())
    }

    /// Densest chunk with a free slot wins; a new chunk only when every
    /// existing one is full.
    fn select_or_create_chunk(&mut self) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if !chunk.has_free_slot() {
                continue;
            }
            let used = chunk.meta.used_count;
            match best {
                Some((_, best_used)) if best_used >= used => {}
                _ => best = Some((i, used)),
            }
        }
        if let Some((i, _)) = best {
            return Some(i);
        }
        if self.chunks.len() >= MAX_CHUNKS {
            tracing::error!("slab chunk limit reached");
            return None;
        }
        self.chunks.push(Chunk::new());
        Some(self.chunks.len() - 1)
    }
}

impl Default for SlabAllocator {
    fn default() -> Self {
        SlabAllocator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagtree_core::OpResult;

    #[test]
    fn allocate_then_get_then_free() {
        let mut slab = SlabAllocator::new();
        let id = slab.allocate();
        assert!(id.is_valid());
        assert_eq!(id.generation, 1, "first use of a slot is generation 1");
        assert!(slab.get(id).unwrap().is_empty_kind());
        assert_eq!(slab.data_version(id), Some(0));
        assert_eq!(slab.subtree_version(id), Some(0));

        assert!(slab.deallocate(id));
        assert!(slab.get(id).is_none());
        assert!(!slab.deallocate(id), "double free is refused");
    }

    #[test]
    fn generation_increments_on_reuse() {
        let mut slab = SlabAllocator::new();
        let a = slab.allocate();
        slab.deallocate(a);
        let b = slab.allocate();
        assert_eq!(a.index, b.index, "lowest free slot is reused");
        assert_eq!(b.generation, a.generation + 1);
        assert!(slab.get(a).is_none(), "stale handle no longer resolves");
        assert!(slab.get(b).is_some());
    }

    #[test]
    fn stale_generation_is_rejected() {
        let mut slab = SlabAllocator::new();
        let id = slab.allocate();
        let stale = NodeId::new(id.index, id.generation.wrapping_add(1));
        assert!(slab.get(stale).is_none());
        assert!(!slab.deallocate(stale));
        assert!(slab.get(id).is_some());
    }

    #[test]
    fn densest_chunk_preferred() {
        let mut slab = SlabAllocator::new();
        // Fill chunk 0 completely so chunk 1 appears.
        let ids: Vec<NodeId> = (0..CHUNK_SIZE + 1).map(|_| slab.allocate()).collect();
        assert_eq!(slab.chunk_count(), 2);
        // Free one slot in chunk 0: chunk 0 is denser than chunk 1, so the
        // next allocation lands back in chunk 0.
        slab.deallocate(ids[10]);
        let next = slab.allocate();
        assert_eq!((next.index >> CHUNK_SHIFT), 0);
        assert_eq!(next.index & CHUNK_MASK, 10);
    }

    #[test]
    fn allocate_at_reproduces_layout() {
        let mut slab = SlabAllocator::new();
        let id = NodeId::new(3 * CHUNK_SIZE as u16 + 5, 7);
        {
            let cell = slab.allocate_at(id).unwrap();
            *cell = NodeValue::Int32(9);
        }
        assert_eq!(slab.chunk_count(), 4, "chunks grow to cover the slot");
        assert_eq!(slab.get(id).unwrap().get::<i32>(), Some(9));
        assert_eq!(slab.data_version(id), Some(1));
        assert_eq!(slab.current_active(), 1);

        // Same generation: cell survives, data version is touched anyway.
        slab.allocate_at(id).unwrap();
        assert_eq!(slab.data_version(id), Some(2));
        assert_eq!(slab.get(id).unwrap().get::<i32>(), Some(9));
        assert_eq!(slab.current_active(), 1);

        // Different generation: cell is rebuilt fresh.
        let newer = NodeId::new(id.index, 8);
        slab.allocate_at(newer).unwrap();
        assert!(slab.get(newer).unwrap().is_empty_kind());
        assert!(slab.get(id).is_none());
        assert_eq!(slab.current_active(), 1);
    }

    #[test]
    fn for_each_walks_chunk_then_slot_order() {
        let mut slab = SlabAllocator::new();
        let a = slab.allocate();
        let b = slab.allocate();
        let far = NodeId::new(2 * CHUNK_SIZE as u16, 1);
        slab.allocate_at(far).unwrap();

        let mut seen = Vec::new();
        slab.for_each(|id, _| seen.push(id.index));
        assert_eq!(seen, vec![a.index, b.index, far.index]);
    }

    #[test]
    fn versions_reset_on_reuse() {
        let mut slab = SlabAllocator::new();
        let id = slab.allocate();
        slab.bump_data_version(id);
        slab.inc_subtree_version(id);
        assert_eq!(slab.data_version(id), Some(1));
        assert_eq!(slab.subtree_version(id), Some(1));
        slab.deallocate(id);
        let id2 = slab.allocate();
        assert_eq!(slab.data_version(id2), Some(0));
        assert_eq!(slab.subtree_version(id2), Some(0));
    }

    #[test]
    fn cell_write_flows_through_get_mut() {
        let mut slab = SlabAllocator::new();
        let id = slab.allocate();
        assert_eq!(slab.get_mut(id).unwrap().try_set(5i32), OpResult::NodeTypeMismatch);
        assert_eq!(slab.get_mut(id).unwrap().override_to(5i32), OpResult::Success);
        assert_eq!(slab.get(id).unwrap().get::<i32>(), Some(5));
    }
}
