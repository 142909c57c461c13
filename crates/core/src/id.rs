//! Generational node handles
//!
//! A `NodeId` is the only way to refer to a node: a 16-bit slot index into
//! the slab plus a 16-bit generation. The generation is bumped every time a
//! slot is (re)used, so a handle held across a release/allocate cycle of the
//! same slot stops resolving instead of silently pointing at the new node.
//!
//! The index `0xFFFF` is reserved as the invalid sentinel; a default
//! `NodeId` is invalid.

use std::fmt;

/// Slot index reserved for "no node".
pub const INVALID_INDEX: u16 = 0xFFFF;

/// 32-bit node handle: slab slot index + generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub index: u16,
    pub generation: u16,
}

impl NodeId {
    pub const INVALID: NodeId = NodeId {
        index: INVALID_INDEX,
        generation: 0,
    };

    pub fn new(index: u16, generation: u16) -> Self {
        NodeId { index, generation }
    }

    pub fn is_valid(self) -> bool {
        self.index != INVALID_INDEX
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::INVALID
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId[{}:{}]", self.index, self.generation)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_invalid() {
        assert!(!NodeId::default().is_valid());
        assert_eq!(NodeId::default(), NodeId::INVALID);
    }

    #[test]
    fn equality_is_componentwise() {
        assert_eq!(NodeId::new(3, 1), NodeId::new(3, 1));
        assert_ne!(NodeId::new(3, 1), NodeId::new(3, 2));
        assert_ne!(NodeId::new(3, 1), NodeId::new(4, 1));
    }
}
