//! Stable numeric identities for syntax tree nodes.
//!
//! Every declaration, statement and expression gets a [`NodeId`] when it is
//! parsed. The driver threads a single [`NodeIdGen`] through the parse of all
//! sources in registry order, so ids are unique across a compile run and
//! stable for a fixed registration sequence. Ordered containers keyed by
//! `NodeId` are what make generated code byte-identical across runs.

use std::fmt;

/// Identity of a syntax tree node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The raw numeric value.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic [`NodeId`] allocator.
///
/// Ids start at 1 so that 0 can stand for "no function" in generated
/// dispatch code.
#[derive(Debug, Clone)]
pub struct NodeIdGen {
    next: u32,
}

impl NodeIdGen {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next id.
    #[inline]
    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next - 1
    }
}

impl Default for NodeIdGen {
    fn default() -> Self {
        Self::new()
    }
}
