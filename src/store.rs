//! Owns both block arenas and the build-time block-geometry parameters.
//!
//! Kept separate from [`crate::set::Set`] so that the tree-operation
//! functions in `ops.rs`, the proof walker in `proof.rs`, and the auditor in
//! `audit.rs` can all borrow exactly what they need -- the arenas and the
//! geometry -- without also touching the root slot.

use crate::arena::Arena;
use crate::branch::{
    BranchBlock,
    BranchHandle,
    LeafHandle,
};
use crate::leaf::LeafBlock;

pub(crate) struct Store {
    pub(crate) branches: Arena<BranchBlock>,
    pub(crate) leaves: Arena<LeafBlock>,
    /// Number of inline balanced levels in every branch block (`D` in the
    /// module docs); fixed for the lifetime of the set.
    pub(crate) depth: u32,
    /// Capacity of every leaf block, in node cells.
    pub(crate) leaf_units: u16,
}

impl Store {
    pub(crate) fn new(depth: u32, leaf_units: u16) -> Self {
        Self {
            branches: Arena::new(),
            leaves: Arena::new(),
            depth,
            leaf_units,
        }
    }

    pub(crate) fn allocate_branch(&mut self) -> BranchHandle {
        BranchHandle(self.branches.allocate(BranchBlock::new(self.depth)))
    }

    pub(crate) fn allocate_leaf(&mut self) -> LeafHandle {
        LeafHandle(self.leaves.allocate(LeafBlock::new(self.leaf_units)))
    }

    pub(crate) fn free_branch(&mut self, handle: BranchHandle) {
        self.branches.deallocate(handle.0);
    }

    pub(crate) fn free_leaf(&mut self, handle: LeafHandle) {
        self.leaves.deallocate(handle.0);
    }

    pub(crate) fn branch(&self, handle: BranchHandle) -> &BranchBlock {
        self.branches.get(handle.0)
    }

    pub(crate) fn branch_mut(&mut self, handle: BranchHandle) -> &mut BranchBlock {
        self.branches.get_mut(handle.0)
    }

    pub(crate) fn leaf(&self, handle: LeafHandle) -> &LeafBlock {
        self.leaves.get(handle.0)
    }

    pub(crate) fn leaf_mut(&mut self, handle: LeafHandle) -> &mut LeafBlock {
        self.leaves.get_mut(handle.0)
    }

    /// Mutable access to two distinct leaf blocks at once, for migrating a
    /// subtree from one leaf into another.
    pub(crate) fn leaf_pair_mut(&mut self, a: LeafHandle, b: LeafHandle) -> (&mut LeafBlock, &mut LeafBlock) {
        self.leaves.get_pair_mut(a.0, b.0)
    }
}
