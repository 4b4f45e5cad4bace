//! Leaf blocks: a fixed-capacity arena of node cells linked into its own
//! small patricia tree, with a free list threading the vacant cells.
//!
//! A leaf block plays the same structural role as a branch block's inline
//! nodes, but its nodes are not laid out in a balanced array -- they are
//! allocated one at a time from the free list and linked by cell index, so a
//! leaf can hold a deep, unbalanced tree in a small fixed footprint. `pos`
//! below always refers to a cell index inside one particular leaf block; it
//! is meaningless outside of that block.

use crate::hash::{
    self,
    bit_at,
    debug_check_pair,
    hash_pair,
    pack,
    Digest,
    Tag,
    BLANK,
};

/// One side of a node: its tag and (for `TERMINAL`/`MIDDLE`/`LAZY`) its
/// payload.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Slot {
    pub(crate) tag: Tag,
    pub(crate) payload: Digest,
}

impl Slot {
    pub(crate) const EMPTY: Slot = Slot {
        tag: Tag::Empty,
        payload: BLANK,
    };

    pub(crate) fn terminal(payload: Digest) -> Slot {
        Slot {
            tag: Tag::Terminal,
            payload,
        }
    }
}

/// A used cell: a node of the leaf's internal tree. `left_child`/`right_child`
/// are only meaningful when the corresponding slot is `MIDDLE` or `LAZY`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LeafNode {
    pub(crate) left: Slot,
    pub(crate) right: Slot,
    pub(crate) left_child: Option<u16>,
    pub(crate) right_child: Option<u16>,
}

#[derive(Clone, Copy, Debug)]
enum Cell {
    Free { next: Option<u16> },
    Used(LeafNode),
}

/// Outcome of adding a value into an existing leaf subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AddResult {
    Invalidating,
    Done,
    Full,
}

/// Outcome of removing a value from a leaf subtree.
#[derive(Clone, Copy, Debug)]
pub(crate) enum RemoveResult {
    Done,
    Invalidating,
    OneLeft(Digest),
    Fragile,
}

pub(crate) struct LeafBlock {
    capacity: u16,
    first_free: Option<u16>,
    pub(crate) num_inputs: u16,
    cells: Vec<Cell>,
}

impl LeafBlock {
    pub(crate) fn new(capacity: u16) -> Self {
        assert!(capacity >= 1, "leaf_units must be at least 1");
        let mut cells = Vec::with_capacity(capacity as usize);
        for i in 0..capacity {
            let next = if i + 1 == capacity { None } else { Some(i + 1) };
            cells.push(Cell::Free { next });
        }
        Self {
            capacity,
            first_free: Some(0),
            num_inputs: 0,
            cells,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.first_free.is_none()
    }

    fn used(&self, pos: u16) -> &LeafNode {
        match &self.cells[pos as usize] {
            Cell::Used(node) => node,
            Cell::Free { .. } => panic!("leaf cell {pos} is free, not a node"),
        }
    }

    fn used_mut(&mut self, pos: u16) -> &mut LeafNode {
        match &mut self.cells[pos as usize] {
            Cell::Used(node) => node,
            Cell::Free { .. } => panic!("leaf cell {pos} is free, not a node"),
        }
    }

    pub(crate) fn node(&self, pos: u16) -> &LeafNode {
        self.used(pos)
    }

    fn pop_free(&mut self) -> Option<u16> {
        let pos = self.first_free?;
        let next = match self.cells[pos as usize] {
            Cell::Free { next } => next,
            Cell::Used(_) => unreachable!("free list points at a used cell"),
        };
        self.first_free = next;
        Some(pos)
    }

    fn push_free(&mut self, pos: u16) {
        self.cells[pos as usize] = Cell::Free {
            next: self.first_free,
        };
        self.first_free = Some(pos);
    }

    /// Recursively frees a node and everything beneath it, used when a
    /// migrated subtree is deleted from its old leaf.
    pub(crate) fn delete_subtree(&mut self, pos: u16) {
        let node = *self.used(pos);
        if matches!(node.left.tag, Tag::Middle | Tag::Lazy) {
            self.delete_subtree(node.left_child.expect("middle/lazy slot needs a child"));
        }
        if matches!(node.right.tag, Tag::Middle | Tag::Lazy) {
            self.delete_subtree(node.right_child.expect("middle/lazy slot needs a child"));
        }
        self.push_free(pos);
    }

    /// Inserts a freshly-sorted group of 2 or 3 terminal values starting at
    /// a brand new cell. Mirrors `_insert_leaf`.
    pub(crate) fn insert(&mut self, things: &mut [Digest], depth: u32) -> Result<u16, ()> {
        assert!(things.len() == 2 || things.len() == 3);
        let pos = self.pop_free().ok_or(())?;
        things.sort();
        if things.len() == 2 {
            self.cells[pos as usize] = Cell::Used(LeafNode {
                left: Slot::terminal(things[0]),
                right: Slot::terminal(things[1]),
                left_child: None,
                right_child: None,
            });
            return Ok(pos);
        }
        let bits = [
            bit_at(&things[0], depth),
            bit_at(&things[1], depth),
            bit_at(&things[2], depth),
        ];
        let node = if bits[0] == bits[1] && bits[1] == bits[2] {
            match self.insert(things, depth + 1) {
                Err(()) => {
                    self.push_free(pos);
                    return Err(());
                }
                Ok(child) if bits[0] == 0 => LeafNode {
                    left: Slot {
                        tag: Tag::Lazy,
                        payload: BLANK,
                    },
                    right: Slot::EMPTY,
                    left_child: Some(child),
                    right_child: None,
                },
                Ok(child) => LeafNode {
                    left: Slot::EMPTY,
                    right: Slot {
                        tag: Tag::Lazy,
                        payload: BLANK,
                    },
                    left_child: None,
                    right_child: Some(child),
                },
            }
        } else if bits[0] == bits[1] {
            let mut pair = [things[0], things[1]];
            match self.insert(&mut pair, depth + 1) {
                Err(()) => {
                    self.push_free(pos);
                    return Err(());
                }
                Ok(child) => LeafNode {
                    left: Slot {
                        tag: Tag::Lazy,
                        payload: BLANK,
                    },
                    right: Slot::terminal(things[2]),
                    left_child: Some(child),
                    right_child: None,
                },
            }
        } else {
            let mut pair = [things[1], things[2]];
            match self.insert(&mut pair, depth + 1) {
                Err(()) => {
                    self.push_free(pos);
                    return Err(());
                }
                Ok(child) => LeafNode {
                    left: Slot::terminal(things[0]),
                    right: Slot {
                        tag: Tag::Lazy,
                        payload: BLANK,
                    },
                    left_child: None,
                    right_child: Some(child),
                },
            }
        };
        self.cells[pos as usize] = Cell::Used(node);
        Ok(pos)
    }

    /// Adds a single value into the subtree rooted at `pos`. Mirrors
    /// `_add_to_leaf_inner`.
    pub(crate) fn add_inner(&mut self, toadd: &Digest, pos: u16, depth: u32) -> AddResult {
        if bit_at(toadd, depth) == 0 {
            let node = *self.used(pos);
            match node.left.tag {
                Tag::Empty => {
                    self.used_mut(pos).left = Slot::terminal(*toadd);
                    AddResult::Invalidating
                }
                Tag::Terminal => {
                    let old0 = node.left.payload;
                    if old0 == *toadd {
                        return AddResult::Done;
                    }
                    if matches!(node.right.tag, Tag::Terminal) {
                        let old1 = node.right.payload;
                        if old1 == *toadd {
                            return AddResult::Done;
                        }
                        let saved_next = self.first_free;
                        self.push_free(pos);
                        let mut things = [*toadd, old0, old1];
                        match self.insert(&mut things, depth) {
                            Err(()) => {
                                self.first_free = saved_next;
                                self.cells[pos as usize] = Cell::Used(LeafNode {
                                    left: Slot::terminal(old0),
                                    right: Slot::terminal(old1),
                                    left_child: None,
                                    right_child: None,
                                });
                                AddResult::Full
                            }
                            Ok(new_pos) => {
                                debug_assert_eq!(new_pos, pos, "insert must reuse the freed cell");
                                AddResult::Invalidating
                            }
                        }
                    } else {
                        let mut pair = [*toadd, old0];
                        match self.insert(&mut pair, depth + 1) {
                            Err(()) => AddResult::Full,
                            Ok(child) => {
                                let was_lazy = matches!(node.right.tag, Tag::Lazy);
                                let node = self.used_mut(pos);
                                node.left = Slot {
                                    tag: Tag::Lazy,
                                    payload: BLANK,
                                };
                                node.left_child = Some(child);
                                if was_lazy {
                                    AddResult::Done
                                } else {
                                    AddResult::Invalidating
                                }
                            }
                        }
                    }
                }
                Tag::Middle | Tag::Lazy => {
                    let child = node.left_child.expect("middle/lazy slot needs a child");
                    let r = self.add_inner(toadd, child, depth + 1);
                    match r {
                        AddResult::Invalidating => {
                            if matches!(node.left.tag, Tag::Middle) {
                                self.used_mut(pos).left.tag = Tag::Lazy;
                                AddResult::Invalidating
                            } else {
                                AddResult::Done
                            }
                        }
                        other => other,
                    }
                }
                Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
            }
        } else {
            let node = *self.used(pos);
            match node.right.tag {
                Tag::Empty => {
                    self.used_mut(pos).right = Slot::terminal(*toadd);
                    AddResult::Invalidating
                }
                Tag::Terminal => {
                    let old1 = node.right.payload;
                    if old1 == *toadd {
                        return AddResult::Done;
                    }
                    if matches!(node.left.tag, Tag::Terminal) {
                        let old0 = node.left.payload;
                        if old0 == *toadd {
                            return AddResult::Done;
                        }
                        let saved_next = self.first_free;
                        self.push_free(pos);
                        let mut things = [*toadd, old0, old1];
                        match self.insert(&mut things, depth) {
                            Err(()) => {
                                self.first_free = saved_next;
                                self.cells[pos as usize] = Cell::Used(LeafNode {
                                    left: Slot::terminal(old0),
                                    right: Slot::terminal(old1),
                                    left_child: None,
                                    right_child: None,
                                });
                                AddResult::Full
                            }
                            Ok(new_pos) => {
                                debug_assert_eq!(new_pos, pos, "insert must reuse the freed cell");
                                AddResult::Invalidating
                            }
                        }
                    } else {
                        let mut pair = [*toadd, old1];
                        match self.insert(&mut pair, depth + 1) {
                            Err(()) => AddResult::Full,
                            Ok(child) => {
                                let was_lazy = matches!(node.left.tag, Tag::Lazy);
                                let node = self.used_mut(pos);
                                node.right = Slot {
                                    tag: Tag::Lazy,
                                    payload: BLANK,
                                };
                                node.right_child = Some(child);
                                if was_lazy {
                                    AddResult::Done
                                } else {
                                    AddResult::Invalidating
                                }
                            }
                        }
                    }
                }
                Tag::Middle | Tag::Lazy => {
                    let child = node.right_child.expect("middle/lazy slot needs a child");
                    let r = self.add_inner(toadd, child, depth + 1);
                    match r {
                        AddResult::Invalidating => {
                            if matches!(node.right.tag, Tag::Middle) {
                                self.used_mut(pos).right.tag = Tag::Lazy;
                                AddResult::Invalidating
                            } else {
                                AddResult::Done
                            }
                        }
                        other => other,
                    }
                }
                Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
            }
        }
    }

    /// Removes `toremove` from the subtree rooted at `pos`. Mirrors
    /// `_remove_leaf_inner`.
    pub(crate) fn remove_inner(&mut self, toremove: &Digest, pos: u16, depth: u32) -> RemoveResult {
        if bit_at(toremove, depth) == 0 {
            let node = *self.used(pos);
            match node.left.tag {
                Tag::Empty => RemoveResult::Done,
                Tag::Terminal => {
                    if node.left.payload == *toremove {
                        if matches!(node.right.tag, Tag::Terminal) {
                            let survivor = node.right.payload;
                            self.push_free(pos);
                            RemoveResult::OneLeft(survivor)
                        } else {
                            self.used_mut(pos).left = Slot::EMPTY;
                            RemoveResult::Fragile
                        }
                    } else if node.right.payload == *toremove && matches!(node.right.tag, Tag::Terminal) {
                        let survivor = node.left.payload;
                        self.push_free(pos);
                        RemoveResult::OneLeft(survivor)
                    } else {
                        RemoveResult::Done
                    }
                }
                Tag::Middle | Tag::Lazy => {
                    let child = node.left_child.expect("middle/lazy slot needs a child");
                    let r = self.remove_inner(toremove, child, depth + 1);
                    match r {
                        RemoveResult::Done => RemoveResult::Done,
                        RemoveResult::Invalidating => {
                            if matches!(node.left.tag, Tag::Middle) {
                                self.used_mut(pos).left.tag = Tag::Lazy;
                                if !matches!(node.right.tag, Tag::Lazy) {
                                    return RemoveResult::Invalidating;
                                }
                            }
                            RemoveResult::Done
                        }
                        RemoveResult::OneLeft(val) => {
                            let was_lazy_l = matches!(node.left.tag, Tag::Lazy);
                            let was_lazy_r = matches!(node.right.tag, Tag::Lazy);
                            let n = self.used_mut(pos);
                            n.left = Slot::terminal(val);
                            n.left_child = None;
                            if matches!(n.right.tag, Tag::Terminal) {
                                RemoveResult::Fragile
                            } else if !was_lazy_l && !was_lazy_r {
                                RemoveResult::Invalidating
                            } else {
                                RemoveResult::Done
                            }
                        }
                        RemoveResult::Fragile => {
                            if matches!(node.right.tag, Tag::Empty) {
                                if !matches!(node.left.tag, Tag::Lazy) {
                                    self.used_mut(pos).left.tag = Tag::Lazy;
                                }
                                return RemoveResult::Fragile;
                            }
                            self.catch(child);
                            let was_lazy_l = matches!(node.left.tag, Tag::Lazy);
                            if was_lazy_l {
                                return RemoveResult::Done;
                            }
                            self.used_mut(pos).left.tag = Tag::Lazy;
                            if matches!(node.right.tag, Tag::Lazy) {
                                RemoveResult::Done
                            } else {
                                RemoveResult::Invalidating
                            }
                        }
                    }
                }
                Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
            }
        } else {
            let node = *self.used(pos);
            match node.right.tag {
                Tag::Empty => RemoveResult::Done,
                Tag::Terminal => {
                    if node.right.payload == *toremove {
                        if matches!(node.left.tag, Tag::Terminal) {
                            let survivor = node.left.payload;
                            self.push_free(pos);
                            RemoveResult::OneLeft(survivor)
                        } else {
                            self.used_mut(pos).right = Slot::EMPTY;
                            RemoveResult::Fragile
                        }
                    } else if node.left.payload == *toremove && matches!(node.left.tag, Tag::Terminal) {
                        let survivor = node.right.payload;
                        self.push_free(pos);
                        RemoveResult::OneLeft(survivor)
                    } else {
                        RemoveResult::Done
                    }
                }
                Tag::Middle | Tag::Lazy => {
                    let child = node.right_child.expect("middle/lazy slot needs a child");
                    let r = self.remove_inner(toremove, child, depth + 1);
                    match r {
                        RemoveResult::Done => RemoveResult::Done,
                        RemoveResult::Invalidating => {
                            if matches!(node.right.tag, Tag::Middle) {
                                self.used_mut(pos).right.tag = Tag::Lazy;
                                if !matches!(node.left.tag, Tag::Lazy) {
                                    return RemoveResult::Invalidating;
                                }
                            }
                            RemoveResult::Done
                        }
                        RemoveResult::OneLeft(val) => {
                            let was_lazy_l = matches!(node.left.tag, Tag::Lazy);
                            let was_lazy_r = matches!(node.right.tag, Tag::Lazy);
                            let n = self.used_mut(pos);
                            n.right = Slot::terminal(val);
                            n.right_child = None;
                            if matches!(n.left.tag, Tag::Terminal) {
                                RemoveResult::Fragile
                            } else if !was_lazy_l && !was_lazy_r {
                                RemoveResult::Invalidating
                            } else {
                                RemoveResult::Done
                            }
                        }
                        RemoveResult::Fragile => {
                            if matches!(node.left.tag, Tag::Empty) {
                                if !matches!(node.right.tag, Tag::Lazy) {
                                    self.used_mut(pos).right.tag = Tag::Lazy;
                                }
                                return RemoveResult::Fragile;
                            }
                            self.catch(child);
                            let was_lazy_r = matches!(node.right.tag, Tag::Lazy);
                            if was_lazy_r {
                                return RemoveResult::Done;
                            }
                            self.used_mut(pos).right.tag = Tag::Lazy;
                            if matches!(node.left.tag, Tag::Lazy) {
                                RemoveResult::Done
                            } else {
                                RemoveResult::Invalidating
                            }
                        }
                    }
                }
                Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
            }
        }
    }

    /// Called on a node known to be fragile on one side whose sibling is
    /// non-empty: tries to collapse the fragile side down to a canonical
    /// two-terminal pair. Mirrors `_catch_leaf`.
    pub(crate) fn catch(&mut self, pos: u16) {
        let node = *self.used(pos);
        if matches!(node.left.tag, Tag::Empty) {
            let child = node.right_child.expect("non-empty side must have a child");
            if let Some(pair) = self.collapse_inner(child) {
                let n = self.used_mut(pos);
                n.right_child = None;
                n.left = Slot::terminal(pair.0);
                n.right = Slot::terminal(pair.1);
            }
        } else if matches!(node.right.tag, Tag::Empty) {
            let child = node.left_child.expect("non-empty side must have a child");
            if let Some(pair) = self.collapse_inner(child) {
                let n = self.used_mut(pos);
                n.left_child = None;
                n.left = Slot::terminal(pair.0);
                n.right = Slot::terminal(pair.1);
            }
        }
    }

    /// Collapses the subtree at `pos` to its two terminal elements if it
    /// holds exactly two, freeing every node it subsumes. Mirrors
    /// `_collapse_leaf_inner`.
    pub(crate) fn collapse_inner(&mut self, pos: u16) -> Option<(Digest, Digest)> {
        let node = *self.used(pos);
        let result = if matches!(node.left.tag, Tag::Terminal) && matches!(node.right.tag, Tag::Terminal) {
            Some((node.left.payload, node.right.payload))
        } else if matches!(node.left.tag, Tag::Empty) {
            self.collapse_inner(node.right_child.expect("non-empty side must have a child"))
        } else if matches!(node.right.tag, Tag::Empty) {
            self.collapse_inner(node.left_child.expect("non-empty side must have a child"))
        } else {
            None
        };
        if result.is_some() {
            self.push_free(pos);
        }
        result
    }

    /// Recomputes and caches the hash of the subtree at `pos`, descending
    /// through any stale `LAZY` descendants first. Mirrors
    /// `_force_calculation_leaf`.
    pub(crate) fn force(&mut self, pos: u16) -> Digest {
        let node = *self.used(pos);
        let new_left = matches!(node.left.tag, Tag::Lazy).then(|| {
            self.force(node.left_child.expect("lazy slot needs a child"))
        });
        let new_right = matches!(node.right.tag, Tag::Lazy).then(|| {
            self.force(node.right_child.expect("lazy slot needs a child"))
        });
        let n = self.used_mut(pos);
        if let Some(h) = new_left {
            n.left = Slot {
                tag: Tag::Middle,
                payload: h,
            };
        }
        if let Some(h) = new_right {
            n.right = Slot {
                tag: Tag::Middle,
                payload: h,
            };
        }
        let n = *self.used(pos);
        debug_check_pair(n.left.tag, &n.left.payload, n.right.tag, &n.right.payload);
        hash_pair(pack(n.left.tag, &n.left.payload), pack(n.right.tag, &n.right.payload))
    }

    /// Walks the subtree at `pos` for a membership proof, appending
    /// serialized summaries to `buf`. Mirrors `_is_included_leaf`.
    pub(crate) fn is_included(&self, tocheck: &Digest, pos: u16, depth: u32, buf: &mut Vec<u8>) -> bool {
        crate::proof::walk_leaf(self, tocheck, pos, depth, buf)
    }

    /// Appends every terminal value reachable from `pos` to `out`, used by
    /// the auditor.
    pub(crate) fn collect_terminals(&self, pos: u16, out: &mut Vec<Digest>, can_terminate: bool) {
        let node = self.used(pos);
        match node.left.tag {
            Tag::Terminal => out.push(node.left.payload),
            Tag::Middle | Tag::Lazy => self.collect_terminals(
                node.left_child.expect("middle/lazy slot needs a child"),
                out,
                !matches!(node.right.tag, Tag::Empty),
            ),
            Tag::Empty => {}
            Tag::Invalid => unreachable!(),
        }
        if matches!(node.left.tag, Tag::Terminal) {
            debug_assert!(can_terminate || !matches!(node.right.tag, Tag::Terminal));
        }
        match node.right.tag {
            Tag::Terminal => out.push(node.right.payload),
            Tag::Middle | Tag::Lazy => self.collect_terminals(
                node.right_child.expect("middle/lazy slot needs a child"),
                out,
                !matches!(node.left.tag, Tag::Empty),
            ),
            Tag::Empty => {}
            Tag::Invalid => unreachable!(),
        }
    }

    /// Returns the set of cell indices currently on the free list, for the
    /// auditor to cross-check against the set of cells not reachable from
    /// any live root.
    pub(crate) fn free_list(&self) -> Vec<u16> {
        let mut out = Vec::new();
        let mut cur = self.first_free;
        while let Some(pos) = cur {
            out.push(pos);
            cur = match self.cells[pos as usize] {
                Cell::Free { next } => next,
                Cell::Used(_) => panic!("free list points at a used cell"),
            };
        }
        out
    }

    pub(crate) fn capacity(&self) -> u16 {
        self.capacity
    }
}

/// Copies the subtree at `from_pos` in `from` into a fresh cell of `to`,
/// bumping/dropping reference counts on success. Mirrors
/// `_copy_between_leafs`.
pub(crate) fn copy_between(from: &mut LeafBlock, to: &mut LeafBlock, from_pos: u16) -> Result<u16, ()> {
    let result = copy_between_inner(from, to, from_pos);
    if let Ok(_) = result {
        to.num_inputs += 1;
        from.num_inputs -= 1;
    }
    result
}

/// Mirrors `_copy_between_leafs_inner`: the recursive copy without the
/// reference-count bookkeeping, also used directly by branch-side migration.
pub(crate) fn copy_between_inner(from: &mut LeafBlock, to: &mut LeafBlock, from_pos: u16) -> Result<u16, ()> {
    let to_pos = to.pop_free().ok_or(())?;
    let node = *from.used(from_pos);
    let mut low = None;
    if matches!(node.left.tag, Tag::Middle | Tag::Lazy) {
        match copy_between_inner(from, to, node.left_child.expect("middle/lazy slot needs a child")) {
            Ok(pos) => low = Some(pos),
            Err(()) => {
                to.push_free(to_pos);
                return Err(());
            }
        }
    }
    let mut high = None;
    if matches!(node.right.tag, Tag::Middle | Tag::Lazy) {
        match copy_between_inner(from, to, node.right_child.expect("middle/lazy slot needs a child")) {
            Ok(pos) => high = Some(pos),
            Err(()) => {
                if let Some(low_pos) = low {
                    to.delete_subtree(low_pos);
                }
                to.push_free(to_pos);
                return Err(());
            }
        }
    }
    to.cells[to_pos as usize] = Cell::Used(LeafNode {
        left: node.left,
        right: node.right,
        left_child: low,
        right_child: high,
    });
    Ok(to_pos)
}

// re-export for proof.rs's internal walk helper
pub(crate) use hash::Tag as SlotTag;

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Digest {
        hash::canonicalize([byte; 32])
    }

    #[test]
    fn insert_two_then_add_third() {
        let mut leaf = LeafBlock::new(8);
        let mut pair = [key(1), key(2)];
        let pos = leaf.insert(&mut pair, 0).expect("room for two");
        assert_eq!(leaf.add_inner(&key(3), pos, 0), AddResult::Invalidating);
        let mut terminals = Vec::new();
        leaf.collect_terminals(pos, &mut terminals, true);
        terminals.sort();
        assert_eq!(terminals, vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn remove_back_to_one_left() {
        let mut leaf = LeafBlock::new(8);
        let mut pair = [key(1), key(2)];
        let pos = leaf.insert(&mut pair, 0).expect("room for two");
        match leaf.remove_inner(&key(1), pos, 0) {
            RemoveResult::OneLeft(v) => assert_eq!(v, key(2)),
            other => panic!("expected ONELEFT, got {other:?}"),
        }
    }

    #[test]
    fn full_leaf_reports_full() {
        let mut leaf = LeafBlock::new(1);
        let mut pair = [key(1), key(2)];
        leaf.insert(&mut pair, 0).expect("room for one pair");
        let mut pair2 = [key(3), key(4)];
        assert!(leaf.insert(&mut pair2, 0).is_err());
    }
}
