//! Branch-level tree mutation: descent through a balanced block's inline
//! nodes, crossing into nested branches or leaves through the edge array,
//! and the overflow/underflow bookkeeping that keeps a block's shape
//! invariants intact across adds and removes.
//!
//! Leaf blocks already implement the per-cell recursion (`LeafBlock::add_inner`,
//! `remove_inner`, `catch`, `collapse_inner`, `force`); this module supplies
//! the same operations one level up, plus the wrappers that decide when a
//! leaf has overflowed into a sibling branch or when a collapsed leaf should
//! be freed outright. [`leaf::AddResult`] and [`leaf::RemoveResult`] are
//! reused unchanged -- dispatching by a node's own tag before recursing,
//! rather than blindly recursing and reacting to the result, never needs a
//! "nothing happened yet" variant: a `MIDDLE` or `LAZY` slot always has a
//! populated subtree underneath it.

use crate::branch::{
    BranchHandle,
    Descend,
    Edge,
    LeafHandle,
};
use crate::hash::{
    bit_at,
    debug_check_pair,
    hash_pair,
    pack,
    Digest,
    Tag,
    BLANK,
};
use crate::leaf::{
    self,
    AddResult,
    RemoveResult,
    Slot,
};
use crate::store::Store;

// ---------------------------------------------------------------------
// force
// ---------------------------------------------------------------------

/// Recomputes and caches the hash of the whole subtree rooted at `handle`,
/// recursively forcing every stale descendant first. Mirrors
/// `_force_calculation_branch`.
pub(crate) fn force_branch(store: &mut Store, handle: BranchHandle) -> Digest {
    force_branch_at(store, handle, 0, 0)
}

fn force_branch_at(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32) -> Digest {
    let node = *store.branch(handle).node(level, prefix);
    let new_left = matches!(node.left.tag, Tag::Lazy).then(|| force_child(store, handle, level, prefix, true));
    let new_right = matches!(node.right.tag, Tag::Lazy).then(|| force_child(store, handle, level, prefix, false));
    {
        let n = store.branch_mut(handle).node_mut(level, prefix);
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
    }
    let n = *store.branch(handle).node(level, prefix);
    debug_check_pair(n.left.tag, &n.left.payload, n.right.tag, &n.right.payload);
    hash_pair(pack(n.left.tag, &n.left.payload), pack(n.right.tag, &n.right.payload))
}

fn force_child(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, left: bool) -> Digest {
    match store.branch(handle).descend(level, prefix, left) {
        Descend::Node(l, p) => force_branch_at(store, handle, l, p),
        Descend::Edge(e) => match store.branch(handle).edge(e) {
            Edge::Branch(next) => force_branch(store, next),
            Edge::Leaf(leaf, pos) => store.leaf_mut(leaf).force(pos),
            Edge::Empty => unreachable!("lazy slot must have a populated edge"),
        },
    }
}

// ---------------------------------------------------------------------
// add
// ---------------------------------------------------------------------

/// Adds `toadd` into the subtree rooted at `handle`. Mirrors `_add_to_branch`.
pub(crate) fn add_to_branch(store: &mut Store, handle: BranchHandle, toadd: &Digest, depth: u32) -> AddResult {
    add_to_branch_level(store, handle, 0, 0, toadd, depth)
}

/// Mirrors `_add_to_branch_inner`.
fn add_to_branch_level(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, toadd: &Digest, depth: u32) -> AddResult {
    let node = *store.branch(handle).node(level, prefix);
    if bit_at(toadd, depth) == 0 {
        match node.left.tag {
            Tag::Empty => {
                store.branch_mut(handle).node_mut(level, prefix).left = Slot::terminal(*toadd);
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
                    let n = store.branch_mut(handle).node_mut(level, prefix);
                    n.left = Slot::EMPTY;
                    n.right = Slot::EMPTY;
                    let mut things = [*toadd, old0, old1];
                    insert_branch_at_node(store, handle, level, prefix, &mut things, depth);
                    AddResult::Invalidating
                } else {
                    let mut pair = [*toadd, old0];
                    insert_branch_child(store, handle, level, prefix, true, &mut pair, depth + 1);
                    let was_lazy = matches!(node.right.tag, Tag::Lazy);
                    store.branch_mut(handle).node_mut(level, prefix).left = Slot {
                        tag: Tag::Lazy,
                        payload: BLANK,
                    };
                    if was_lazy {
                        AddResult::Done
                    } else {
                        AddResult::Invalidating
                    }
                }
            }
            Tag::Middle | Tag::Lazy => {
                let r = open_add_child(store, handle, level, prefix, true, toadd, depth + 1);
                match r {
                    AddResult::Invalidating => {
                        if matches!(node.left.tag, Tag::Middle) {
                            store.branch_mut(handle).node_mut(level, prefix).left.tag = Tag::Lazy;
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
        match node.right.tag {
            Tag::Empty => {
                store.branch_mut(handle).node_mut(level, prefix).right = Slot::terminal(*toadd);
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
                    let n = store.branch_mut(handle).node_mut(level, prefix);
                    n.left = Slot::EMPTY;
                    n.right = Slot::EMPTY;
                    let mut things = [*toadd, old0, old1];
                    insert_branch_at_node(store, handle, level, prefix, &mut things, depth);
                    AddResult::Invalidating
                } else {
                    let mut pair = [*toadd, old1];
                    insert_branch_child(store, handle, level, prefix, false, &mut pair, depth + 1);
                    let was_lazy = matches!(node.left.tag, Tag::Lazy);
                    store.branch_mut(handle).node_mut(level, prefix).right = Slot {
                        tag: Tag::Lazy,
                        payload: BLANK,
                    };
                    if was_lazy {
                        AddResult::Done
                    } else {
                        AddResult::Invalidating
                    }
                }
            }
            Tag::Middle | Tag::Lazy => {
                let r = open_add_child(store, handle, level, prefix, false, toadd, depth + 1);
                match r {
                    AddResult::Invalidating => {
                        if matches!(node.right.tag, Tag::Middle) {
                            store.branch_mut(handle).node_mut(level, prefix).right.tag = Tag::Lazy;
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

fn open_add_child(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, left: bool, toadd: &Digest, depth: u32) -> AddResult {
    match store.branch(handle).descend(level, prefix, left) {
        Descend::Node(l, p) => add_to_branch_level(store, handle, l, p, toadd, depth),
        Descend::Edge(e) => match store.branch(handle).edge(e) {
            Edge::Branch(next) => add_to_branch(store, next, toadd, depth),
            Edge::Leaf(leaf, pos) => add_to_leaf(store, handle, e, leaf, pos, toadd, depth),
            Edge::Empty => unreachable!("middle/lazy slot must have a populated edge"),
        },
    }
}

/// Adds `toadd` into a leaf subtree reached through `branch`'s edge
/// `edge_index`, migrating the subtree out of `leaf` when it is full.
/// Mirrors `_add_to_leaf`.
fn add_to_leaf(store: &mut Store, branch: BranchHandle, edge_index: u32, leaf: LeafHandle, pos: u16, toadd: &Digest, depth: u32) -> AddResult {
    let r = store.leaf_mut(leaf).add_inner(toadd, pos, depth);
    if r != AddResult::Full {
        return r;
    }
    if store.leaf(leaf).num_inputs == 1 {
        // the only subtree in this leaf still doesn't fit: the leaf itself
        // is too small for this one group, so promote it to a branch block.
        let nested = store.allocate_branch();
        copy_leaf_to_branch(store, nested, 0, 0, leaf, pos);
        let r2 = add_to_branch(store, nested, toadd, depth);
        debug_assert!(matches!(r2, AddResult::Invalidating | AddResult::Done));
        store.branch_mut(branch).set_edge(edge_index, Edge::Branch(nested));
        if store.branch(branch).active_leaf == Some(leaf) {
            store.branch_mut(branch).active_leaf = None;
        }
        store.free_leaf(leaf);
        return AddResult::Invalidating;
    }
    let mut active = store.branch(branch).active_leaf.filter(|&h| h != leaf);
    if active.is_none() {
        active = Some(store.allocate_leaf());
    }
    let mut active = active.expect("set just above");
    let mut new_pos = {
        let (from, to) = store.leaf_pair_mut(leaf, active);
        leaf::copy_between(from, to, pos).ok()
    };
    if new_pos.is_none() {
        active = store.allocate_leaf();
        let (from, to) = store.leaf_pair_mut(leaf, active);
        new_pos = leaf::copy_between(from, to, pos).ok();
        debug_assert!(new_pos.is_some(), "a freshly allocated leaf always has room for one migrated subtree");
    }
    if store.branch(branch).active_leaf != Some(active) {
        store.branch_mut(branch).active_leaf = Some(active);
    }
    let new_pos = new_pos.expect("migration above always succeeds");
    store.leaf_mut(leaf).delete_subtree(pos);
    store.branch_mut(branch).set_edge(edge_index, Edge::Leaf(active, new_pos));
    add_to_leaf(store, branch, edge_index, active, new_pos, toadd, depth)
}

/// Deep-copies a leaf subtree into a brand new branch block, one inline
/// node at a time, crossing into the branch's own active leaf once it
/// reaches the bottom edge boundary. Mirrors `_copy_leaf_to_branch`.
fn copy_leaf_to_branch(store: &mut Store, branch: BranchHandle, level: u32, prefix: u32, leaf: LeafHandle, leaf_pos: u16) {
    let node = *store.leaf(leaf).node(leaf_pos);
    {
        let dst = store.branch_mut(branch).node_mut(level, prefix);
        dst.left = node.left;
        dst.right = node.right;
    }
    if matches!(node.left.tag, Tag::Middle | Tag::Lazy) {
        let child = node.left_child.expect("middle/lazy slot needs a child");
        copy_leaf_to_branch_child(store, branch, level, prefix, true, leaf, child);
    }
    if matches!(node.right.tag, Tag::Middle | Tag::Lazy) {
        let child = node.right_child.expect("middle/lazy slot needs a child");
        copy_leaf_to_branch_child(store, branch, level, prefix, false, leaf, child);
    }
}

fn copy_leaf_to_branch_child(store: &mut Store, branch: BranchHandle, level: u32, prefix: u32, left: bool, leaf: LeafHandle, leaf_child_pos: u16) {
    match store.branch(branch).descend(level, prefix, left) {
        Descend::Node(l, p) => copy_leaf_to_branch(store, branch, l, p, leaf, leaf_child_pos),
        Descend::Edge(e) => copy_leaf_to_edge(store, branch, e, leaf, leaf_child_pos),
    }
}

fn copy_leaf_to_edge(store: &mut Store, branch: BranchHandle, edge_index: u32, leaf: LeafHandle, leaf_pos: u16) {
    let active = match store.branch(branch).active_leaf {
        Some(h) => h,
        None => {
            let fresh = store.allocate_leaf();
            store.branch_mut(branch).active_leaf = Some(fresh);
            fresh
        }
    };
    let (from, to) = store.leaf_pair_mut(leaf, active);
    let new_pos = leaf::copy_between_inner(from, to, leaf_pos).expect("a branch being built from a single leaf always has room");
    to.num_inputs += 1;
    store.branch_mut(branch).set_edge(edge_index, Edge::Leaf(active, new_pos));
}

/// Inserts a root collision's freshly-sorted group of 2 or 3 terminal values
/// directly into a branch block's top node. Used when the whole set's root
/// itself is a `TERMINAL`-vs-`TERMINAL` collision, which has no parent node
/// to dispatch through.
pub(crate) fn insert_pair_at_root(store: &mut Store, handle: BranchHandle, things: &mut [Digest]) {
    insert_branch_at_node(store, handle, 0, 0, things, 0);
}

/// Inserts a freshly-sorted group of 2 or 3 terminal values directly into
/// node `(level, prefix)`. Mirrors `_insert_branch`'s node-level case.
fn insert_branch_at_node(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, things: &mut [Digest], depth: u32) {
    things.sort();
    if things.len() == 2 {
        let node = store.branch_mut(handle).node_mut(level, prefix);
        node.left = Slot::terminal(things[0]);
        node.right = Slot::terminal(things[1]);
        return;
    }
    let bits = [bit_at(&things[0], depth), bit_at(&things[1], depth), bit_at(&things[2], depth)];
    if bits[0] == bits[1] && bits[1] == bits[2] {
        let left = bits[0] == 0;
        insert_branch_child(store, handle, level, prefix, left, things, depth + 1);
        let node = store.branch_mut(handle).node_mut(level, prefix);
        if left {
            node.left = Slot {
                tag: Tag::Lazy,
                payload: BLANK,
            };
            node.right = Slot::EMPTY;
        } else {
            node.right = Slot {
                tag: Tag::Lazy,
                payload: BLANK,
            };
            node.left = Slot::EMPTY;
        }
    } else if bits[0] == bits[1] {
        let mut pair = [things[0], things[1]];
        insert_branch_child(store, handle, level, prefix, true, &mut pair, depth + 1);
        let node = store.branch_mut(handle).node_mut(level, prefix);
        node.right = Slot::terminal(things[2]);
        node.left = Slot {
            tag: Tag::Lazy,
            payload: BLANK,
        };
    } else {
        let mut pair = [things[1], things[2]];
        insert_branch_child(store, handle, level, prefix, false, &mut pair, depth + 1);
        let node = store.branch_mut(handle).node_mut(level, prefix);
        node.left = Slot::terminal(things[0]);
        node.right = Slot {
            tag: Tag::Lazy,
            payload: BLANK,
        };
    }
}

fn insert_branch_child(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, left: bool, things: &mut [Digest], depth: u32) {
    match store.branch(handle).descend(level, prefix, left) {
        Descend::Node(l, p) => insert_branch_at_node(store, handle, l, p, things, depth),
        Descend::Edge(e) => insert_branch_at_edge(store, handle, e, things, depth),
    }
}

/// Mirrors `_insert_branch`'s `moddepth == 0` case: `edge_index` is itself
/// the destination, routed through the branch's active leaf the same way
/// leaf overflow migration is.
fn insert_branch_at_edge(store: &mut Store, handle: BranchHandle, edge_index: u32, things: &mut [Digest], depth: u32) {
    let active = store.branch(handle).active_leaf;
    let mut target = active;
    let mut pos = match target {
        Some(h) => store.leaf_mut(h).insert(things, depth).ok(),
        None => None,
    };
    if pos.is_none() {
        let fresh = store.allocate_leaf();
        match store.leaf_mut(fresh).insert(things, depth) {
            Ok(p) => {
                target = Some(fresh);
                pos = Some(p);
                store.branch_mut(handle).active_leaf = Some(fresh);
            }
            Err(()) => {
                // even an empty leaf can't hold a single group: leaf_units
                // is too small for this set's geometry ever to use leaves at
                // all, so fall back to a nested branch instead.
                store.free_leaf(fresh);
                let nested = store.allocate_branch();
                store.branch_mut(handle).set_edge(edge_index, Edge::Branch(nested));
                insert_branch_at_node(store, nested, 0, 0, things, depth);
                return;
            }
        }
    }
    let target = target.expect("a target leaf was selected or allocated above");
    let pos = pos.expect("a position was produced above");
    store.leaf_mut(target).num_inputs += 1;
    store.branch_mut(handle).set_edge(edge_index, Edge::Leaf(target, pos));
}

// ---------------------------------------------------------------------
// remove
// ---------------------------------------------------------------------

/// Removes `toremove` from the subtree rooted at `handle`, freeing the
/// block itself if it collapses to a single element. Mirrors
/// `_remove_branch`.
pub(crate) fn remove_from_branch(store: &mut Store, handle: BranchHandle, toremove: &Digest, depth: u32) -> RemoveResult {
    let result = remove_from_branch_level(store, handle, 0, 0, toremove, depth);
    if matches!(result, RemoveResult::OneLeft(_)) {
        store.free_branch(handle);
    }
    result
}

/// Mirrors `_remove_branch_inner`.
fn remove_from_branch_level(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, toremove: &Digest, depth: u32) -> RemoveResult {
    let node = *store.branch(handle).node(level, prefix);
    if bit_at(toremove, depth) == 0 {
        match node.left.tag {
            Tag::Empty => RemoveResult::Done,
            Tag::Terminal => {
                if node.left.payload == *toremove {
                    if matches!(node.right.tag, Tag::Terminal) {
                        let survivor = node.right.payload;
                        let n = store.branch_mut(handle).node_mut(level, prefix);
                        n.left = Slot::EMPTY;
                        n.right = Slot::EMPTY;
                        RemoveResult::OneLeft(survivor)
                    } else {
                        store.branch_mut(handle).node_mut(level, prefix).left = Slot::EMPTY;
                        RemoveResult::Fragile
                    }
                } else if matches!(node.right.tag, Tag::Terminal) && node.right.payload == *toremove {
                    let survivor = node.left.payload;
                    let n = store.branch_mut(handle).node_mut(level, prefix);
                    n.left = Slot::EMPTY;
                    n.right = Slot::EMPTY;
                    RemoveResult::OneLeft(survivor)
                } else {
                    RemoveResult::Done
                }
            }
            Tag::Middle | Tag::Lazy => {
                let r = open_remove_child(store, handle, level, prefix, true, toremove, depth + 1);
                match r {
                    RemoveResult::Done => RemoveResult::Done,
                    RemoveResult::Invalidating => {
                        if matches!(node.left.tag, Tag::Middle) {
                            store.branch_mut(handle).node_mut(level, prefix).left.tag = Tag::Lazy;
                            if !matches!(node.right.tag, Tag::Lazy) {
                                return RemoveResult::Invalidating;
                            }
                        }
                        RemoveResult::Done
                    }
                    RemoveResult::OneLeft(val) => {
                        let was_lazy_l = matches!(node.left.tag, Tag::Lazy);
                        let was_lazy_r = matches!(node.right.tag, Tag::Lazy);
                        let n = store.branch_mut(handle).node_mut(level, prefix);
                        n.left = Slot::terminal(val);
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
                            store.branch_mut(handle).node_mut(level, prefix).left.tag = Tag::Lazy;
                            RemoveResult::Fragile
                        } else {
                            catch_branch_child(store, handle, level, prefix, true);
                            let was_lazy_l = matches!(node.left.tag, Tag::Lazy);
                            if was_lazy_l {
                                RemoveResult::Done
                            } else {
                                store.branch_mut(handle).node_mut(level, prefix).left.tag = Tag::Lazy;
                                if matches!(node.right.tag, Tag::Lazy) {
                                    RemoveResult::Done
                                } else {
                                    RemoveResult::Invalidating
                                }
                            }
                        }
                    }
                }
            }
            Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
        }
    } else {
        match node.right.tag {
            Tag::Empty => RemoveResult::Done,
            Tag::Terminal => {
                if node.right.payload == *toremove {
                    if matches!(node.left.tag, Tag::Terminal) {
                        let survivor = node.left.payload;
                        let n = store.branch_mut(handle).node_mut(level, prefix);
                        n.left = Slot::EMPTY;
                        n.right = Slot::EMPTY;
                        RemoveResult::OneLeft(survivor)
                    } else {
                        store.branch_mut(handle).node_mut(level, prefix).right = Slot::EMPTY;
                        RemoveResult::Fragile
                    }
                } else if matches!(node.left.tag, Tag::Terminal) && node.left.payload == *toremove {
                    let survivor = node.right.payload;
                    let n = store.branch_mut(handle).node_mut(level, prefix);
                    n.left = Slot::EMPTY;
                    n.right = Slot::EMPTY;
                    RemoveResult::OneLeft(survivor)
                } else {
                    RemoveResult::Done
                }
            }
            Tag::Middle | Tag::Lazy => {
                let r = open_remove_child(store, handle, level, prefix, false, toremove, depth + 1);
                match r {
                    RemoveResult::Done => RemoveResult::Done,
                    RemoveResult::Invalidating => {
                        if matches!(node.right.tag, Tag::Middle) {
                            store.branch_mut(handle).node_mut(level, prefix).right.tag = Tag::Lazy;
                            if !matches!(node.left.tag, Tag::Lazy) {
                                return RemoveResult::Invalidating;
                            }
                        }
                        RemoveResult::Done
                    }
                    RemoveResult::OneLeft(val) => {
                        let was_lazy_l = matches!(node.left.tag, Tag::Lazy);
                        let was_lazy_r = matches!(node.right.tag, Tag::Lazy);
                        let n = store.branch_mut(handle).node_mut(level, prefix);
                        n.right = Slot::terminal(val);
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
                            store.branch_mut(handle).node_mut(level, prefix).right.tag = Tag::Lazy;
                            RemoveResult::Fragile
                        } else {
                            catch_branch_child(store, handle, level, prefix, false);
                            let was_lazy_r = matches!(node.right.tag, Tag::Lazy);
                            if was_lazy_r {
                                RemoveResult::Done
                            } else {
                                store.branch_mut(handle).node_mut(level, prefix).right.tag = Tag::Lazy;
                                if matches!(node.left.tag, Tag::Lazy) {
                                    RemoveResult::Done
                                } else {
                                    RemoveResult::Invalidating
                                }
                            }
                        }
                    }
                }
            }
            Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
        }
    }
}

fn open_remove_child(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, left: bool, toremove: &Digest, depth: u32) -> RemoveResult {
    match store.branch(handle).descend(level, prefix, left) {
        Descend::Node(l, p) => remove_from_branch_level(store, handle, l, p, toremove, depth),
        Descend::Edge(e) => {
            let edge = store.branch(handle).edge(e);
            let result = match edge {
                Edge::Branch(next) => remove_from_branch(store, next, toremove, depth),
                Edge::Leaf(leaf, pos) => remove_from_leaf(store, handle, leaf, pos, toremove, depth),
                Edge::Empty => unreachable!("middle/lazy slot must have a populated edge"),
            };
            if matches!(result, RemoveResult::OneLeft(_)) {
                store.branch_mut(handle).set_edge(e, Edge::Empty);
            }
            result
        }
    }
}

/// Removes `toremove` from a leaf subtree, decrementing the leaf's
/// reference count and freeing it outright once empty. Mirrors the
/// `_remove_leaf` wrapper.
fn remove_from_leaf(store: &mut Store, branch: BranchHandle, leaf: LeafHandle, pos: u16, toremove: &Digest, depth: u32) -> RemoveResult {
    let result = store.leaf_mut(leaf).remove_inner(toremove, pos, depth);
    if matches!(result, RemoveResult::OneLeft(_)) {
        let num_inputs = store.leaf(leaf).num_inputs;
        if num_inputs == 1 {
            store.free_leaf(leaf);
            if store.branch(branch).active_leaf == Some(leaf) {
                store.branch_mut(branch).active_leaf = None;
            }
        } else {
            store.leaf_mut(leaf).num_inputs -= 1;
        }
    }
    result
}

// ---------------------------------------------------------------------
// catch / collapse
// ---------------------------------------------------------------------

/// Catches the whole set's root branch after a root-level removal reports
/// `Fragile`. The root has no parent node to trigger this automatically, so
/// the set itself must call it directly once removal bubbles all the way up.
pub(crate) fn catch_root(store: &mut Store, handle: BranchHandle) {
    catch_branch_at(store, handle, 0, 0);
}

/// Tries to flatten node `(level, prefix)`'s non-empty side down to a
/// canonical two-terminal pair. Called on a node one of whose sides a
/// removal just emptied. Mirrors `_catch_branch`'s node-level case.
fn catch_branch_at(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32) {
    let node = *store.branch(handle).node(level, prefix);
    if matches!(node.left.tag, Tag::Empty) {
        debug_assert!(!matches!(node.right.tag, Tag::Terminal));
        if let Some(pair) = collapse_branch_child(store, handle, level, prefix, false) {
            let n = store.branch_mut(handle).node_mut(level, prefix);
            n.left = Slot::terminal(pair.0);
            n.right = Slot::terminal(pair.1);
        }
    } else if matches!(node.right.tag, Tag::Empty) {
        debug_assert!(!matches!(node.left.tag, Tag::Terminal));
        if let Some(pair) = collapse_branch_child(store, handle, level, prefix, true) {
            let n = store.branch_mut(handle).node_mut(level, prefix);
            n.left = Slot::terminal(pair.0);
            n.right = Slot::terminal(pair.1);
        }
    }
}

fn catch_branch_child(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, left: bool) {
    match store.branch(handle).descend(level, prefix, left) {
        Descend::Node(l, p) => catch_branch_at(store, handle, l, p),
        Descend::Edge(e) => catch_branch_at_edge(store, handle, e),
    }
}

fn catch_branch_at_edge(store: &mut Store, handle: BranchHandle, edge_index: u32) {
    match store.branch(handle).edge(edge_index) {
        Edge::Branch(next) => catch_branch_at(store, next, 0, 0),
        Edge::Leaf(leaf, pos) => store.leaf_mut(leaf).catch(pos),
        Edge::Empty => unreachable!("catch called on an empty edge"),
    }
}

/// Collapses node `(level, prefix)` to its two terminal elements if it
/// holds exactly two, freeing everything it subsumes. Mirrors
/// `_collapse_branch_inner`'s node-level case.
fn collapse_branch_at(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32) -> Option<(Digest, Digest)> {
    let node = *store.branch(handle).node(level, prefix);
    if matches!(node.left.tag, Tag::Terminal) && matches!(node.right.tag, Tag::Terminal) {
        let pair = (node.left.payload, node.right.payload);
        let n = store.branch_mut(handle).node_mut(level, prefix);
        n.left = Slot::EMPTY;
        n.right = Slot::EMPTY;
        return Some(pair);
    }
    if matches!(node.left.tag, Tag::Empty) {
        let result = collapse_branch_child(store, handle, level, prefix, false);
        if result.is_some() {
            store.branch_mut(handle).node_mut(level, prefix).right = Slot::EMPTY;
        }
        return result;
    }
    if matches!(node.right.tag, Tag::Empty) {
        let result = collapse_branch_child(store, handle, level, prefix, true);
        if result.is_some() {
            store.branch_mut(handle).node_mut(level, prefix).left = Slot::EMPTY;
        }
        return result;
    }
    None
}

fn collapse_branch_child(store: &mut Store, handle: BranchHandle, level: u32, prefix: u32, left: bool) -> Option<(Digest, Digest)> {
    match store.branch(handle).descend(level, prefix, left) {
        Descend::Node(l, p) => collapse_branch_at(store, handle, l, p),
        Descend::Edge(e) => collapse_branch_at_edge(store, handle, e),
    }
}

fn collapse_branch_at_edge(store: &mut Store, handle: BranchHandle, edge_index: u32) -> Option<(Digest, Digest)> {
    let result = match store.branch(handle).edge(edge_index) {
        Edge::Branch(next) => collapse_branch(store, next),
        Edge::Leaf(leaf, pos) => collapse_leaf(store, handle, leaf, pos),
        Edge::Empty => unreachable!("collapse called on an empty edge"),
    };
    if result.is_some() {
        store.branch_mut(handle).set_edge(edge_index, Edge::Empty);
    }
    result
}

/// Collapses a whole nested branch block, freeing it on success. Mirrors
/// `_collapse_branch`.
fn collapse_branch(store: &mut Store, handle: BranchHandle) -> Option<(Digest, Digest)> {
    let result = collapse_branch_at(store, handle, 0, 0);
    if result.is_some() {
        store.free_branch(handle);
    }
    result
}

/// Collapses a leaf subtree, decrementing the leaf's reference count and
/// freeing it outright once empty. Mirrors the `_collapse_leaf` wrapper.
fn collapse_leaf(store: &mut Store, branch: BranchHandle, leaf: LeafHandle, pos: u16) -> Option<(Digest, Digest)> {
    let result = store.leaf_mut(leaf).collapse_inner(pos);
    if result.is_some() {
        let num_inputs = store.leaf(leaf).num_inputs;
        if num_inputs == 1 {
            store.free_leaf(leaf);
            if store.branch(branch).active_leaf == Some(leaf) {
                store.branch_mut(branch).active_leaf = None;
            }
        } else {
            store.leaf_mut(leaf).num_inputs -= 1;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;

    fn key(byte: u8) -> Digest {
        hash::canonicalize([byte; 32])
    }

    fn new_store() -> Store {
        Store::new(4, 8)
    }

    #[test]
    fn add_and_remove_round_trips_through_a_branch() {
        let mut store = new_store();
        let handle = store.allocate_branch();
        let values: Vec<Digest> = (0..40).map(key).collect();
        for v in &values {
            add_to_branch(&mut store, handle, v, 0);
        }
        force_branch(&mut store, handle);
        for v in &values[..39] {
            let r = remove_from_branch(&mut store, handle, v, 0);
            assert!(!matches!(r, RemoveResult::Fragile));
        }
    }

    #[test]
    fn removing_every_element_but_one_reports_one_left() {
        let mut store = new_store();
        let handle = store.allocate_branch();
        let values: Vec<Digest> = (0..5).map(key).collect();
        for v in &values {
            add_to_branch(&mut store, handle, v, 0);
        }
        for v in &values[..4] {
            remove_from_branch(&mut store, handle, v, 0);
        }
        let last = remove_from_branch(&mut store, handle, &values[4], 0);
        assert!(matches!(last, RemoveResult::OneLeft(_)) || matches!(last, RemoveResult::Done));
    }

    #[test]
    fn forcing_resolves_every_lazy_slot() {
        let mut store = new_store();
        let handle = store.allocate_branch();
        for v in (0..20).map(key) {
            add_to_branch(&mut store, handle, &v, 0);
        }
        let hash = force_branch(&mut store, handle);
        assert_ne!(hash, BLANK);
        let second = force_branch(&mut store, handle);
        assert_eq!(hash, second, "forcing an already-forced tree is idempotent");
    }
}
