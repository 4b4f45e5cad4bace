//! Whole-structure invariant checker.
//!
//! Validates that every block reachable from the set's root actually
//! reconstructs the hash its parent recorded for it, that the EMPTY/TERMINAL
//! collapse invariants hold at every node, that every leaf block's free list
//! and used cells partition its capacity with nothing left over and nothing
//! shared, and that the terminal values found during the walk are exactly
//! the expected set. Exists for tests and fuzzing; never called on the
//! add/remove/is_included hot path.
//!
//! Mirrors `_audit`/`_audit_branch(_inner)`/`_audit_whole_leaf(_inner)`.

use std::collections::{
    HashMap,
    HashSet,
};

use crate::branch::{
    BranchHandle,
    Descend,
    Edge,
    LeafHandle,
};
use crate::hash::{
    canonicalize,
    hash_pair,
    pack,
    Digest,
    Tag,
    BLANK,
};
use crate::leaf::{
    LeafBlock,
    Slot,
};
use crate::store::Store;

/// Checks every structural invariant of the tree rooted at `(root,
/// root_branch)` against `expected`, the full set of elements the tree is
/// supposed to hold.
///
/// # Panics
/// Panics with a descriptive message on the first invariant violation found.
pub(crate) fn audit(store: &Store, root: Slot, root_branch: Option<BranchHandle>, expected: &[Digest]) {
    let mut terminals = Vec::new();
    match root.tag {
        Tag::Empty => {
            assert_eq!(root.payload, BLANK, "empty root must carry the blank payload");
            assert!(root_branch.is_none(), "empty root must not reference a branch block");
        }
        Tag::Terminal => {
            assert!(root_branch.is_none(), "terminal root must not reference a branch block");
            terminals.push(root.payload);
        }
        Tag::Middle | Tag::Lazy => {
            let handle = root_branch.expect("a non-terminal root must reference its branch block");
            let mut visited_branches = HashSet::new();
            let mut leaf_entries: HashMap<LeafHandle, Vec<(u16, Slot)>> = HashMap::new();
            audit_branch(store, handle, root, &mut visited_branches, &mut leaf_entries, &mut terminals);
            assert_eq!(
                visited_branches.len(),
                store.branches.len_allocated(),
                "branch blocks allocated but not reachable from the root, or vice versa"
            );
            let mut visited_leaves = HashSet::new();
            for (&leaf_handle, entries) in &leaf_entries {
                assert!(
                    visited_leaves.insert(leaf_handle),
                    "leaf block referenced from more than one branch's scope"
                );
                audit_whole_leaf(store.leaf(leaf_handle), entries, &mut terminals);
            }
            assert_eq!(
                visited_leaves.len(),
                store.leaves.len_allocated(),
                "leaf blocks allocated but not reachable from the root, or vice versa"
            );
        }
        Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
    }
    terminals.sort();
    let mut expected_sorted: Vec<Digest> = expected.iter().map(|d| canonicalize(*d)).collect();
    expected_sorted.sort();
    assert_eq!(
        terminals, expected_sorted,
        "terminal values recovered from the tree do not match the expected set"
    );
}

/// Checks the sibling-shape invariants every pair of slots must hold,
/// unconditionally rather than only in debug builds: the auditor's whole
/// purpose is to catch these even in release-mode test binaries.
fn assert_pair_invariants(left: Slot, right: Slot, can_terminate: bool) {
    match left.tag {
        Tag::Empty => {
            assert!(
                !matches!(right.tag, Tag::Empty | Tag::Terminal),
                "an empty slot's sibling must be a subtree, never empty or terminal"
            );
            assert_eq!(left.payload, BLANK, "empty slot must carry the blank payload");
        }
        Tag::Terminal => {
            assert!(
                can_terminate || !matches!(right.tag, Tag::Terminal),
                "two terminal siblings are only allowed where the caller can still terminate"
            );
            assert!(!matches!(right.tag, Tag::Empty), "a terminal slot's sibling must not be empty");
            if matches!(right.tag, Tag::Terminal) {
                assert!(left.payload < right.payload, "terminal siblings must be in sorted order");
            }
        }
        Tag::Middle | Tag::Lazy => {}
        Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
    }
    if matches!(right.tag, Tag::Empty) {
        assert_eq!(right.payload, BLANK, "empty slot must carry the blank payload");
    }
}

fn recomputed_hash(left: Slot, right: Slot) -> Digest {
    hash_pair(pack(left.tag, &left.payload), pack(right.tag, &right.payload))
}

/// Audits one whole branch block: its top node, everything reachable
/// through its inline levels, and (via `leaf_entries`) every leaf subtree it
/// hands off to. `expected` is the parent's own recorded slot for this
/// block -- the hash this block's top node must recompute to, unless the
/// parent's slot is `LAZY`.
fn audit_branch(
    store: &Store,
    handle: BranchHandle,
    expected: Slot,
    visited_branches: &mut HashSet<BranchHandle>,
    leaf_entries: &mut HashMap<LeafHandle, Vec<(u16, Slot)>>,
    terminals: &mut Vec<Digest>,
) {
    assert!(
        visited_branches.insert(handle),
        "branch block reachable from more than one place in the tree"
    );
    let mut local_leaves = HashSet::new();
    audit_branch_node(
        store,
        handle,
        0,
        0,
        expected,
        visited_branches,
        leaf_entries,
        &mut local_leaves,
        terminals,
        true,
    );
    if let Some(active) = store.branch(handle).active_leaf {
        assert!(
            local_leaves.contains(&active),
            "a branch's active leaf must be directly referenced by one of its own edges"
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn audit_branch_node(
    store: &Store,
    handle: BranchHandle,
    level: u32,
    prefix: u32,
    expected: Slot,
    visited_branches: &mut HashSet<BranchHandle>,
    leaf_entries: &mut HashMap<LeafHandle, Vec<(u16, Slot)>>,
    local_leaves: &mut HashSet<LeafHandle>,
    terminals: &mut Vec<Digest>,
    can_terminate: bool,
) {
    let node = *store.branch(handle).node(level, prefix);
    if !matches!(expected.tag, Tag::Lazy) {
        assert_eq!(
            recomputed_hash(node.left, node.right),
            expected.payload,
            "branch node hash does not match the value its parent recorded for it"
        );
    }
    assert_pair_invariants(node.left, node.right, can_terminate);
    audit_branch_side(
        store,
        handle,
        level,
        prefix,
        true,
        node.left,
        !matches!(node.right.tag, Tag::Empty),
        visited_branches,
        leaf_entries,
        local_leaves,
        terminals,
    );
    audit_branch_side(
        store,
        handle,
        level,
        prefix,
        false,
        node.right,
        !matches!(node.left.tag, Tag::Empty),
        visited_branches,
        leaf_entries,
        local_leaves,
        terminals,
    );
}

#[allow(clippy::too_many_arguments)]
fn audit_branch_side(
    store: &Store,
    handle: BranchHandle,
    level: u32,
    prefix: u32,
    left: bool,
    slot: Slot,
    can_terminate: bool,
    visited_branches: &mut HashSet<BranchHandle>,
    leaf_entries: &mut HashMap<LeafHandle, Vec<(u16, Slot)>>,
    local_leaves: &mut HashSet<LeafHandle>,
    terminals: &mut Vec<Digest>,
) {
    match slot.tag {
        Tag::Empty => {}
        Tag::Terminal => terminals.push(slot.payload),
        Tag::Middle | Tag::Lazy => match store.branch(handle).descend(level, prefix, left) {
            Descend::Node(l, p) => audit_branch_node(
                store,
                handle,
                l,
                p,
                slot,
                visited_branches,
                leaf_entries,
                local_leaves,
                terminals,
                can_terminate,
            ),
            Descend::Edge(e) => match store.branch(handle).edge(e) {
                Edge::Branch(next) => {
                    audit_branch(store, next, slot, visited_branches, leaf_entries, terminals);
                }
                Edge::Leaf(leaf, pos) => {
                    local_leaves.insert(leaf);
                    leaf_entries.entry(leaf).or_default().push((pos, slot));
                }
                Edge::Empty => unreachable!("middle/lazy slot must have a populated edge"),
            },
        },
        Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
    }
}

/// Audits one whole leaf block from every external entry point into it,
/// then cross-checks that the cells reached plus the free list partition
/// the block's full capacity with nothing left over and nothing shared.
fn audit_whole_leaf(leaf: &LeafBlock, entries: &[(u16, Slot)], terminals: &mut Vec<Digest>) {
    assert_eq!(
        entries.len() as u16,
        leaf.num_inputs,
        "leaf's recorded input count does not match the number of edges referencing it"
    );
    let mut visited = HashSet::new();
    for &(pos, expected) in entries {
        audit_leaf_cell(leaf, pos, expected, &mut visited, terminals, true);
    }
    let free: HashSet<u16> = leaf.free_list().into_iter().collect();
    for i in 0..leaf.capacity() {
        assert!(
            visited.contains(&i) != free.contains(&i),
            "leaf cell {i} must be exactly one of reachable-and-used or free, never both or neither"
        );
    }
}

fn audit_leaf_cell(
    leaf: &LeafBlock,
    pos: u16,
    expected: Slot,
    visited: &mut HashSet<u16>,
    terminals: &mut Vec<Digest>,
    can_terminate: bool,
) {
    assert!(visited.insert(pos), "leaf cell {pos} reachable from more than one reference");
    let node = *leaf.node(pos);
    if !matches!(expected.tag, Tag::Lazy) {
        assert_eq!(
            recomputed_hash(node.left, node.right),
            expected.payload,
            "leaf node hash does not match the value its parent recorded for it"
        );
    }
    assert_pair_invariants(node.left, node.right, can_terminate);
    audit_leaf_side(
        leaf,
        node.left,
        node.left_child,
        !matches!(node.right.tag, Tag::Empty),
        visited,
        terminals,
    );
    audit_leaf_side(
        leaf,
        node.right,
        node.right_child,
        !matches!(node.left.tag, Tag::Empty),
        visited,
        terminals,
    );
}

fn audit_leaf_side(
    leaf: &LeafBlock,
    slot: Slot,
    child: Option<u16>,
    can_terminate: bool,
    visited: &mut HashSet<u16>,
    terminals: &mut Vec<Digest>,
) {
    match slot.tag {
        Tag::Empty => {}
        Tag::Terminal => terminals.push(slot.payload),
        Tag::Middle | Tag::Lazy => {
            let child = child.expect("middle/lazy slot needs a child");
            audit_leaf_cell(leaf, child, slot, visited, terminals, can_terminate);
        }
        Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;
    use crate::ops;

    fn key(byte: u8) -> Digest {
        hash::canonicalize([byte; 32])
    }

    #[test]
    fn well_formed_tree_passes_audit() {
        let mut store = Store::new(4, 4);
        let handle = store.allocate_branch();
        let values: Vec<Digest> = (0..30).map(key).collect();
        for v in &values {
            ops::add_to_branch(&mut store, handle, v, 0);
        }
        let hash = ops::force_branch(&mut store, handle);
        audit(
            &store,
            Slot {
                tag: Tag::Middle,
                payload: hash,
            },
            Some(handle),
            &values,
        );
    }

    #[test]
    #[should_panic(expected = "terminal values")]
    fn audit_detects_a_missing_element() {
        let mut store = Store::new(4, 4);
        let handle = store.allocate_branch();
        let values: Vec<Digest> = (0..10).map(key).collect();
        for v in &values {
            ops::add_to_branch(&mut store, handle, v, 0);
        }
        let hash = ops::force_branch(&mut store, handle);
        audit(
            &store,
            Slot {
                tag: Tag::Middle,
                payload: hash,
            },
            Some(handle),
            &values[1..],
        );
    }

    #[test]
    fn empty_root_passes_audit() {
        let store = Store::new(4, 4);
        audit(&store, Slot::EMPTY, None, &[]);
    }
}
