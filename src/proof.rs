//! Compact inclusion and exclusion proofs: a recursive serialization of the
//! descent toward one candidate digest, with every sibling subtree the
//! descent does not need replaced by an opaque hash.
//!
//! Wire shape, matching the reference engine's `_quick_summary` /
//! `_finish_proof` / `_is_included_*`:
//!
//! * `EMPTY` slot: the single byte `0x00`.
//! * `TERMINAL` slot: 32 bytes, the tag packed into the top two bits of the
//!   first byte (see [`crate::hash::pack`]).
//! * An opened `MIDDLE` slot: the marker byte `0x80`, followed by its left
//!   child's encoding, followed by its right child's encoding.
//! * A `MIDDLE` slot the proof does not open: 32 bytes tagged `INVALID`,
//!   carrying the subtree's cached hash.
//!
//! A proof is always exactly this encoding for the set's root slot, so
//! verification never needs to know anything about how the tree is actually
//! stored -- block boundaries between branches and leaves leave no trace on
//! the wire.

use crate::branch::{
    BranchHandle,
    Edge,
};
use crate::hash::{
    bit_at,
    hash_leaf,
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

/// A serialized inclusion or exclusion proof for one candidate digest.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Proof {
    bytes: Vec<u8>,
}

impl Proof {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Proof {
        Proof { bytes }
    }

    /// The raw wire encoding, suitable for storage or transmission.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for Proof {
    fn from(bytes: Vec<u8>) -> Proof {
        Proof { bytes }
    }
}

fn push_summary(buf: &mut Vec<u8>, slot: Slot) {
    match slot.tag {
        Tag::Empty => buf.push(Tag::Empty.bits()),
        Tag::Terminal => buf.extend_from_slice(&pack(Tag::Terminal, &slot.payload)),
        Tag::Middle | Tag::Lazy => buf.extend_from_slice(&pack(Tag::Invalid, &slot.payload)),
        Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
    }
}

/// Finishes a proof at a node the descent cannot go past: either the
/// candidate's bit selected a dead end (`EMPTY` or a non-matching
/// `TERMINAL`), or both sides are `TERMINAL` and need disambiguating.
///
/// When both sides are terminal and share more prefix bits than `depth`
/// accounts for -- the canonical two-element shape left behind by a
/// collapse -- this synthesizes the chain of single-child `MIDDLE` nodes a
/// verifier needs to recompute the same hash the tree would have produced
/// had it never collapsed. Mirrors the reference engine's `_finish_proof`.
fn finish_proof(left: Slot, right: Slot, depth: u32, buf: &mut Vec<u8>) {
    if matches!(left.tag, Tag::Terminal) && matches!(right.tag, Tag::Terminal) {
        let bit_left = bit_at(&left.payload, depth);
        let bit_right = bit_at(&right.payload, depth);
        if bit_left == bit_right {
            buf.push(Tag::Middle.bits());
            if bit_left == 0 {
                finish_proof(left, right, depth + 1, buf);
                buf.push(Tag::Empty.bits());
            } else {
                buf.push(Tag::Empty.bits());
                finish_proof(left, right, depth + 1, buf);
            }
            return;
        }
    }
    buf.push(Tag::Middle.bits());
    push_summary(buf, left);
    push_summary(buf, right);
}

/// Walks a leaf subtree for a membership proof. Mirrors `_is_included_leaf`.
pub(crate) fn walk_leaf(leaf: &LeafBlock, tocheck: &Digest, pos: u16, depth: u32, buf: &mut Vec<u8>) -> bool {
    let node = *leaf.node(pos);
    if (matches!(node.left.tag, Tag::Terminal) && node.left.payload == *tocheck)
        || (matches!(node.right.tag, Tag::Terminal) && node.right.payload == *tocheck)
    {
        finish_proof(node.left, node.right, depth, buf);
        return true;
    }
    if bit_at(tocheck, depth) == 0 {
        match node.left.tag {
            Tag::Empty | Tag::Terminal => {
                finish_proof(node.left, node.right, depth, buf);
                false
            }
            Tag::Middle | Tag::Lazy => {
                buf.push(Tag::Middle.bits());
                let child = node.left_child.expect("middle/lazy slot needs a child");
                let found = walk_leaf(leaf, tocheck, child, depth + 1, buf);
                push_summary(buf, node.right);
                found
            }
            Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
        }
    } else {
        match node.right.tag {
            Tag::Empty | Tag::Terminal => {
                finish_proof(node.left, node.right, depth, buf);
                false
            }
            Tag::Middle | Tag::Lazy => {
                buf.push(Tag::Middle.bits());
                push_summary(buf, node.left);
                let child = node.right_child.expect("middle/lazy slot needs a child");
                walk_leaf(leaf, tocheck, child, depth + 1, buf)
            }
            Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
        }
    }
}

/// Walks the node at `(level, prefix)` of `handle`'s branch block, crossing
/// into nested branches or leaves through the edge array as needed. Mirrors
/// `_is_included_branch`.
fn walk_branch_level(
    store: &Store,
    tocheck: &Digest,
    handle: BranchHandle,
    level: u32,
    prefix: u32,
    depth: u32,
    buf: &mut Vec<u8>,
) -> bool {
    let node = *store.branch(handle).node(level, prefix);
    if (matches!(node.left.tag, Tag::Terminal) && node.left.payload == *tocheck)
        || (matches!(node.right.tag, Tag::Terminal) && node.right.payload == *tocheck)
    {
        finish_proof(node.left, node.right, depth, buf);
        return true;
    }
    let bit = bit_at(tocheck, depth);
    let (open_tag, sibling) = if bit == 0 {
        (node.left.tag, node.right)
    } else {
        (node.right.tag, node.left)
    };
    match open_tag {
        Tag::Empty | Tag::Terminal => {
            finish_proof(node.left, node.right, depth, buf);
            false
        }
        Tag::Middle | Tag::Lazy => {
            buf.push(Tag::Middle.bits());
            if bit == 0 {
                let found = open_child(store, tocheck, handle, level, prefix, true, depth, buf);
                push_summary(buf, sibling);
                found
            } else {
                push_summary(buf, sibling);
                open_child(store, tocheck, handle, level, prefix, false, depth, buf)
            }
        }
        Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
    }
}

fn open_child(
    store: &Store,
    tocheck: &Digest,
    handle: BranchHandle,
    level: u32,
    prefix: u32,
    left: bool,
    depth: u32,
    buf: &mut Vec<u8>,
) -> bool {
    let block = store.branch(handle);
    if block.children_are_edges(level) {
        let edge_index = if left { 2 * prefix } else { 2 * prefix + 1 };
        match block.edge(edge_index) {
            Edge::Branch(next) => walk_branch(store, tocheck, next, depth + 1, buf),
            Edge::Leaf(leaf, pos) => walk_leaf(store.leaf(leaf), tocheck, pos, depth + 1, buf),
            Edge::Empty => unreachable!("middle/lazy slot must have a populated edge"),
        }
    } else {
        let next_prefix = if left { 2 * prefix } else { 2 * prefix + 1 };
        walk_branch_level(store, tocheck, handle, level + 1, next_prefix, depth + 1, buf)
    }
}

/// Walks a whole branch block from its top node. Mirrors entering
/// `_is_included_branch` at `moddepth == depth`.
pub(crate) fn walk_branch(store: &Store, tocheck: &Digest, handle: BranchHandle, depth: u32, buf: &mut Vec<u8>) -> bool {
    walk_branch_level(store, tocheck, handle, 0, 0, depth, buf)
}

/// Builds the proof for `tocheck` against the set's root slot. The caller is
/// responsible for forcing the tree first, so that no `LAZY` hash is ever
/// serialized.
pub(crate) fn prove(store: &Store, root: Slot, root_branch: Option<BranchHandle>, tocheck: &Digest) -> (bool, Proof) {
    let mut buf = Vec::new();
    let found = match root.tag {
        Tag::Empty => {
            buf.push(Tag::Empty.bits());
            false
        }
        Tag::Terminal => {
            buf.extend_from_slice(&pack(Tag::Terminal, &root.payload));
            root.payload == *tocheck
        }
        Tag::Middle => {
            let handle = root_branch.expect("a MIDDLE root slot always has a branch");
            walk_branch(store, tocheck, handle, 0, &mut buf)
        }
        Tag::Lazy | Tag::Invalid => unreachable!("root must be forced before proving"),
    };
    (found, Proof::from_bytes(buf))
}

/// Why a proof failed to even parse. Not part of the public API: a
/// malformed proof is indistinguishable from a proof of the wrong fact to
/// every caller of `confirm_*`, matching the reference engine never letting
/// a deserialization error escape `_confirm`.
enum DecodeError {
    Truncated,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.bytes.get(self.pos).copied().ok_or(DecodeError::Truncated)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn finished(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// Decodes one slot's wire encoding, replaying the same bit-driven descent
/// the encoder used. `on_path` tracks whether this slot lies along
/// `tocheck`'s own route, so that the moment the route hits a dead end
/// (`EMPTY`, or a `TERMINAL` that is compared directly) the inclusion
/// verdict can be read off without knowing anything about how the proof
/// was produced. Returns the slot's packed form -- for feeding straight
/// into [`hash_pair`] one level up -- and, when `on_path`, the verdict.
fn decode_slot(cur: &mut Cursor, tocheck: &Digest, depth: u32, on_path: bool) -> Result<(Digest, Option<bool>), DecodeError> {
    let tag_byte = cur.peek()?;
    match Tag::from_bits(tag_byte) {
        Tag::Empty => {
            cur.take(1)?;
            Ok((BLANK, on_path.then_some(false)))
        }
        Tag::Terminal => {
            let bytes = cur.take(32)?;
            let mut packed = [0u8; 32];
            packed.copy_from_slice(bytes);
            let payload = {
                let mut p = packed;
                p[0] &= 0x3F;
                p
            };
            let verdict = on_path.then(|| payload == *tocheck);
            Ok((packed, verdict))
        }
        Tag::Middle => {
            cur.take(1)?;
            let want_left = on_path && bit_at(tocheck, depth) == 0;
            let want_right = on_path && bit_at(tocheck, depth) == 1;
            let (left, left_verdict) = decode_slot(cur, tocheck, depth + 1, want_left)?;
            let (right, right_verdict) = decode_slot(cur, tocheck, depth + 1, want_right)?;
            let hash = hash_pair(left, right);
            let verdict = left_verdict.or(right_verdict);
            Ok((pack(Tag::Middle, &hash), verdict))
        }
        Tag::Invalid | Tag::Lazy => {
            let bytes = cur.take(32)?;
            let mut packed = [0u8; 32];
            packed.copy_from_slice(bytes);
            Ok((packed, None))
        }
    }
}

/// Replays a proof's descent toward `tocheck`, recomputing the root hash it
/// implies and, along the way, whether `tocheck` was actually found.
/// Never panics on malformed input -- a bad encoding just fails to parse,
/// which every caller below treats as "not confirmed".
fn verify(bytes: &[u8], tocheck: &Digest) -> Option<(Digest, bool)> {
    let mut cur = Cursor::new(bytes);
    let (packed, verdict) = decode_slot(&mut cur, tocheck, 0, true).ok()?;
    if !cur.finished() {
        return None;
    }
    Some((packed, verdict.unwrap_or(false)))
}

/// Confirms that `proof` demonstrates `tocheck`'s inclusion under `root`.
#[must_use]
pub fn confirm_included_already_hashed(tocheck: &Digest, proof: &Proof, root: &Digest) -> bool {
    match verify(proof.as_bytes(), tocheck) {
        Some((packed, found)) => found && packed == *root,
        None => false,
    }
}

/// Confirms that `proof` demonstrates `tocheck`'s exclusion under `root`.
#[must_use]
pub fn confirm_not_included_already_hashed(tocheck: &Digest, proof: &Proof, root: &Digest) -> bool {
    match verify(proof.as_bytes(), tocheck) {
        Some((packed, found)) => !found && packed == *root,
        None => false,
    }
}

/// Hashes `raw` before confirming its inclusion, mirroring the
/// `add`/`remove` convenience overloads.
#[must_use]
pub fn confirm_included(raw: &[u8], proof: &Proof, root: &Digest) -> bool {
    confirm_included_already_hashed(&hash_leaf(raw), proof, root)
}

#[must_use]
pub fn confirm_not_included(raw: &[u8], proof: &Proof, root: &Digest) -> bool {
    confirm_not_included_already_hashed(&hash_leaf(raw), proof, root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_proof_round_trips() {
        let tocheck = crate::hash::canonicalize([7u8; 32]);
        let proof = Proof::from_bytes(vec![Tag::Empty.bits()]);
        assert!(confirm_not_included_already_hashed(&tocheck, &proof, &BLANK));
        assert!(!confirm_included_already_hashed(&tocheck, &proof, &BLANK));
    }

    #[test]
    fn truncated_proof_confirms_nothing() {
        let tocheck = crate::hash::canonicalize([7u8; 32]);
        let proof = Proof::from_bytes(vec![Tag::Middle.bits()]);
        assert!(!confirm_included_already_hashed(&tocheck, &proof, &BLANK));
        assert!(!confirm_not_included_already_hashed(&tocheck, &proof, &BLANK));
    }

    #[test]
    fn lone_root_terminal_proves_itself() {
        let tocheck = crate::hash::canonicalize([9u8; 32]);
        let root = pack(Tag::Terminal, &tocheck);
        let mut bytes = vec![];
        bytes.extend_from_slice(&root);
        let proof = Proof::from_bytes(bytes);
        assert!(confirm_included_already_hashed(&tocheck, &proof, &root));
        let other = crate::hash::canonicalize([1u8; 32]);
        assert!(!confirm_included_already_hashed(&other, &proof, &root));
    }
}
