//! The set's public surface: per-instance root bookkeeping layered on top of
//! the block arenas in `store.rs` and the tree operations in `ops.rs`.
//!
//! Every mutation marks the root `LAZY` rather than recomputing its hash
//! immediately; [`Set::get_root`] and [`Set::is_included`] force it first.
//! [`Set::audit`] does not, since it tolerates a `LAZY` slot anywhere in the
//! tree by skipping the hash check underneath it.

use crate::branch::BranchHandle;
use crate::hash::{
    self,
    Digest,
    Tag,
    BLANK,
};
use crate::leaf::{
    AddResult,
    RemoveResult,
    Slot,
};
use crate::ops;
use crate::proof::{
    self,
    Proof,
};
use crate::store::Store;

/// An authenticated set of 256-bit digests, backed by a packed-patricia
/// tree.
///
/// `depth` controls how many balanced levels each branch block holds inline
/// before bottoming out into nested branches or leaves; `leaf_units`
/// controls how many node cells each leaf block can hold. Two sets built
/// with different `(depth, leaf_units)` geometry but the same elements
/// always agree on [`Set::get_root`], and on every proof [`Set::is_included`]
/// produces.
///
/// # Examples
/// ```
/// use patricia_merkle_set::Set;
///
/// let mut set = Set::new(4, 32);
/// set.add(b"alice");
/// set.add(b"bob");
/// let root = set.get_root();
/// let (included, proof) = set.is_included(b"alice");
/// assert!(included);
/// assert!(patricia_merkle_set::confirm_included(b"alice", &proof, &root));
/// ```
pub struct Set {
    store: Store,
    root_tag: Tag,
    root_payload: Digest,
    root_branch: Option<BranchHandle>,
}

impl Set {
    /// Builds an empty set with the given block geometry.
    ///
    /// # Panics
    /// Panics if `depth` or `leaf_units` is zero: both must allow at least
    /// one level of real structure.
    #[must_use]
    pub fn new(depth: u32, leaf_units: u16) -> Self {
        assert!(depth >= 1, "branch depth must be at least 1");
        assert!(leaf_units >= 1, "leaf_units must be at least 1");
        Self {
            store: Store::new(depth, leaf_units),
            root_tag: Tag::Empty,
            root_payload: BLANK,
            root_branch: None,
        }
    }

    /// Hashes `raw` and adds it to the set. Idempotent: adding the same
    /// bytes twice leaves the set unchanged.
    pub fn add(&mut self, raw: &[u8]) {
        self.add_already_hashed(hash::hash_leaf(raw));
    }

    /// Adds an already-canonical digest directly, skipping the convenience
    /// hashing [`Set::add`] does. Idempotent.
    pub fn add_already_hashed(&mut self, toadd: Digest) {
        let toadd = hash::canonicalize(toadd);
        match self.root_tag {
            Tag::Empty => {
                self.root_tag = Tag::Terminal;
                self.root_payload = toadd;
            }
            Tag::Terminal => {
                if self.root_payload == toadd {
                    return;
                }
                let handle = self.store.allocate_branch();
                let mut things = [toadd, self.root_payload];
                ops::insert_pair_at_root(&mut self.store, handle, &mut things);
                self.root_tag = Tag::Lazy;
                self.root_branch = Some(handle);
            }
            Tag::Middle | Tag::Lazy => {
                let handle = self.root_branch.expect("a non-terminal root must reference its branch block");
                match ops::add_to_branch(&mut self.store, handle, &toadd, 0) {
                    AddResult::Invalidating => self.root_tag = Tag::Lazy,
                    AddResult::Done => {}
                    AddResult::Full => unreachable!("leaf/branch overflow is always absorbed before reaching the root"),
                }
            }
            Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
        }
    }

    /// Hashes `raw` and removes it from the set. A no-op if it was not
    /// present.
    pub fn remove(&mut self, raw: &[u8]) {
        self.remove_already_hashed(hash::hash_leaf(raw));
    }

    /// Removes an already-canonical digest directly, skipping the
    /// convenience hashing [`Set::remove`] does. A no-op if it was not
    /// present.
    pub fn remove_already_hashed(&mut self, toremove: Digest) {
        let toremove = hash::canonicalize(toremove);
        match self.root_tag {
            Tag::Empty => {}
            Tag::Terminal => {
                if self.root_payload == toremove {
                    self.root_tag = Tag::Empty;
                    self.root_payload = BLANK;
                }
            }
            Tag::Middle | Tag::Lazy => {
                let handle = self.root_branch.expect("a non-terminal root must reference its branch block");
                match ops::remove_from_branch(&mut self.store, handle, &toremove, 0) {
                    RemoveResult::Done => {}
                    RemoveResult::Invalidating => self.root_tag = Tag::Lazy,
                    RemoveResult::OneLeft(val) => {
                        self.root_tag = Tag::Terminal;
                        self.root_payload = val;
                        self.root_branch = None;
                    }
                    RemoveResult::Fragile => {
                        // the root has no parent node to catch it automatically.
                        ops::catch_root(&mut self.store, handle);
                        self.root_tag = Tag::Lazy;
                    }
                }
            }
            Tag::Invalid => unreachable!("Invalid tag never appears in storage"),
        }
    }

    /// Recomputes and caches the hash of every subtree a mutation since the
    /// last call has marked stale.
    fn force(&mut self) {
        if matches!(self.root_tag, Tag::Lazy) {
            let handle = self.root_branch.expect("a lazy root must reference its branch block");
            self.root_payload = ops::force_branch(&mut self.store, handle);
            self.root_tag = Tag::Middle;
        }
    }

    /// The set's current root: [`hash::BLANK`] for the empty set, the sole
    /// element (tagged `TERMINAL`) for a singleton, and a `MIDDLE`-tagged
    /// subtree hash otherwise -- packed the same way any other slot in the
    /// tree is packed, so it can be fed straight into [`confirm_included`]
    /// or [`confirm_not_included`]. Forces any pending lazy recomputation
    /// first.
    #[must_use]
    pub fn get_root(&mut self) -> Digest {
        self.force();
        match self.root_tag {
            Tag::Empty => BLANK,
            Tag::Terminal => hash::pack(Tag::Terminal, &self.root_payload),
            Tag::Middle => hash::pack(Tag::Middle, &self.root_payload),
            Tag::Lazy | Tag::Invalid => unreachable!("force just resolved this"),
        }
    }

    /// Hashes `raw` and checks its membership, returning both the verdict
    /// and a proof a third party can check against [`Set::get_root`]'s
    /// return value without access to the tree itself.
    pub fn is_included(&mut self, raw: &[u8]) -> (bool, Proof) {
        let tocheck = hash::hash_leaf(raw);
        self.is_included_already_hashed(&tocheck)
    }

    /// Checks an already-canonical digest's membership directly, skipping
    /// the convenience hashing [`Set::is_included`] does.
    pub fn is_included_already_hashed(&mut self, tocheck: &Digest) -> (bool, Proof) {
        self.force();
        let tocheck = hash::canonicalize(*tocheck);
        let root = Slot {
            tag: self.root_tag,
            payload: self.root_payload,
        };
        proof::prove(&self.store, root, self.root_branch, &tocheck)
    }

    /// Checks every structural invariant of the tree and confirms its
    /// terminal values are exactly `expected`. Exists for tests: never
    /// called on the add/remove/is_included hot path, and does not require
    /// a prior [`Set::get_root`] since it tolerates an un-forced tree,
    /// skipping the hash check under any `LAZY` slot it walks past.
    ///
    /// # Panics
    /// Panics with a descriptive message on the first invariant violation
    /// found.
    pub fn audit(&self, expected: &[Digest]) {
        let root = Slot {
            tag: self.root_tag,
            payload: self.root_payload,
        };
        crate::audit::audit(&self.store, root, self.root_branch, expected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{
        confirm_included_already_hashed,
        confirm_not_included_already_hashed,
    };

    fn key(byte: u8) -> Digest {
        hash::canonicalize([byte; 32])
    }

    #[test]
    fn empty_set_has_blank_root() {
        let mut set = Set::new(3, 8);
        assert_eq!(set.get_root(), BLANK);
    }

    #[test]
    fn singleton_root_is_the_element_itself_tagged_terminal() {
        let mut set = Set::new(3, 8);
        set.add_already_hashed(key(1));
        assert_eq!(set.get_root(), hash::pack(Tag::Terminal, &key(1)));
    }

    #[test]
    fn add_is_idempotent() {
        let mut set = Set::new(3, 8);
        set.add_already_hashed(key(1));
        set.add_already_hashed(key(2));
        let root = set.get_root();
        set.add_already_hashed(key(1));
        assert_eq!(set.get_root(), root);
    }

    #[test]
    fn add_then_remove_round_trips_to_the_same_root() {
        let mut set = Set::new(3, 8);
        let values: Vec<Digest> = (0..50).map(key).collect();
        for v in &values {
            set.add_already_hashed(*v);
        }
        let full_root = set.get_root();
        set.add_already_hashed(key(200));
        set.remove_already_hashed(key(200));
        assert_eq!(set.get_root(), full_root);
    }

    #[test]
    fn is_included_reports_membership_and_verifiable_proofs() {
        let mut set = Set::new(3, 8);
        let values: Vec<Digest> = (0..30).map(key).collect();
        for v in &values {
            set.add_already_hashed(*v);
        }
        let root = set.get_root();
        let (found, proof) = set.is_included_already_hashed(&values[5]);
        assert!(found);
        assert!(confirm_included_already_hashed(&values[5], &proof, &root));

        let absent = hash::canonicalize([250u8; 32]);
        let (found, proof) = set.is_included_already_hashed(&absent);
        assert!(!found);
        assert!(confirm_not_included_already_hashed(&absent, &proof, &root));
    }

    #[test]
    fn audit_passes_after_a_sequence_of_adds_and_removes() {
        let mut set = Set::new(2, 4);
        let values: Vec<Digest> = (0..60).map(key).collect();
        for v in &values {
            set.add_already_hashed(*v);
        }
        for v in &values[..20] {
            set.remove_already_hashed(*v);
        }
        set.audit(&values[20..]);
    }

    #[test]
    fn different_geometries_agree_on_root_and_membership() {
        let values: Vec<Digest> = (0..80).map(key).collect();
        let mut reference = Set::new(4, 16);
        for v in &values {
            reference.add_already_hashed(*v);
        }
        let reference_root = reference.get_root();

        for depth in [1u32, 2, 3] {
            for leaf_units in [1u16, 2, 8] {
                let mut set = Set::new(depth, leaf_units);
                for v in &values {
                    set.add_already_hashed(*v);
                }
                assert_eq!(set.get_root(), reference_root, "depth={depth} leaf_units={leaf_units}");
            }
        }
    }
}
