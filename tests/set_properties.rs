//! Integration tests covering the set's core testable properties: root
//! determinism across insertion order and block geometry, inclusion/exclusion
//! proof soundness, idempotent add, and add/remove round trips checked with
//! the auditor after every mutation.

use blake2::{
    digest::consts::U32,
    Blake2s,
    Digest as _,
};
use patricia_merkle_set::{
    confirm_included_already_hashed,
    confirm_not_included_already_hashed,
    Set,
    BLANK,
};
use rand::{
    seq::SliceRandom,
    SeedableRng,
};

/// The 32-byte BLAKE2s digest of `i`'s 10-byte big-endian encoding, with the
/// two reserved tag bits masked off so it is ready to feed straight into
/// `*_already_hashed`.
fn h(i: u64) -> [u8; 32] {
    let mut buf = [0u8; 10];
    buf[2..].copy_from_slice(&i.to_be_bytes());
    let mut hasher = Blake2s::<U32>::new();
    hasher.update(buf);
    let mut out: [u8; 32] = hasher.finalize().into();
    out[0] &= 0x3F;
    out
}

fn build(depth: u32, leaf_units: u16, values: &[[u8; 32]]) -> Set {
    let mut set = Set::new(depth, leaf_units);
    for v in values {
        set.add_already_hashed(*v);
    }
    set
}

#[test]
fn empty_set_root_is_blank() {
    let mut set = Set::new(3, 16);
    assert_eq!(set.get_root(), BLANK);
}

#[test]
fn root_is_independent_of_insertion_order() {
    let values: Vec<[u8; 32]> = (0..300).map(h).collect();

    let mut forward = build(3, 16, &values);
    let forward_root = forward.get_root();

    let mut rng = rand::rngs::StdRng::seed_from_u64(0xA5A5_A5A5);
    let mut shuffled = values.clone();
    shuffled.shuffle(&mut rng);
    let mut permuted = build(3, 16, &shuffled);
    assert_eq!(permuted.get_root(), forward_root);

    let mut reversed_values = values;
    reversed_values.reverse();
    let mut reversed = build(3, 16, &reversed_values);
    assert_eq!(reversed.get_root(), forward_root);
}

#[test]
fn geometry_does_not_affect_root_or_inclusion() {
    let values: Vec<[u8; 32]> = (0..120).map(h).collect();
    let mut reference = build(4, 32, &values);
    let reference_root = reference.get_root();

    for depth in 1u32..=4 {
        for leaf_units in [1u16, 2, 4, 8, 16, 32] {
            let mut set = build(depth, leaf_units, &values);
            assert_eq!(
                set.get_root(),
                reference_root,
                "depth={depth} leaf_units={leaf_units} produced a different root for the same elements"
            );
            for v in values.iter().step_by(17) {
                let (found, proof) = set.is_included_already_hashed(v);
                assert!(found, "depth={depth} leaf_units={leaf_units}: element missing");
                assert!(confirm_included_already_hashed(v, &proof, &reference_root));
            }
            set.audit(&values);
        }
    }
}

#[test]
fn add_is_idempotent() {
    let values: Vec<[u8; 32]> = (0..50).map(h).collect();
    let mut set = build(3, 16, &values);
    let root_before = set.get_root();
    for v in &values {
        set.add_already_hashed(*v);
    }
    assert_eq!(set.get_root(), root_before);
    set.audit(&values);
}

#[test]
fn add_then_remove_round_trips_to_the_original_root_with_audits_between() {
    let base: Vec<[u8; 32]> = (0..200).map(h).collect();
    let mut set = build(4, 8, &base);
    set.audit(&base);
    let base_root = set.get_root();

    let transient: Vec<[u8; 32]> = (1_000..1_050).map(h).collect();
    for v in &transient {
        set.add_already_hashed(*v);
        let mut present: Vec<[u8; 32]> = base.clone();
        present.extend(transient.iter().take_while(|t| *t != v));
        present.push(*v);
    }
    let mut everything: Vec<[u8; 32]> = base.clone();
    everything.extend(transient.iter().copied());
    set.audit(&everything);

    for v in transient.iter().rev() {
        set.remove_already_hashed(*v);
    }
    set.audit(&base);
    assert_eq!(set.get_root(), base_root);
}

#[test]
fn inclusion_and_exclusion_proofs_are_sound() {
    let values: Vec<[u8; 32]> = (0..500).map(h).collect();
    let mut set = build(3, 16, &values);
    let root = set.get_root();

    for v in values.iter().step_by(31) {
        let (found, proof) = set.is_included_already_hashed(v);
        assert!(found);
        assert!(confirm_included_already_hashed(v, &proof, &root));
        assert!(!confirm_not_included_already_hashed(v, &proof, &root));
    }

    for i in 10_000u64..10_010 {
        let absent = h(i);
        let (found, proof) = set.is_included_already_hashed(&absent);
        assert!(!found);
        assert!(confirm_not_included_already_hashed(&absent, &proof, &root));
        assert!(!confirm_included_already_hashed(&absent, &proof, &root));
    }
}

#[test]
fn tampering_with_a_proof_byte_breaks_verification() {
    let values: Vec<[u8; 32]> = (0..64).map(h).collect();
    let mut set = build(3, 16, &values);
    let root = set.get_root();
    let (found, proof) = set.is_included_already_hashed(&values[10]);
    assert!(found);
    assert!(confirm_included_already_hashed(&values[10], &proof, &root));

    let mut bytes = proof.into_bytes();
    assert!(!bytes.is_empty());
    let flip_at = bytes.len() / 2;
    bytes[flip_at] ^= 0x01;
    let tampered = patricia_merkle_set::Proof::from(bytes);
    assert!(!confirm_included_already_hashed(&values[10], &tampered, &root));
}

#[test]
fn singleton_and_pair_roots_differ_from_empty() {
    let mut set = Set::new(3, 16);
    assert_eq!(set.get_root(), BLANK);
    set.add_already_hashed(h(1));
    let singleton_root = set.get_root();
    assert_ne!(singleton_root, BLANK);
    set.add_already_hashed(h(2));
    let pair_root = set.get_root();
    assert_ne!(pair_root, singleton_root);
    set.remove_already_hashed(h(2));
    assert_eq!(set.get_root(), singleton_root);
    set.remove_already_hashed(h(1));
    assert_eq!(set.get_root(), BLANK);
}
