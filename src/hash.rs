//! The tagged 256-bit digest used throughout the set, and the bit accessor
//! that turns a digest into a path through the patricia tree.
//!
//! Two bits are carved out of the first byte of every digest to record
//! whether a slot is empty, a set element, or a subtree summary (see
//! [`Tag`]). The remaining 254 bits are what membership is actually decided
//! on: [`bit_at`] always skips the first two bit positions of a digest, so a
//! digest's own tag bits never influence the tree shape.

use blake2::{
    digest::consts::U32,
    Blake2s,
    Digest as _,
};

/// A canonicalized 256-bit value stored in the tree: the top two bits of the
/// first byte are always zero so that [`pack`] can overlay a [`Tag`] without
/// losing any of the 254 bits that are actually compared and ordered.
pub type Digest = [u8; 32];

/// The all-zero digest used for empty slots and the empty set's root.
pub const BLANK: Digest = [0u8; 32];

/// The type tag of a slot, packed into the top two bits of its first byte on
/// the wire and in hash preimages.
///
/// `Lazy` only ever appears on the in-memory `MIDDLE` side of things: it
/// marks a subtree hash that mutated since it was last computed. It is never
/// written to the wire format, where an unvalidated subtree is serialized as
/// [`Tag::Invalid`] instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Empty,
    Terminal,
    Middle,
    Lazy,
    /// Wire-only: a `MIDDLE` subtree the proof declines to open further.
    Invalid,
}

impl Tag {
    pub(crate) const fn bits(self) -> u8 {
        match self {
            Tag::Empty => 0x00,
            Tag::Terminal => 0x40,
            Tag::Middle => 0x80,
            Tag::Lazy | Tag::Invalid => 0xC0,
        }
    }

    pub(crate) const fn from_bits(bits: u8) -> Tag {
        match bits & 0xC0 {
            0x00 => Tag::Empty,
            0x40 => Tag::Terminal,
            0x80 => Tag::Middle,
            _ => Tag::Invalid,
        }
    }

    pub(crate) const fn is_empty(self) -> bool {
        matches!(self, Tag::Empty)
    }

    pub(crate) const fn is_terminal(self) -> bool {
        matches!(self, Tag::Terminal)
    }
}

/// Masks off the two reserved tag bits, as happens to every hash before it is
/// allowed into the tree.
#[must_use]
pub(crate) fn canonicalize(mut raw: Digest) -> Digest {
    raw[0] &= 0x3F;
    raw
}

/// Overlays `tag` onto the top two bits of `payload`, producing the 32-byte
/// form used both in hash preimages and in the proof wire format.
#[must_use]
pub(crate) fn pack(tag: Tag, payload: &Digest) -> Digest {
    let mut out = *payload;
    out[0] = (out[0] & 0x3F) | tag.bits();
    out
}

/// Splits a packed 32-byte wire value back into its tag and payload.
#[must_use]
pub(crate) fn unpack(packed: &Digest) -> (Tag, Digest) {
    let tag = Tag::from_bits(packed[0]);
    (tag, canonicalize(*packed))
}

/// Extracts bit `i` of `key`, skipping the two reserved tag bits so that
/// descent indexes on the 254 bits of real entropy.
#[must_use]
pub fn bit_at(key: &Digest, i: u32) -> u8 {
    let pos = i as usize + 2;
    (key[pos / 8] >> (7 - pos % 8)) & 1
}

/// Hashes two packed slots down into their parent's `MIDDLE` payload.
///
/// Mirrors `hashdown` from the reference implementation: the preimage is the
/// concatenation of both children's packed 32-byte forms, hashed with
/// BLAKE2s, canonicalized back down to 254 usable bits.
#[must_use]
pub(crate) fn hash_pair(left: Digest, right: Digest) -> Digest {
    let mut hasher = Blake2s::<U32>::new();
    hasher.update(left);
    hasher.update(right);
    let out = hasher.finalize();
    canonicalize(out.into())
}

/// Hashes raw user-supplied bytes down to the digest used as a set element.
///
/// Backs the convenience `add`/`remove`/`is_included` overloads, which
/// pre-hash with SHA-256 before delegating to the `_already_hashed` entry
/// points.
#[must_use]
pub fn hash_leaf(raw: &[u8]) -> Digest {
    use sha2::{
        Digest as _,
        Sha256,
    };
    let digest: [u8; 32] = Sha256::digest(raw).into();
    canonicalize(digest)
}

/// Validates the invariants `hashaudit` checks on a node's two slots before
/// hashing them down, panicking on violation.
///
/// These are bugs in the engine, never user error, so they are only checked
/// in debug builds -- matching how `audit` is meant to catch them during
/// testing rather than in production traffic.
pub(crate) fn debug_check_pair(l_tag: Tag, l_hash: &Digest, r_tag: Tag, r_hash: &Digest) {
    debug_assert!(!matches!(l_tag, Tag::Lazy) && !matches!(r_tag, Tag::Lazy));
    if (l_tag.is_empty() || l_tag.is_terminal()) && (r_tag.is_empty() || r_tag.is_terminal()) {
        debug_assert!(l_tag.is_terminal() && r_tag.is_terminal());
        debug_assert!(l_hash < r_hash);
    }
    debug_assert!(!l_tag.is_empty() || *l_hash == BLANK);
    debug_assert!(!r_tag.is_empty() || *r_hash == BLANK);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let payload = canonicalize([0xAB; 32]);
        for tag in [Tag::Empty, Tag::Terminal, Tag::Middle, Tag::Invalid] {
            let packed = pack(tag, &payload);
            let (got_tag, got_payload) = unpack(&packed);
            assert_eq!(got_tag, tag);
            assert_eq!(got_payload, payload);
        }
    }

    #[test]
    fn bit_at_skips_tag_bits() {
        let key = canonicalize([0xFF; 32]);
        // the first two bit positions of byte 0 are never read by bit_at
        for i in 0..254 {
            let _ = bit_at(&key, i);
        }
        assert_eq!(bit_at(&key, 0), 1);
    }

    #[test]
    fn hash_pair_is_deterministic() {
        let a = canonicalize([1u8; 32]);
        let b = canonicalize([2u8; 32]);
        assert_eq!(hash_pair(a, b), hash_pair(a, b));
        assert_ne!(hash_pair(a, b), hash_pair(b, a));
    }
}
