//! Domain-separated node hashing.
//!
//! Every tree node is hashed with a one-byte prefix so leaves can never be
//! confused with internal nodes: `0x00` leaf, `0x01` internal node with a
//! single child, `0x02` two-child internal node. [`combine`] is the odd one
//! out: it joins two *already hashed* subtree roots with no prefix and is
//! used only when composing a block's composite root. Mixing it up with
//! [`hash_internal_node`] produces an incompatible tree.

use blockseal_core::Hash;
use sha2::{Digest, Sha384};
use std::sync::OnceLock;

/// Prefix byte for leaf hashes.
pub const LEAF_PREFIX: u8 = 0x00;
/// Prefix byte for internal nodes with a single child.
pub const SINGLE_CHILD_PREFIX: u8 = 0x01;
/// Prefix byte for two-child internal nodes.
pub const INTERNAL_NODE_PREFIX: u8 = 0x02;

#[inline]
fn finalize(digest: Sha384) -> Hash {
    let out = digest.finalize();
    let mut bytes = [0u8; blockseal_core::HASH_SIZE];
    bytes.copy_from_slice(&out);
    Hash(bytes)
}

/// Hash a leaf: `sha384(0x00 || data)`.
#[must_use]
pub fn hash_leaf(data: &[u8]) -> Hash {
    let mut d = Sha384::new();
    d.update([LEAF_PREFIX]);
    d.update(data);
    finalize(d)
}

/// Hash a two-child internal node: `sha384(0x02 || left || right)`.
#[must_use]
pub fn hash_internal_node(left: &Hash, right: &Hash) -> Hash {
    let mut d = Sha384::new();
    d.update([INTERNAL_NODE_PREFIX]);
    d.update(left.as_bytes());
    d.update(right.as_bytes());
    finalize(d)
}

/// Hash an internal node with a single child: `sha384(0x01 || child)`.
#[must_use]
pub fn hash_internal_node_single_child(child: &Hash) -> Hash {
    let mut d = Sha384::new();
    d.update([SINGLE_CHILD_PREFIX]);
    d.update(child.as_bytes());
    finalize(d)
}

/// Join two pre-hashed subtree roots with **no** prefix:
/// `sha384(left || right)`.
#[must_use]
pub fn combine(left: &Hash, right: &Hash) -> Hash {
    let mut d = Sha384::new();
    d.update(left.as_bytes());
    d.update(right.as_bytes());
    finalize(d)
}

/// The root hash of a tree with zero leaves.
///
/// This is itself a leaf hash (of the empty byte string); callers must not
/// re-hash it.
#[must_use]
pub fn empty_tree_hash() -> Hash {
    static EMPTY: OnceLock<Hash> = OnceLock::new();
    *EMPTY.get_or_init(|| hash_leaf(&[]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_separate_domains() {
        let h = hash_leaf(b"x");
        assert_ne!(hash_internal_node(&h, &h), combine(&h, &h));
        assert_ne!(hash_internal_node_single_child(&h), hash_leaf(h.as_bytes()));
    }

    #[test]
    fn leaf_hash_matches_manual_digest() {
        use sha2::{Digest, Sha384};
        let mut d = Sha384::new();
        d.update([0u8]);
        d.update(b"payload");
        let expect = d.finalize();
        assert_eq!(hash_leaf(b"payload").as_bytes()[..], expect[..]);
    }

    #[test]
    fn combine_has_no_prefix() {
        use sha2::{Digest, Sha384};
        let a = hash_leaf(b"a");
        let b = hash_leaf(b"b");
        let mut d = Sha384::new();
        d.update(a.as_bytes());
        d.update(b.as_bytes());
        let expect = d.finalize();
        assert_eq!(combine(&a, &b).as_bytes()[..], expect[..]);
    }

    #[test]
    fn empty_tree_hash_is_a_leaf_hash() {
        assert_eq!(empty_tree_hash(), hash_leaf(&[]));
    }

    #[test]
    fn single_child_differs_from_pair_with_null() {
        let h = hash_leaf(b"only");
        assert_ne!(
            hash_internal_node_single_child(&h),
            hash_internal_node(&h, &blockseal_core::Hash::NULL)
        );
    }
}
