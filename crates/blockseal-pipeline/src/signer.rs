//! The asynchronous block-hash signer boundary.
//!
//! The pipeline never inspects signature internals: it submits a composite
//! block hash and eventually receives opaque signature bytes through a
//! [`SignatureFuture`]. Signature callbacks may fire on arbitrary threads;
//! the proof finisher serializes them.

use crate::completion::Completion;
use blockseal_core::{Hash, Signature};

/// A completion that resolves to the signature over a submitted block hash.
pub type SignatureFuture = Completion<Signature>;

/// An opaque, asynchronous signer of block hashes.
pub trait BlockHashSigner: Send + Sync {
    /// Whether the node is currently capable of producing block signatures.
    /// Blocks are never closed by policy while this is `false`.
    fn is_ready(&self) -> bool;

    /// Identifier of the signing scheme, recorded in every finished proof.
    fn scheme_id(&self) -> u32;

    /// Submit a block hash for signing. The returned future resolves once a
    /// signature is available; an empty signature means the attempt failed
    /// and the block stays pending.
    fn sign(&self, block_hash: &Hash) -> SignatureFuture;
}
