//! Canonical scalar types shared across the workspace.
//!
//! All hashing in the block stream uses a fixed 48-byte (SHA-384-sized)
//! digest, so [`Hash`] is a fixed-width newtype rather than a `Vec<u8>`.
//! Serde support is hand-written because derive stops at 32-element arrays.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Width of every hash in the block stream, in bytes.
pub const HASH_SIZE: usize = 48;

/// A fixed-length 48-byte hash value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    /// The all-zero hash, used as a structural placeholder and as the
    /// previous-block hash of the genesis block.
    pub const NULL: Self = Self([0u8; HASH_SIZE]);

    /// Borrow the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Construct from a slice, failing on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let arr: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected {HASH_SIZE} hash bytes, got {}", bytes.len()))?;
        Ok(Self(arr))
    }

    /// Whether this is the all-zero placeholder.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Lowercase hex rendering of the full digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Abbreviated form keeps queue/pipeline logs readable.
        write!(f, "Hash({}..)", &self.to_hex()[..12])
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct HashVisitor;

impl<'de> Visitor<'de> for HashVisitor {
    type Value = Hash;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{HASH_SIZE} hash bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Hash, E> {
        Hash::from_slice(v).map_err(E::custom)
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Hash, A::Error> {
        // JSON encodes `serialize_bytes` as a number array.
        let mut out = [0u8; HASH_SIZE];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        if seq.next_element::<u8>()?.is_some() {
            return Err(de::Error::custom("trailing hash bytes"));
        }
        Ok(Hash(out))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(HashVisitor)
    }
}

/// An opaque signature produced by the consensus signing scheme.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// Whether the signature carries no bytes (never valid as a proof).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// A consensus timestamp: seconds and nanoseconds since the UNIX epoch.
///
/// Ordering is lexicographic on `(seconds, nanos)`, which is correct for
/// normalized values (`0 <= nanos < 1_000_000_000`).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds since the epoch.
    pub seconds: i64,
    /// Nanosecond remainder.
    pub nanos: i32,
}

impl Timestamp {
    /// The UNIX epoch; used as the "never handled anything" sentinel.
    pub const EPOCH: Self = Self { seconds: 0, nanos: 0 };

    /// Construct a normalized timestamp.
    #[inline]
    #[must_use]
    pub const fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Elapsed time since `earlier`, saturating to zero if `earlier` is later.
    #[must_use]
    pub fn duration_since(&self, earlier: &Self) -> Duration {
        let secs = self.seconds - earlier.seconds;
        let nanos = i64::from(self.nanos) - i64::from(earlier.nanos);
        let total = secs * 1_000_000_000 + nanos;
        if total <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(total as u64)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// A consensus round marker handed to the pipeline by the execution layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundInfo {
    /// Monotonically increasing round number (1-based).
    pub number: u64,
    /// The round's consensus timestamp.
    pub consensus_time: Timestamp,
    /// Consensus timestamp of the round's first transaction, if any.
    pub first_transaction_time: Option<Timestamp>,
    /// Whether this round is the designated freeze round.
    pub is_freeze_round: bool,
}

impl RoundInfo {
    /// The timestamp a block opened by this round is stamped with.
    #[inline]
    #[must_use]
    pub fn block_timestamp(&self) -> Timestamp {
        self.first_transaction_time.unwrap_or(self.consensus_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_from_slice_rejects_wrong_length() {
        assert!(Hash::from_slice(&[0u8; 47]).is_err());
        assert!(Hash::from_slice(&[0u8; 48]).is_ok());
    }

    #[test]
    fn hash_serde_roundtrip_json_and_cbor() {
        let h = Hash([7u8; HASH_SIZE]);
        let json = serde_json::to_vec(&h).unwrap();
        let back: Hash = serde_json::from_slice(&json).unwrap();
        assert_eq!(h, back);

        let mut cbor = Vec::new();
        ciborium::ser::into_writer(&h, &mut cbor).unwrap();
        let back: Hash = ciborium::de::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn timestamp_duration_since() {
        let a = Timestamp::new(10, 500_000_000);
        let b = Timestamp::new(12, 250_000_000);
        assert_eq!(b.duration_since(&a), Duration::from_millis(1750));
        assert_eq!(a.duration_since(&b), Duration::ZERO);
    }

    #[test]
    fn timestamp_ordering() {
        assert!(Timestamp::new(1, 999_999_999) < Timestamp::new(2, 0));
        assert!(Timestamp::new(2, 1) > Timestamp::new(2, 0));
    }
}
