//! Ordering policies.
//!
//! A tree never stores keys. It asks its [`KeyOrder`] to derive a node's key
//! from the caller's record and to compare keys. One policy is bound to a
//! tree for its whole lifetime; swapping to a different order on a non-empty
//! tree is undefined.

use std::cmp::Ordering;

use crate::addr::Pos;
use crate::node;
use crate::region::Region;

pub trait KeyOrder {
    type Key;

    /// Key of the record behind the node at `node`.
    fn key<R: Region>(&self, region: &R, node: Pos) -> Self::Key;

    fn key_compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;

    /// Step `key` to its immediate successor.
    ///
    /// Past the maximum key this must wrap to one less than the minimum legal
    /// key and return `true`; otherwise return `false`. Only free-key search
    /// calls this.
    fn key_increment(&self, key: &mut Self::Key) -> bool;

    /// Order of the node's key relative to `key`.
    ///
    /// Override when a record can be compared without materializing its key.
    #[inline]
    fn compare<R: Region>(&self, region: &R, node: Pos, key: &Self::Key) -> Ordering {
        self.key_compare(&self.key(region, node), key)
    }
}

/// `u64` keys stored little-endian in the first 8 bytes of each payload
/// record, drawn from `min..=max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct U64Keys {
    min: u64,
    max: u64,
}

impl U64Keys {
    /// # Panics
    /// Panics unless `1 <= min <= max`; `min - 1` is the wrap value.
    pub fn new(min: u64, max: u64) -> Self {
        assert!(min >= 1, "minimum key must leave room for the wrap value");
        assert!(min <= max, "empty key range {min}..={max}");
        Self { min, max }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl Default for U64Keys {
    fn default() -> Self {
        Self::new(1, u64::MAX)
    }
}

impl KeyOrder for U64Keys {
    type Key = u64;

    #[inline]
    fn key<R: Region>(&self, region: &R, node: Pos) -> u64 {
        let record = node::payload(region, node).expect("keyed node must carry a payload");
        region.read_u64(record)
    }

    #[inline]
    fn key_compare(&self, a: &u64, b: &u64) -> Ordering {
        a.cmp(b)
    }

    #[inline]
    fn key_increment(&self, key: &mut u64) -> bool {
        if *key >= self.max {
            *key = self.min - 1;
            true
        } else {
            *key += 1;
            false
        }
    }
}
