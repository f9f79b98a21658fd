use std::collections::BTreeSet;

use fixedbitset::FixedBitSet;

/// Scalar element type of an explicit-set partition value, shared by the
/// backends that need to parameterize over it (Redis, SQL-table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    Int,
    Text,
}

/// A stored partition-key set, in one of the two encodings the cache
/// contract supports.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Explicit set of integer partition-key values.
    IntSet(BTreeSet<i64>),
    /// Explicit set of text partition-key values.
    TextSet(BTreeSet<String>),
    /// Bitmap over `[0, bitsize)`, for integer partition keys with a
    /// declared domain.
    Bitmap { bits: FixedBitSet, bitsize: u32 },
}

impl CacheValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CacheValue::IntSet(s) => s.is_empty(),
            CacheValue::TextSet(s) => s.is_empty(),
            CacheValue::Bitmap { bits, .. } => bits.count_ones(..) == 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::IntSet(_) => "int_set",
            CacheValue::TextSet(_) => "text_set",
            CacheValue::Bitmap { .. } => "bitmap",
        }
    }

    /// Intersect with another value of the same variant. Returns `None` on
    /// a variant mismatch — callers are expected to keep a single encoding
    /// per partition namespace, enforced at the registry layer.
    pub fn intersect(&self, other: &CacheValue) -> Option<CacheValue> {
        match (self, other) {
            (CacheValue::IntSet(a), CacheValue::IntSet(b)) => {
                Some(CacheValue::IntSet(a.intersection(b).cloned().collect()))
            }
            (CacheValue::TextSet(a), CacheValue::TextSet(b)) => {
                Some(CacheValue::TextSet(a.intersection(b).cloned().collect()))
            }
            (
                CacheValue::Bitmap { bits: a, bitsize },
                CacheValue::Bitmap { bits: b, .. },
            ) => {
                let mut out = a.clone();
                out.intersect_with(b);
                Some(CacheValue::Bitmap {
                    bits: out,
                    bitsize: *bitsize,
                })
            }
            _ => None,
        }
    }
}

/// Outcome of a read against a cache backend: an explicit three-way
/// result rather than exception-driven miss handling.
#[derive(Debug, Clone, PartialEq)]
pub enum GetResult<V> {
    /// Present and non-null.
    Hit(V),
    /// Present and recorded as "evaluated, no constraint".
    Null,
    /// No entry for this key.
    Miss,
}

impl<V> GetResult<V> {
    pub fn is_present(&self) -> bool {
        !matches!(self, GetResult::Miss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_set_intersection() {
        let a = CacheValue::IntSet(BTreeSet::from([1, 2, 3]));
        let b = CacheValue::IntSet(BTreeSet::from([2, 3, 4]));
        let i = a.intersect(&b).unwrap();
        assert_eq!(i, CacheValue::IntSet(BTreeSet::from([2, 3])));
    }

    #[test]
    fn mismatched_variants_do_not_intersect() {
        let a = CacheValue::IntSet(BTreeSet::from([1]));
        let b = CacheValue::TextSet(BTreeSet::from(["x".to_string()]));
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn bitmap_intersection() {
        let mut a = FixedBitSet::with_capacity(8);
        a.insert(1);
        a.insert(2);
        let mut b = FixedBitSet::with_capacity(8);
        b.insert(2);
        b.insert(3);
        let va = CacheValue::Bitmap { bits: a, bitsize: 8 };
        let vb = CacheValue::Bitmap { bits: b, bitsize: 8 };
        let result = va.intersect(&vb).unwrap();
        match result {
            CacheValue::Bitmap { bits, .. } => {
                assert_eq!(bits.count_ones(..), 1);
                assert!(bits.contains(2));
            }
            _ => panic!("expected bitmap"),
        }
    }
}
