//! Key orderings for B+Tree keys.

use crate::btree::codec::PrefixKey;
use arbor_common::ComparatorTag;
use std::cmp::Ordering;

/// Total order over keys, plus the prefix match used by prefix search.
pub trait KeyComparator<K>: Send + Sync {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;

    /// Compares `key` against a search probe.
    ///
    /// Must be monotone in `key` with respect to `compare`: keys that sort
    /// before a matching key compare `Less`, keys after it `Greater`. The
    /// default is an exact comparison, so prefix search finds equal keys.
    fn compare_prefix(&self, key: &K, probe: &K) -> Ordering {
        self.compare(key, probe)
    }

    /// Identifies the ordering in persisted descriptors.
    fn tag(&self) -> ComparatorTag;
}

/// Ascending `Ord` order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }

    fn tag(&self) -> ComparatorTag {
        ComparatorTag::Natural
    }
}

/// Descending `Ord` order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseOrder;

impl<K: Ord> KeyComparator<K> for ReverseOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        b.cmp(a)
    }

    fn tag(&self) -> ComparatorTag {
        ComparatorTag::Reverse
    }
}

/// Byte-lexicographic order where a probe matches every key it prefixes.
///
/// `compare_prefix` looks only at the first `probe.len()` bytes of the key,
/// so `prefix_search(b"ab")` yields `ab`, `abc`, `abd` and so on.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixOrder;

impl<K: PrefixKey> KeyComparator<K> for PrefixOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.key_bytes().cmp(b.key_bytes())
    }

    fn compare_prefix(&self, key: &K, probe: &K) -> Ordering {
        let key = key.key_bytes();
        let probe = probe.key_bytes();
        key[..key.len().min(probe.len())].cmp(probe)
    }

    fn tag(&self) -> ComparatorTag {
        ComparatorTag::Prefix
    }
}
