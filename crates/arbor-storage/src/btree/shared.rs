//! Thread-shareable tree handle.

use crate::btree::codec::Field;
use crate::btree::stats::TreeStats;
use crate::btree::tree::BPlusTree;
use arbor_common::Result;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// A tree behind a reader-writer lock.
///
/// Cursors and scans run under a read guard, so no split or merge can
/// rewrite the nodes they hold open. Mutations take the write guard.
pub struct SharedTree<K, V> {
    inner: Arc<RwLock<BPlusTree<K, V>>>,
}

impl<K, V> Clone for SharedTree<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Field, V: Field> SharedTree<K, V> {
    pub fn new(tree: BPlusTree<K, V>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tree)),
        }
    }

    /// Acquires shared access, for lookups, scans and cursors.
    pub fn read(&self) -> RwLockReadGuard<'_, BPlusTree<K, V>> {
        self.inner.read()
    }

    /// Acquires exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, BPlusTree<K, V>> {
        self.inner.write()
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.read().get(key)
    }

    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.write().put(key, value)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.write().remove(key)
    }

    pub fn len(&self) -> u64 {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn stats(&self) -> TreeStats {
        self.inner.read().stats()
    }
}
