//! Configuration structures for Arbor.

use crate::error::{ArborError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Shape parameters for a B+ tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Inner node half-capacity: non-root inner nodes hold
    /// `inner_order..=2*inner_order` separator keys.
    pub inner_order: usize,
    /// Leaf half-capacity: non-root leaves hold
    /// `leaf_order..=2*leaf_order` entries.
    pub leaf_order: usize,
    /// Verify page checksums when reading nodes.
    pub verify_checksums: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            inner_order: 64,
            leaf_order: 64,
            verify_checksums: true,
        }
    }
}

impl TreeConfig {
    /// Creates a config with the given orders and default flags.
    pub fn with_orders(inner_order: usize, leaf_order: usize) -> Self {
        Self {
            inner_order,
            leaf_order,
            ..Default::default()
        }
    }

    /// Maximum separator keys an inner node may hold.
    pub fn max_inner_keys(&self) -> usize {
        2 * self.inner_order
    }

    /// Maximum entries a leaf may hold.
    pub fn max_leaf_entries(&self) -> usize {
        2 * self.leaf_order
    }

    /// Checks that the orders describe a usable tree.
    pub fn validate(&self) -> Result<()> {
        if self.inner_order == 0 {
            return Err(ArborError::ConfigError(
                "inner_order must be positive".to_string(),
            ));
        }
        if self.leaf_order == 0 {
            return Err(ArborError::ConfigError(
                "leaf_order must be positive".to_string(),
            ));
        }
        if u32::try_from(self.inner_order).is_err() {
            return Err(ArborError::InvalidParameter {
                name: "inner_order".to_string(),
                value: self.inner_order.to_string(),
            });
        }
        if u32::try_from(self.leaf_order).is_err() {
            return Err(ArborError::InvalidParameter {
                name: "leaf_order".to_string(),
                value: self.leaf_order.to_string(),
            });
        }
        Ok(())
    }
}

/// Storage configuration for file-backed page stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}
