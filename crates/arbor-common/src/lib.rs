//! Arbor common types, errors, and utilities.
//!
//! This crate provides shared definitions used by the Arbor storage crate.

pub mod config;
pub mod error;
pub mod page;
pub mod types;

pub use config::{StorageConfig, TreeConfig};
pub use error::{ArborError, Result};
pub use page::{PageBuf, PageHeader, PageId, PageType, PAGE_SIZE};
pub use types::{CodecTag, ComparatorTag, TypeTag};
