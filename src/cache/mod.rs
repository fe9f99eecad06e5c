//! Artifact cache.
//!
//! Rendered meshes are stored as immutable blobs keyed by the SHA-256 digest of
//! their `(text, font)` pair:
//!
//! - [`CacheKey`] derives the key.
//! - [`BlobStore`] is the get/put seam used by the render path, implemented by
//!   [`DiskBlobStore`] (one file per entry) and [`MemoryBlobStore`].
//! - [`EvictionPolicy`] bounds the disk store when an operator asks for it.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! directory = "./cache"
//! extension = "meshx"
//! coalesce_misses = true
//! # max_bytes = 10737418240
//! # max_age_seconds = 2592000
//! sweep_interval_seconds = 300
//! ```

mod disk;
mod eviction;
mod keys;
mod store;

pub use disk::{DiskBlobStore, METRIC_CACHE_EVICTED_TOTAL, blob_path};
pub use eviction::{EvictionPolicy, EvictionReport, StoredEntry};
pub use keys::CacheKey;
pub use store::{BlobStore, MemoryBlobStore, StoreError};
