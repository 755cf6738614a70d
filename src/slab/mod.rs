//! Slab allocator implementation.
//!
//! Small objects live in single pages whose last bytes hold the slab header;
//! large objects live in multi-page regions described by bufctl records and
//! found again through a per-cache address index.

mod bufctl;
pub mod geometry;
mod large_index;
pub mod slab_cache;
mod slab_list;
pub(crate) mod slab_node;

// Re-export public types
pub use geometry::{CacheGeometry, ObjectClass, SlabCacheConfig, DEFAULT_ALIGN};
pub use slab_cache::{AllocFlags, CacheStats, ObjectHook, ObjectHooks, SlabCache};
