//! Slab object caches.
//!
//! This crate implements a slab allocator that serves fixed-size objects on
//! top of a page allocator, featuring:
//! - Small objects kept in single pages with the slab header colocated at the
//!   end of the page and a free list threaded through the free buffers
//! - Large objects kept in multi-page regions with external bufctl records
//!   and an address index for constant-time free
//! - A circular slab ring per cache, ordered so that the head always has free
//!   capacity when any slab does
//!
//! The allocator is single-threaded. Pages and control structures come from
//! a caller-supplied [`SlabBacking`]; [`SystemBacking`] provides one on top
//! of the global Rust allocator.

#![no_std]

extern crate alloc;

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Hardware page size assumed by default.
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid object size, alignment or cache configuration.
    InvalidParam,
    /// The page allocator or the metadata allocator is exhausted.
    NoMemory,
    /// Freed a buffer that this cache did not hand out, or that is already free.
    NotAllocated,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidParam => f.write_str("invalid size, alignment or configuration"),
            AllocError::NoMemory => f.write_str("out of memory"),
            AllocError::NotAllocated => f.write_str("buffer is not allocated from this cache"),
        }
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Page-granularity allocator that slabs are carved from.
///
/// Regions returned by `alloc_pages` must be aligned to at least `alignment`
/// and stay valid until passed back to `dealloc_pages` with the same count.
pub trait PageAllocator {
    /// Allocate contiguous memory pages with given count and alignment (in bytes).
    fn alloc_pages(&mut self, num_pages: usize, alignment: usize) -> AllocResult<usize>;

    /// Deallocate contiguous memory pages with given position and count.
    fn dealloc_pages(&mut self, pos: usize, num_pages: usize);
}

/// Byte-granularity allocator used for slab control structures
/// (large-object slab headers and bufctl arrays).
pub trait ByteAllocator {
    /// Allocate memory with the given size (in bytes) and alignment.
    fn alloc(&mut self, layout: Layout) -> AllocResult<NonNull<u8>>;

    /// Deallocate memory at the given position, size, and alignment.
    fn dealloc(&mut self, pos: NonNull<u8>, layout: Layout);
}

/// Everything a cache needs from the outside world.
pub trait SlabBacking: PageAllocator + ByteAllocator {}

impl<T: PageAllocator + ByteAllocator> SlabBacking for T {}

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

pub mod page_allocator;
pub use page_allocator::SystemBacking;

pub mod slab;
pub use slab::{
    AllocFlags, CacheGeometry, CacheStats, ObjectClass, ObjectHooks, SlabCache, SlabCacheConfig,
};
