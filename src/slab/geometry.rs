//! Cache geometry.
//!
//! Everything about how one object size/alignment is laid out in slabs is
//! decided once, when the cache is created: the effective size, whether the
//! cache takes the small-object or the large-object path, the slot stride,
//! and how many buffers (and pages) each slab holds.

use core::mem::size_of;

use super::slab_node::{SlabHeader, SMALL_SLAB_MAX_BUFFERS};
use crate::{AllocError, AllocResult};

/// Alignment used when a cache is created with `align == 0`.
pub const DEFAULT_ALIGN: usize = 8;

/// Which free-list representation a cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// One page per slab, header at the end of the page, free list threaded
    /// through the free buffers themselves.
    Small,
    /// Multi-page regions, external header and bufctl records, buffers found
    /// on free through the cache's address index.
    Large,
}

/// Tunables for cache geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabCacheConfig {
    /// Objects up to `page_size / small_object_divisor` bytes are small.
    ///
    /// The comparison uses the effective size (size rounded up to the
    /// alignment), not the requested size, so an over-aligned object whose
    /// slot would exceed the threshold takes the large-object path even if
    /// its size alone is below it.
    pub small_object_divisor: usize,
    /// Minimum number of buffers in a large-object slab.
    pub large_min_buffers: usize,
    /// Unused bytes at the end of a large-object region may be at most
    /// `region / large_waste_divisor`. Zero disables the target.
    pub large_waste_divisor: usize,
    /// Upper bound on the pages of a large-object slab.
    pub large_max_pages: usize,
}

impl SlabCacheConfig {
    pub const fn new() -> Self {
        Self {
            small_object_divisor: 8,
            large_min_buffers: 8,
            large_waste_divisor: 8,
            large_max_pages: 64,
        }
    }
}

impl Default for SlabCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Computed layout of one cache's slabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    /// Requested object size.
    pub size: usize,
    /// Alignment boundary (power of two).
    pub align: usize,
    /// `align * ceil(size / align)`.
    pub effective_size: usize,
    /// Distance between consecutive buffers in a slab.
    pub slot_size: usize,
    pub class: ObjectClass,
    pub buffers_per_slab: usize,
    pub pages_per_slab: usize,
    pub page_size: usize,
}

/// Round `size` up to a multiple of `align`.
///
/// Returns `None` on overflow. `align` must be non-zero.
pub fn effective_size(size: usize, align: usize) -> Option<usize> {
    size.checked_add(align - 1).map(|s| s / align * align)
}

impl CacheGeometry {
    pub fn new(
        size: usize,
        align: usize,
        config: &SlabCacheConfig,
        page_size: usize,
    ) -> AllocResult<Self> {
        let align = if align == 0 { DEFAULT_ALIGN } else { align };
        if size == 0 || !align.is_power_of_two() {
            return Err(AllocError::InvalidParam);
        }
        if !page_size.is_power_of_two() || page_size <= 2 * size_of::<SlabHeader>() {
            return Err(AllocError::InvalidParam);
        }
        if config.small_object_divisor == 0 {
            return Err(AllocError::InvalidParam);
        }

        let effective_size = effective_size(size, align).ok_or(AllocError::InvalidParam)?;
        // A free small buffer stores the next free address in its first word.
        let slot_size = effective_size.max(size_of::<usize>());

        let class = if effective_size <= page_size / config.small_object_divisor {
            ObjectClass::Small
        } else {
            ObjectClass::Large
        };

        let (buffers_per_slab, pages_per_slab) = match class {
            // The header tracks at most SMALL_SLAB_MAX_BUFFERS slots, which
            // only binds for tiny objects on pages larger than 4 KiB.
            ObjectClass::Small => (
                ((page_size - size_of::<SlabHeader>()) / slot_size).min(SMALL_SLAB_MAX_BUFFERS),
                1,
            ),
            ObjectClass::Large => Self::large_capacity(slot_size, config, page_size)?,
        };
        if buffers_per_slab == 0 {
            return Err(AllocError::InvalidParam);
        }

        Ok(Self {
            size,
            align,
            effective_size,
            slot_size,
            class,
            buffers_per_slab,
            pages_per_slab,
            page_size,
        })
    }

    /// Pick the page count of a large-object slab.
    ///
    /// Starts from the smallest region holding `large_min_buffers` slots and
    /// adds pages while the unused tail exceeds the waste target.
    fn large_capacity(
        slot_size: usize,
        config: &SlabCacheConfig,
        page_size: usize,
    ) -> AllocResult<(usize, usize)> {
        let min_bytes = slot_size
            .checked_mul(config.large_min_buffers.max(1))
            .ok_or(AllocError::InvalidParam)?;
        let mut pages = min_bytes
            .checked_add(page_size - 1)
            .ok_or(AllocError::InvalidParam)?
            / page_size;
        let max_pages = config.large_max_pages.max(pages);

        loop {
            let region = pages
                .checked_mul(page_size)
                .ok_or(AllocError::InvalidParam)?;
            let waste = region % slot_size;
            let acceptable = config.large_waste_divisor == 0
                || waste.saturating_mul(config.large_waste_divisor) <= region;
            if acceptable || pages >= max_pages {
                return Ok((region / slot_size, pages));
            }
            pages += 1;
        }
    }

    /// Bytes requested from the page allocator per slab.
    pub fn slab_bytes(&self) -> usize {
        self.pages_per_slab * self.page_size
    }

    /// Alignment requested from the page allocator per slab.
    pub fn region_align(&self) -> usize {
        self.align.max(self.page_size)
    }
}
