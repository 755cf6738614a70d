//! Host-side backing allocator for slab caches.
//!
//! [`SystemBacking`] hands out page-aligned regions and metadata blocks from
//! the global Rust allocator. It remembers every live region so that
//! `dealloc_pages` can rebuild the layout, and keeps counters that make the
//! page traffic of a cache observable.

use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;

use hashbrown::HashMap;

#[cfg(feature = "log")]
use log::{debug, warn};

use crate::{AllocError, AllocResult, ByteAllocator, PageAllocator};

/// Page and metadata allocator backed by the global allocator.
pub struct SystemBacking<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    /// Live regions: base address -> (layout, page count).
    regions: HashMap<usize, (Layout, usize)>,
    page_limit: Option<usize>,
    pages_in_use: usize,
    page_allocs: usize,
    page_releases: usize,
    meta_blocks: usize,
}

impl<const PAGE_SIZE: usize> SystemBacking<PAGE_SIZE> {
    /// Create a backing with no page limit.
    pub fn new() -> Self {
        Self {
            regions: HashMap::new(),
            page_limit: None,
            pages_in_use: 0,
            page_allocs: 0,
            page_releases: 0,
            meta_blocks: 0,
        }
    }

    /// Create a backing that refuses to hold more than `max_pages` pages at once.
    pub fn with_page_limit(max_pages: usize) -> Self {
        let mut backing = Self::new();
        backing.page_limit = Some(max_pages);
        backing
    }

    /// Number of pages currently handed out.
    pub fn pages_in_use(&self) -> usize {
        self.pages_in_use
    }

    /// Number of live regions.
    pub fn live_regions(&self) -> usize {
        self.regions.len()
    }

    /// Successful `alloc_pages` calls so far.
    pub fn page_allocs(&self) -> usize {
        self.page_allocs
    }

    /// `dealloc_pages` calls that released a live region.
    pub fn page_releases(&self) -> usize {
        self.page_releases
    }

    /// Metadata blocks currently handed out.
    pub fn meta_blocks_in_use(&self) -> usize {
        self.meta_blocks
    }
}

impl<const PAGE_SIZE: usize> Default for SystemBacking<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> PageAllocator for SystemBacking<PAGE_SIZE> {
    fn alloc_pages(&mut self, num_pages: usize, alignment: usize) -> AllocResult<usize> {
        if num_pages == 0 || !alignment.is_power_of_two() {
            return Err(AllocError::InvalidParam);
        }
        if let Some(limit) = self.page_limit {
            if self.pages_in_use + num_pages > limit {
                debug!(
                    "system backing: page limit {} reached ({} in use, {} requested)",
                    limit, self.pages_in_use, num_pages
                );
                return Err(AllocError::NoMemory);
            }
        }

        let size = num_pages
            .checked_mul(PAGE_SIZE)
            .ok_or(AllocError::InvalidParam)?;
        let layout = Layout::from_size_align(size, alignment.max(PAGE_SIZE))
            .map_err(|_| AllocError::InvalidParam)?;
        let addr = unsafe { alloc(layout) } as usize;
        if addr == 0 {
            return Err(AllocError::NoMemory);
        }

        self.regions.insert(addr, (layout, num_pages));
        self.pages_in_use += num_pages;
        self.page_allocs += 1;
        Ok(addr)
    }

    fn dealloc_pages(&mut self, pos: usize, num_pages: usize) {
        match self.regions.remove(&pos) {
            Some((layout, count)) if count == num_pages => {
                unsafe { dealloc(pos as *mut u8, layout) };
                self.pages_in_use -= count;
                self.page_releases += 1;
            }
            Some(entry) => {
                warn!(
                    "system backing: region {:#x} holds {} pages, release asked for {}",
                    pos, entry.1, num_pages
                );
                self.regions.insert(pos, entry);
            }
            None => {
                warn!("system backing: release of unknown region {:#x}", pos);
            }
        }
    }
}

impl<const PAGE_SIZE: usize> ByteAllocator for SystemBacking<PAGE_SIZE> {
    fn alloc(&mut self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(AllocError::InvalidParam);
        }
        let ptr = NonNull::new(unsafe { alloc(layout) }).ok_or(AllocError::NoMemory)?;
        self.meta_blocks += 1;
        Ok(ptr)
    }

    fn dealloc(&mut self, pos: NonNull<u8>, layout: Layout) {
        unsafe { dealloc(pos.as_ptr(), layout) };
        self.meta_blocks = self.meta_blocks.saturating_sub(1);
    }
}

impl<const PAGE_SIZE: usize> Drop for SystemBacking<PAGE_SIZE> {
    fn drop(&mut self) {
        if !self.regions.is_empty() {
            warn!(
                "system backing: dropping with {} live regions ({} pages)",
                self.regions.len(),
                self.pages_in_use
            );
        }
        for (addr, (layout, _)) in self.regions.drain() {
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}
