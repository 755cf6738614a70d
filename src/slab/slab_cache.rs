//! Slab cache implementation for a single object size.
//!
//! A [`SlabCache`] owns every slab holding its objects and keeps them in one
//! ordering ring: slabs with free capacity in front, full slabs at the back.
//! Allocation always takes from the head, so it is O(1) except when the
//! cache has to grow.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, error, warn};

use super::bufctl::Bufctl;
use super::geometry::{CacheGeometry, ObjectClass, SlabCacheConfig};
use super::large_index::BufctlIndex;
use super::slab_list::SlabRing;
use super::slab_node::{SlabHeader, SlabNode};
use crate::{AllocError, AllocResult, SlabBacking};

/// Source of per-cache ids stamped into slab headers.
static NEXT_CACHE_ID: AtomicUsize = AtomicUsize::new(1);

/// Object callback, called with the buffer and the cache's object size.
pub type ObjectHook = fn(NonNull<u8>, usize);

/// Optional constructor and destructor of a cache's objects.
///
/// The constructor runs on every buffer `alloc` hands out, the destructor on
/// every buffer given back to `free`. Buffers still allocated when the cache
/// is destroyed are not passed to the destructor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectHooks {
    pub constructor: Option<ObjectHook>,
    pub destructor: Option<ObjectHook>,
}

impl ObjectHooks {
    pub const NONE: Self = Self {
        constructor: None,
        destructor: None,
    };

    pub const fn new(constructor: Option<ObjectHook>, destructor: Option<ObjectHook>) -> Self {
        Self {
            constructor,
            destructor,
        }
    }
}

/// Whether the caller of `alloc` may wait for memory.
///
/// The cache is single-threaded and never waits, so both behave the same:
/// if memory is not available right away the allocation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocFlags {
    #[default]
    MayBlock,
    MustNotBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub slabs: usize,
    pub full_slabs: usize,
    pub objects_in_use: usize,
    pub pages_held: usize,
    pub grows: usize,
    pub reclaims: usize,
}

/// Slab cache for objects of one size and alignment
pub struct SlabCache<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    name: &'static str,
    id: usize,
    geometry: CacheGeometry,
    hooks: ObjectHooks,
    bufctl_layout: Layout,
    slabs: SlabRing,
    index: BufctlIndex,
    objects_in_use: usize,
    grows: usize,
    reclaims: usize,
}

impl<const PAGE_SIZE: usize> SlabCache<PAGE_SIZE> {
    /// Create a cache with the default geometry policy.
    ///
    /// `align == 0` selects the default alignment of 8 bytes.
    pub fn create(
        name: &'static str,
        size: usize,
        align: usize,
        hooks: ObjectHooks,
    ) -> AllocResult<Self> {
        Self::create_with_config(name, size, align, hooks, SlabCacheConfig::default())
    }

    pub fn create_with_config(
        name: &'static str,
        size: usize,
        align: usize,
        hooks: ObjectHooks,
        config: SlabCacheConfig,
    ) -> AllocResult<Self> {
        let geometry = CacheGeometry::new(size, align, &config, PAGE_SIZE).map_err(|e| {
            warn!(
                "slab cache {}: rejected size={} align={} ({:?})",
                name, size, align, e
            );
            e
        })?;
        let bufctl_layout = Bufctl::array_layout(geometry.buffers_per_slab)?;
        let id = NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed);

        debug!(
            "slab cache {}: size={} effective={} class={:?} buffers/slab={} pages/slab={}",
            name,
            size,
            geometry.effective_size,
            geometry.class,
            geometry.buffers_per_slab,
            geometry.pages_per_slab
        );

        Ok(Self {
            name,
            id,
            geometry,
            hooks,
            bufctl_layout,
            slabs: SlabRing::new(),
            index: BufctlIndex::new(),
            objects_in_use: 0,
            grows: 0,
            reclaims: 0,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.geometry.size
    }

    pub fn align(&self) -> usize {
        self.geometry.align
    }

    pub fn effective_size(&self) -> usize {
        self.geometry.effective_size
    }

    pub fn object_class(&self) -> ObjectClass {
        self.geometry.class
    }

    pub fn buffers_per_slab(&self) -> usize {
        self.geometry.buffers_per_slab
    }

    pub fn pages_per_slab(&self) -> usize {
        self.geometry.pages_per_slab
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    pub fn stats(&self) -> CacheStats {
        let full_slabs = self
            .slabs
            .iter()
            .filter(|&slab| self.is_full(slab))
            .count();
        CacheStats {
            slabs: self.slabs.len(),
            full_slabs,
            objects_in_use: self.objects_in_use,
            pages_held: self.slabs.len() * self.geometry.pages_per_slab,
            grows: self.grows,
            reclaims: self.reclaims,
        }
    }

    /// Buffers in use per slab, from the head of the ring to the tail.
    pub fn slab_fill_levels(&self) -> Vec<usize> {
        self.slabs
            .iter()
            .map(|slab| SlabNode::new(slab).in_use())
            .collect()
    }

    fn is_full(&self, slab: usize) -> bool {
        SlabNode::new(slab).in_use() == self.geometry.buffers_per_slab
    }

    /// Add one empty slab at the head of the ring.
    ///
    /// On failure nothing obtained from `backing` is kept and the cache is
    /// unchanged.
    pub fn grow(&mut self, backing: &mut dyn SlabBacking) -> AllocResult {
        self.grow_slab(backing).map(|_| ())
    }

    fn grow_slab(&mut self, backing: &mut dyn SlabBacking) -> AllocResult<usize> {
        let slab = match self.geometry.class {
            ObjectClass::Small => self.grow_small(backing),
            ObjectClass::Large => self.grow_large(backing),
        }
        .map_err(|e| {
            warn!("slab cache {}: grow failed: {:?}", self.name, e);
            e
        })?;

        self.slabs.push_front(slab);
        self.grows += 1;
        Ok(slab)
    }

    fn grow_small(&mut self, backing: &mut dyn SlabBacking) -> AllocResult<usize> {
        let page = backing.alloc_pages(1, PAGE_SIZE)?;
        let mut node = SlabNode::new(page + SlabNode::small_header_offset(PAGE_SIZE));
        unsafe {
            node.init_small(
                self.id,
                page,
                self.geometry.slot_size,
                self.geometry.buffers_per_slab,
            )
        };
        Ok(node.addr)
    }

    fn grow_large(&mut self, backing: &mut dyn SlabBacking) -> AllocResult<usize> {
        let pages = self.geometry.pages_per_slab;
        let count = self.geometry.buffers_per_slab;
        let header_layout = Layout::new::<SlabHeader>();

        let region = backing.alloc_pages(pages, self.geometry.region_align())?;
        let header = match backing.alloc(header_layout) {
            Ok(header) => header,
            Err(e) => {
                backing.dealloc_pages(region, pages);
                return Err(e);
            }
        };
        let bufctls = match backing.alloc(self.bufctl_layout) {
            Ok(bufctls) => bufctls,
            Err(e) => {
                backing.dealloc(header, header_layout);
                backing.dealloc_pages(region, pages);
                return Err(e);
            }
        };
        if let Err(e) = self.index.reserve(count) {
            backing.dealloc(bufctls, self.bufctl_layout);
            backing.dealloc(header, header_layout);
            backing.dealloc_pages(region, pages);
            return Err(e);
        }

        let bufctls = bufctls.as_ptr() as usize;
        let mut node = SlabNode::new(header.as_ptr() as usize);
        unsafe { node.init_large(self.id, region, bufctls, self.geometry.slot_size, count) };

        for i in 0..count {
            let bufctl = bufctls + i * core::mem::size_of::<Bufctl>();
            self.index.insert(region + i * self.geometry.slot_size, bufctl);
        }
        Ok(node.addr)
    }

    /// Allocate one object.
    pub fn alloc(
        &mut self,
        flags: AllocFlags,
        backing: &mut dyn SlabBacking,
    ) -> AllocResult<NonNull<u8>> {
        let slab = match self.slabs.head() {
            Some(head) if !self.is_full(head) => head,
            _ => {
                debug!("slab cache {}: no free buffer, growing ({:?})", self.name, flags);
                self.grow_slab(backing)?
            }
        };

        let mut node = SlabNode::new(slab);
        let buf = match self.geometry.class {
            ObjectClass::Small => node.pop_small(),
            ObjectClass::Large => node.pop_large(),
        };
        let Some(buf) = buf else {
            panic!(
                "slab cache {}: slab {:#x} has no free buffer despite in_use < capacity",
                self.name, slab
            );
        };
        self.objects_in_use += 1;

        if node.in_use() == self.geometry.buffers_per_slab {
            self.slabs.move_to_back(slab);
            debug_assert_eq!(self.slabs.tail(), Some(slab));
        }

        let ptr = unsafe { NonNull::new_unchecked(buf as *mut u8) };
        if let Some(constructor) = self.hooks.constructor {
            constructor(ptr, self.geometry.size);
        }
        Ok(ptr)
    }

    /// Return an object to the cache.
    ///
    /// Buffers that this cache did not hand out, or that are already free,
    /// are rejected with [`AllocError::NotAllocated`] and leave the cache
    /// unchanged. For small objects the check reads the slab header at the
    /// end of the buffer's page, so `buf` must lie in mapped memory.
    pub fn free(&mut self, buf: NonNull<u8>, backing: &mut dyn SlabBacking) -> AllocResult {
        let addr = buf.as_ptr() as usize;
        let (slab, bufctl) = match self.geometry.class {
            ObjectClass::Small => (self.small_slab_of(addr)?, None),
            ObjectClass::Large => {
                let (slab, bufctl) = self.large_bufctl_of(addr)?;
                (slab, Some(bufctl))
            }
        };

        if let Some(destructor) = self.hooks.destructor {
            destructor(buf, self.geometry.size);
        }

        let mut node = SlabNode::new(slab);
        match bufctl {
            None => node.push_small(addr),
            Some(bufctl) => node.push_large(bufctl),
        }
        self.objects_in_use -= 1;

        // The freed-into slab becomes the preferred allocation target. This
        // also re-promotes a slab that was full.
        self.slabs.move_to_front(slab);

        if node.in_use() == 0 {
            self.slabs.remove(slab);
            self.release_slab(slab, backing);
            self.reclaims += 1;
        }
        Ok(())
    }

    fn small_slab_of(&self, addr: usize) -> AllocResult<usize> {
        let node = SlabNode::for_small_buffer(addr, PAGE_SIZE);
        if !node.is_valid_for(self.id, ObjectClass::Small) {
            error!(
                "slab cache {}: free of {:#x}, page holds no slab of this cache",
                self.name, addr
            );
            return Err(AllocError::NotAllocated);
        }

        let offset = addr - node.base();
        let slot = self.geometry.slot_size;
        if offset % slot != 0 || offset / slot >= self.geometry.buffers_per_slab {
            error!(
                "slab cache {}: free of {:#x}, not a buffer boundary",
                self.name, addr
            );
            return Err(AllocError::NotAllocated);
        }

        if !node.small_is_allocated(addr) {
            error!("slab cache {}: double free of {:#x}", self.name, addr);
            return Err(AllocError::NotAllocated);
        }

        Ok(node.addr)
    }

    fn large_bufctl_of(&self, addr: usize) -> AllocResult<(usize, usize)> {
        let Some(bufctl_addr) = self.index.get(addr) else {
            error!(
                "slab cache {}: free of {:#x}, not a buffer of this cache",
                self.name, addr
            );
            return Err(AllocError::NotAllocated);
        };

        let bufctl = unsafe { &*(bufctl_addr as *const Bufctl) };
        if !bufctl.allocated {
            error!("slab cache {}: double free of {:#x}", self.name, addr);
            return Err(AllocError::NotAllocated);
        }
        Ok((bufctl.slab, bufctl_addr))
    }

    /// Give an unlinked slab and all its control structures back.
    fn release_slab(&mut self, slab: usize, backing: &mut dyn SlabBacking) {
        let mut node = SlabNode::new(slab);
        let base = node.base();
        node.invalidate();

        match self.geometry.class {
            ObjectClass::Small => backing.dealloc_pages(base, 1),
            ObjectClass::Large => {
                let bufctls = node.bufctls();
                for i in 0..self.geometry.buffers_per_slab {
                    self.index.remove(base + i * self.geometry.slot_size);
                }
                // SAFETY: both blocks came from `backing.alloc` in grow_large.
                unsafe {
                    backing.dealloc(
                        NonNull::new_unchecked(bufctls as *mut u8),
                        self.bufctl_layout,
                    );
                    backing.dealloc(
                        NonNull::new_unchecked(slab as *mut u8),
                        Layout::new::<SlabHeader>(),
                    );
                }
                backing.dealloc_pages(base, self.geometry.pages_per_slab);
            }
        }
    }

    /// Release every slab, then the cache itself.
    ///
    /// Objects still allocated are not passed to the destructor; their
    /// memory is simply returned with the slab.
    pub fn destroy(mut self, backing: &mut dyn SlabBacking) {
        if self.objects_in_use > 0 {
            warn!(
                "slab cache {}: destroyed with {} objects still allocated",
                self.name, self.objects_in_use
            );
        }

        while let Some(slab) = self.slabs.head() {
            self.slabs.remove(slab);
            self.release_slab(slab, backing);
            self.reclaims += 1;
        }
        self.objects_in_use = 0;
        debug_assert!(self.index.is_empty());

        debug!(
            "slab cache {}: destroyed after {} grows",
            self.name, self.grows
        );
    }
}

impl<const PAGE_SIZE: usize> Drop for SlabCache<PAGE_SIZE> {
    fn drop(&mut self) {
        if !self.slabs.is_empty() {
            warn!(
                "slab cache {}: dropped without destroy, leaking {} slabs",
                self.name,
                self.slabs.len()
            );
        }
    }
}
