//! Integration tests for the slab caches
//!
//! Exercises caches through the public API only, with the host backing
//! standing in for the page and metadata allocators.

#![no_std]

extern crate alloc;
extern crate kmem_slab;

use alloc::vec::Vec;
use core::ptr::NonNull;
use kmem_slab::{
    AllocError, AllocFlags, ObjectClass, ObjectHooks, SlabCache, SlabCacheConfig, SystemBacking,
};

const PAGE_SIZE: usize = 0x1000;

type Cache = SlabCache<PAGE_SIZE>;
type Backing = SystemBacking<PAGE_SIZE>;

fn new_cache(size: usize, align: usize) -> Cache {
    Cache::create("integration", size, align, ObjectHooks::NONE).unwrap()
}

fn alloc_n(cache: &mut Cache, backing: &mut Backing, n: usize) -> Vec<NonNull<u8>> {
    (0..n)
        .map(|_| cache.alloc(AllocFlags::MayBlock, backing).unwrap())
        .collect()
}

/// Slabs with free capacity come first; full slabs only at the tail.
fn assert_ordered(cache: &Cache) {
    let levels = cache.slab_fill_levels();
    let capacity = cache.buffers_per_slab();
    let first_full = levels
        .iter()
        .position(|&n| n == capacity)
        .unwrap_or(levels.len());
    assert!(
        levels[first_full..].iter().all(|&n| n == capacity),
        "full slab ahead of a slab with free capacity: {:?}",
        levels
    );
    assert!(levels.iter().all(|&n| n > 0 && n <= capacity));
}

#[test]
fn test_effective_size_property() {
    for align in [0usize, 1, 2, 4, 8, 16, 32, 128, 1024] {
        for size in [1usize, 3, 7, 8, 9, 12, 31, 100, 511, 513, 4000] {
            let cache = new_cache(size, align);
            let align = if align == 0 { 8 } else { align };
            assert_eq!(cache.effective_size(), align * ((size + align - 1) / align));
            assert!(cache.effective_size() >= size);
            assert_eq!(cache.effective_size() % align, 0);
        }
    }
}

#[test]
fn test_default_alignment_effective_size() {
    let cache = new_cache(12, 0);
    assert_eq!(cache.effective_size(), 16);
}

#[test]
fn test_invalid_arguments() {
    assert_eq!(
        Cache::create("bad", 0, 8, ObjectHooks::NONE).err(),
        Some(AllocError::InvalidParam)
    );
    assert_eq!(
        Cache::create("bad", 8, 6, ObjectHooks::NONE).err(),
        Some(AllocError::InvalidParam)
    );
}

#[test]
fn test_fresh_slab_drains_contiguously() {
    let mut backing = Backing::new();
    let mut cache = new_cache(12, 0);
    let per_slab = cache.buffers_per_slab();

    let bufs = alloc_n(&mut cache, &mut backing, per_slab);
    assert_eq!(backing.page_allocs(), 1);

    let addrs: Vec<usize> = bufs.iter().map(|b| b.as_ptr() as usize).collect();
    for pair in addrs.windows(2) {
        assert_eq!(pair[1] - pair[0], cache.effective_size());
    }
    // All inside the single page.
    let page = addrs[0] & !(PAGE_SIZE - 1);
    assert!(addrs.iter().all(|&a| a & !(PAGE_SIZE - 1) == page));

    // Only now does the cache need another page.
    cache.alloc(AllocFlags::MayBlock, &mut backing).unwrap();
    assert_eq!(backing.page_allocs(), 2);

    cache.destroy(&mut backing);
}

#[test]
fn test_free_then_alloc_returns_same_buffer() {
    for size in [24usize, 2000] {
        let mut backing = Backing::new();
        let mut cache = new_cache(size, 0);
        let per_slab = cache.buffers_per_slab();

        // Two slabs, the buffer under test in the one further from the head.
        let bufs = alloc_n(&mut cache, &mut backing, per_slab + 3);
        for &buf in &bufs {
            cache.free(buf, &mut backing).unwrap();
            assert_eq!(
                cache.alloc(AllocFlags::MayBlock, &mut backing).unwrap(),
                buf
            );
        }

        cache.destroy(&mut backing);
    }
}

#[test]
fn test_full_cycle_leaves_no_slabs() {
    for size in [16usize, 700] {
        let mut backing = Backing::new();
        let mut cache = new_cache(size, 0);

        let per_slab = cache.buffers_per_slab();
        let bufs = alloc_n(&mut cache, &mut backing, per_slab);
        assert_eq!(cache.slab_count(), 1);
        for buf in bufs.into_iter().rev() {
            cache.free(buf, &mut backing).unwrap();
        }
        assert_eq!(cache.slab_count(), 0);
        assert_eq!(backing.pages_in_use(), 0);

        let grows = cache.stats().grows;
        cache.alloc(AllocFlags::MayBlock, &mut backing).unwrap();
        assert_eq!(cache.stats().grows, grows + 1);

        cache.destroy(&mut backing);
    }
}

#[test]
fn test_ordering_invariant() {
    for size in [40usize, 1500] {
        let mut backing = Backing::new();
        let mut cache = new_cache(size, 0);
        let per_slab = cache.buffers_per_slab();

        let live = alloc_n(&mut cache, &mut backing, 4 * per_slab + 1);
        assert_ordered(&cache);

        // Punch holes into every slab.
        let mut kept = Vec::new();
        for (i, buf) in live.into_iter().enumerate() {
            if i % 3 == 0 {
                cache.free(buf, &mut backing).unwrap();
                assert_ordered(&cache);
            } else {
                kept.push(buf);
            }
        }

        for _ in 0..2 * per_slab {
            kept.push(cache.alloc(AllocFlags::MayBlock, &mut backing).unwrap());
            assert_ordered(&cache);
        }

        for buf in kept {
            cache.free(buf, &mut backing).unwrap();
            assert_ordered(&cache);
        }
        assert_eq!(cache.slab_count(), 0);
        cache.destroy(&mut backing);
    }
}

#[test]
fn test_destroy_releases_every_region() {
    let mut backing = Backing::new();
    let mut small = new_cache(48, 0);
    let mut large = new_cache(3000, 0);

    let (small_per_slab, large_per_slab) = (small.buffers_per_slab(), large.buffers_per_slab());
    let _ = alloc_n(&mut small, &mut backing, 5 * small_per_slab);
    let _ = alloc_n(&mut large, &mut backing, 3 * large_per_slab - 1);
    let obtained = backing.page_allocs();
    assert_eq!(obtained, 8);

    small.destroy(&mut backing);
    large.destroy(&mut backing);
    assert_eq!(backing.page_releases(), obtained);
    assert_eq!(backing.pages_in_use(), 0);
    assert_eq!(backing.meta_blocks_in_use(), 0);
}

#[test]
fn test_alignment_respected() {
    let mut backing = Backing::new();
    for (size, align) in [(10usize, 16usize), (100, 64), (600, 256), (3000, 2048)] {
        let mut cache = new_cache(size, align);
        let count = 2 * cache.buffers_per_slab() + 1;
        let bufs = alloc_n(&mut cache, &mut backing, count);
        for buf in &bufs {
            assert_eq!(buf.as_ptr() as usize % align, 0, "size {} align {}", size, align);
        }
        cache.destroy(&mut backing);
    }
    assert_eq!(backing.pages_in_use(), 0);
}

#[test]
fn test_out_of_memory_is_surfaced() {
    let mut backing = Backing::with_page_limit(2);
    let mut cache = new_cache(256, 0);
    let per_slab = cache.buffers_per_slab();

    let bufs = alloc_n(&mut cache, &mut backing, 2 * per_slab);
    for flags in [AllocFlags::MayBlock, AllocFlags::MustNotBlock] {
        assert_eq!(cache.alloc(flags, &mut backing), Err(AllocError::NoMemory));
    }
    assert_eq!(cache.slab_count(), 2);

    // Space frees up once a slab drains.
    for &buf in &bufs[..per_slab] {
        cache.free(buf, &mut backing).unwrap();
    }
    assert_eq!(cache.slab_count(), 1);
    assert!(cache.alloc(AllocFlags::MustNotBlock, &mut backing).is_ok());

    cache.destroy(&mut backing);
}

#[test]
fn test_large_cache_with_custom_policy() {
    let config = SlabCacheConfig {
        large_min_buffers: 3,
        ..SlabCacheConfig::default()
    };
    let mut backing = Backing::new();
    let mut cache = Cache::create_with_config("big", 8192, 0, ObjectHooks::NONE, config).unwrap();
    assert_eq!(cache.object_class(), ObjectClass::Large);
    assert_eq!(cache.buffers_per_slab(), 3);
    assert_eq!(cache.pages_per_slab(), 6);

    let bufs = alloc_n(&mut cache, &mut backing, 4);
    assert_eq!(backing.pages_in_use(), 12);
    for buf in bufs {
        cache.free(buf, &mut backing).unwrap();
    }
    assert_eq!(backing.pages_in_use(), 0);

    cache.destroy(&mut backing);
}

#[test]
fn test_double_free_keeps_live_neighbour() {
    for size in [16usize, 1000] {
        let mut backing = Backing::new();
        let mut cache = new_cache(size, 0);

        let a = cache.alloc(AllocFlags::MayBlock, &mut backing).unwrap();
        let b = cache.alloc(AllocFlags::MayBlock, &mut backing).unwrap();
        cache.free(a, &mut backing).unwrap();
        assert_eq!(cache.free(a, &mut backing), Err(AllocError::NotAllocated));

        // `b` keeps its slab alive.
        assert_eq!(cache.slab_fill_levels(), [1]);
        assert_eq!(cache.stats().objects_in_use, 1);
        assert!(backing.pages_in_use() > 0);

        cache.free(b, &mut backing).unwrap();
        assert_eq!(cache.slab_count(), 0);
        cache.destroy(&mut backing);
    }
}

#[test]
fn test_oversized_object_rejected() {
    assert_eq!(
        Cache::create("huge", (usize::MAX / 8) & !7, 0, ObjectHooks::NONE).err(),
        Some(AllocError::InvalidParam)
    );
}
