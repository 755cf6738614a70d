//! Slab node implementation.
//!
//! A [`SlabNode`] is a view over a [`SlabHeader`] living at a raw address.
//! For small-object slabs the header sits at the end of the slab's page and
//! free buffers carry the free list in their leading word. For large-object
//! slabs the header is a separate metadata block and the free list is a chain
//! of [`Bufctl`] records.

use core::mem::size_of;

use static_assertions::const_assert;

use super::bufctl::Bufctl;
use super::geometry::ObjectClass;

#[repr(C)]
pub(crate) struct SlabHeader {
    magic: u32,
    class: u32,
    cache_id: usize,
    prev: usize,
    next: usize,
    /// Small: first free buffer. Large: first free bufctl. 0 when empty.
    free_head: usize,
    in_use: usize,
    /// Address of the first buffer.
    base: usize,
    /// Bufctl array of a large-object slab, 0 for small-object slabs.
    bufctls: usize,
    slot_size: usize,
    /// Small: one bit per slot, set while the buffer is handed out.
    alloc_bitmap: [u64; ALLOC_BITMAP_WORDS],
}

const SLAB_HEADER_MAGIC: u32 = 0x534c_4142;
const CLASS_SMALL: u32 = 1;
const CLASS_LARGE: u32 = 2;
const ALLOC_BITMAP_WORDS: usize = 8;

/// Most buffers a small-object slab can track.
pub(crate) const SMALL_SLAB_MAX_BUFFERS: usize = ALLOC_BITMAP_WORDS * 64;

// The header must leave room for buffers in the smallest small-object slab.
const_assert!(size_of::<SlabHeader>() <= crate::DEFAULT_PAGE_SIZE / 8);

const fn class_tag(class: ObjectClass) -> u32 {
    match class {
        ObjectClass::Small => CLASS_SMALL,
        ObjectClass::Large => CLASS_LARGE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlabNode {
    pub addr: usize, // Header address, also the slab's handle
}

impl SlabNode {
    pub const fn new(addr: usize) -> Self {
        Self { addr }
    }

    /// Offset of the header inside a small-object slab page.
    pub const fn small_header_offset(page_size: usize) -> usize {
        page_size - size_of::<SlabHeader>()
    }

    /// The node whose page contains `buf`, assuming a small-object slab.
    pub fn for_small_buffer(buf: usize, page_size: usize) -> Self {
        Self::new(crate::align_down(buf, page_size) + Self::small_header_offset(page_size))
    }

    fn header(&self) -> &SlabHeader {
        unsafe { &*(self.addr as *const SlabHeader) }
    }

    fn header_mut(&mut self) -> &mut SlabHeader {
        unsafe { &mut *(self.addr as *mut SlabHeader) }
    }

    /// Write the header and thread every slot into the free list.
    ///
    /// # Safety
    ///
    /// `self.addr` must be valid for a `SlabHeader`, and `count` slots of
    /// `slot_size` bytes starting at `base` must be writable and unused.
    pub unsafe fn init_small(&mut self, cache_id: usize, base: usize, slot_size: usize, count: usize) {
        debug_assert!(count <= SMALL_SLAB_MAX_BUFFERS);
        for i in 0..count {
            let buf = base + i * slot_size;
            let next = if i + 1 < count { buf + slot_size } else { 0 };
            (buf as *mut usize).write_unaligned(next);
        }

        core::ptr::write(
            self.addr as *mut SlabHeader,
            SlabHeader {
                magic: SLAB_HEADER_MAGIC,
                class: CLASS_SMALL,
                cache_id,
                prev: 0,
                next: 0,
                free_head: if count > 0 { base } else { 0 },
                in_use: 0,
                base,
                bufctls: 0,
                slot_size,
                alloc_bitmap: [0; ALLOC_BITMAP_WORDS],
            },
        );
    }

    /// Write the header and link one bufctl per slot into the free list.
    ///
    /// # Safety
    ///
    /// `self.addr` must be valid for a `SlabHeader` and `bufctls` must point
    /// to writable storage for `count` bufctls.
    pub unsafe fn init_large(
        &mut self,
        cache_id: usize,
        base: usize,
        bufctls: usize,
        slot_size: usize,
        count: usize,
    ) {
        let array = bufctls as *mut Bufctl;
        for i in 0..count {
            let next = if i + 1 < count {
                array.add(i + 1) as usize
            } else {
                0
            };
            array.add(i).write(Bufctl {
                next,
                buf: base + i * slot_size,
                slab: self.addr,
                allocated: false,
            });
        }

        core::ptr::write(
            self.addr as *mut SlabHeader,
            SlabHeader {
                magic: SLAB_HEADER_MAGIC,
                class: CLASS_LARGE,
                cache_id,
                prev: 0,
                next: 0,
                free_head: if count > 0 { bufctls } else { 0 },
                in_use: 0,
                base,
                bufctls,
                slot_size,
                alloc_bitmap: [0; ALLOC_BITMAP_WORDS],
            },
        );
    }

    pub fn is_valid_for(&self, cache_id: usize, class: ObjectClass) -> bool {
        let header = self.header();
        header.magic == SLAB_HEADER_MAGIC
            && header.class == class_tag(class)
            && header.cache_id == cache_id
    }

    /// Forget the magic so stale pointers into a released slab are rejected.
    pub fn invalidate(&mut self) {
        self.header_mut().magic = 0;
    }

    pub fn in_use(&self) -> usize {
        self.header().in_use
    }

    pub fn base(&self) -> usize {
        self.header().base
    }

    pub fn bufctls(&self) -> usize {
        self.header().bufctls
    }

    /// Bitmap word and mask of the slot holding `buf`.
    fn slot_bit(header: &SlabHeader, buf: usize) -> (usize, u64) {
        let idx = (buf - header.base) / header.slot_size;
        (idx / 64, 1u64 << (idx % 64))
    }

    /// Pop a buffer from a small-object free list.
    pub fn pop_small(&mut self) -> Option<usize> {
        let header = self.header_mut();
        let buf = header.free_head;
        if buf == 0 {
            return None;
        }
        header.free_head = unsafe { (buf as *const usize).read_unaligned() };
        header.in_use += 1;
        let (word, mask) = Self::slot_bit(header, buf);
        header.alloc_bitmap[word] |= mask;
        Some(buf)
    }

    /// Push a buffer back onto a small-object free list.
    pub fn push_small(&mut self, buf: usize) {
        let header = self.header_mut();
        let (word, mask) = Self::slot_bit(header, buf);
        header.alloc_bitmap[word] &= !mask;
        unsafe { (buf as *mut usize).write_unaligned(header.free_head) };
        header.free_head = buf;
        header.in_use -= 1;
    }

    /// Whether the small-object buffer `buf` is currently handed out.
    ///
    /// `buf` must be a slot boundary inside this slab.
    pub fn small_is_allocated(&self, buf: usize) -> bool {
        let header = self.header();
        let (word, mask) = Self::slot_bit(header, buf);
        header.alloc_bitmap[word] & mask != 0
    }

    /// Pop a bufctl from a large-object free list, returning its buffer.
    pub fn pop_large(&mut self) -> Option<usize> {
        let header = self.header_mut();
        let head = header.free_head;
        if head == 0 {
            return None;
        }
        let bufctl = unsafe { &mut *(head as *mut Bufctl) };
        header.free_head = bufctl.next;
        header.in_use += 1;
        bufctl.next = 0;
        bufctl.allocated = true;
        Some(bufctl.buf)
    }

    /// Push a bufctl back onto a large-object free list.
    pub fn push_large(&mut self, bufctl_addr: usize) {
        let header = self.header_mut();
        let bufctl = unsafe { &mut *(bufctl_addr as *mut Bufctl) };
        bufctl.allocated = false;
        bufctl.next = header.free_head;
        header.free_head = bufctl_addr;
        header.in_use -= 1;
    }

    pub fn prev(&self) -> Option<usize> {
        let prev = self.header().prev;
        if prev == 0 {
            None
        } else {
            Some(prev)
        }
    }

    pub fn next(&self) -> Option<usize> {
        let next = self.header().next;
        if next == 0 {
            None
        } else {
            Some(next)
        }
    }

    pub fn set_prev(&mut self, prev: Option<usize>) {
        self.header_mut().prev = prev.unwrap_or(0);
    }

    pub fn set_next(&mut self, next: Option<usize>) {
        self.header_mut().next = next.unwrap_or(0);
    }
}
