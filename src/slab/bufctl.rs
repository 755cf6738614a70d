//! Buffer control records for large-object slabs.

use core::alloc::Layout;

use crate::{AllocError, AllocResult};

/// External free-list node describing one buffer of a large-object slab.
///
/// All bufctls of a slab live in one array obtained from the metadata
/// allocator when the slab is grown.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bufctl {
    /// Next free bufctl, 0 terminates.
    pub next: usize,
    /// Buffer this record stands for.
    pub buf: usize,
    /// Header address of the owning slab.
    pub slab: usize,
    /// Whether the buffer is currently handed out.
    pub allocated: bool,
}

impl Bufctl {
    pub fn array_layout(count: usize) -> AllocResult<Layout> {
        Layout::array::<Bufctl>(count).map_err(|_| AllocError::InvalidParam)
    }
}
