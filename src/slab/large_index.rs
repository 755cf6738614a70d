//! Buffer address index for large-object caches.
//!
//! Large-object buffers carry no header, so `free` finds a buffer's bufctl
//! (and through it the owning slab) here. Entries are added when a slab is
//! grown and purged when it is reclaimed; the index never owns the bufctls.

use hashbrown::HashMap;

use crate::{AllocError, AllocResult};

pub(crate) struct BufctlIndex {
    map: HashMap<usize, usize>,
}

impl BufctlIndex {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Make room for `additional` entries so that the following inserts
    /// cannot fail.
    pub fn reserve(&mut self, additional: usize) -> AllocResult {
        self.map
            .try_reserve(additional)
            .map_err(|_| AllocError::NoMemory)
    }

    pub fn insert(&mut self, buf: usize, bufctl: usize) {
        let _old = self.map.insert(buf, bufctl);
        debug_assert!(_old.is_none(), "buffer {:#x} indexed twice", buf);
    }

    pub fn get(&self, buf: usize) -> Option<usize> {
        self.map.get(&buf).copied()
    }

    pub fn remove(&mut self, buf: usize) -> Option<usize> {
        self.map.remove(&buf)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
