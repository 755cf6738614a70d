//! Slab ordering ring.
//!
//! Every slab of a cache is a member of one circular doubly-linked list whose
//! links live in the slab headers. Slabs are identified by header address.
//! `next` walks from the head towards the tail and wraps from the tail back
//! to the head; `prev` walks the other way.

use super::slab_node::SlabNode;

pub(crate) struct SlabRing {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl SlabRing {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Link a slab that is not yet a member as the new head.
    pub fn push_front(&mut self, slab: usize) {
        self.link(slab);
        self.head = Some(slab);
    }

    /// Link a slab that is not yet a member as the new tail.
    pub fn push_back(&mut self, slab: usize) {
        self.link(slab);
        self.tail = Some(slab);
    }

    /// Splice `slab` in between the tail and the head. The caller decides
    /// which end it becomes.
    fn link(&mut self, slab: usize) {
        let mut node = SlabNode::new(slab);
        match (self.head, self.tail) {
            (Some(head), Some(tail)) => {
                node.set_next(Some(head));
                node.set_prev(Some(tail));
                SlabNode::new(head).set_prev(Some(slab));
                SlabNode::new(tail).set_next(Some(slab));
            }
            _ => {
                node.set_next(Some(slab));
                node.set_prev(Some(slab));
                self.head = Some(slab);
                self.tail = Some(slab);
            }
        }
        self.len += 1;
    }

    /// Unlink a member. A removed head is replaced by the slab after it, a
    /// removed tail by the slab before it.
    pub fn remove(&mut self, slab: usize) {
        debug_assert!(self.len > 0, "remove from an empty slab ring");
        let mut node = SlabNode::new(slab);

        if self.len == 1 {
            self.head = None;
            self.tail = None;
        } else {
            let (Some(prev), Some(next)) = (node.prev(), node.next()) else {
                panic!("slab {:#x} is not linked into the ring", slab);
            };
            SlabNode::new(prev).set_next(Some(next));
            SlabNode::new(next).set_prev(Some(prev));

            if self.head == Some(slab) {
                self.head = Some(next);
            }
            if self.tail == Some(slab) {
                self.tail = Some(prev);
            }
        }

        node.set_prev(None);
        node.set_next(None);
        self.len -= 1;
    }

    pub fn move_to_front(&mut self, slab: usize) {
        if self.head == Some(slab) {
            return;
        }
        self.remove(slab);
        self.push_front(slab);
    }

    pub fn move_to_back(&mut self, slab: usize) {
        if self.tail == Some(slab) {
            return;
        }
        self.remove(slab);
        self.push_back(slab);
    }

    /// Members from head to tail.
    pub fn iter(&self) -> SlabRingIter {
        SlabRingIter {
            cur: self.head,
            remaining: self.len,
        }
    }
}

pub(crate) struct SlabRingIter {
    cur: Option<usize>,
    remaining: usize,
}

impl Iterator for SlabRingIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let slab = self.cur?;
        self.remaining -= 1;
        self.cur = SlabNode::new(slab).next();
        Some(slab)
    }
}
