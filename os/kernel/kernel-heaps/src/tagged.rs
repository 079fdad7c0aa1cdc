use crate::{Heap, HeapError};
use log::warn;

/// An address split into the parent allocation and its class tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaggedAddress {
    tag: u64,
    offset: u64,
}

impl TaggedAddress {
    #[must_use]
    pub const fn new(tag: u64, offset: u64) -> Self {
        Self { tag, offset }
    }

    /// Split a packed address; `tag_mask` selects the tag bits.
    #[must_use]
    pub const fn from_raw(raw: u64, tag_mask: u64) -> Self {
        Self {
            tag: raw & tag_mask,
            offset: raw & !tag_mask,
        }
    }

    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.offset | self.tag
    }

    #[must_use]
    pub const fn tag(self) -> u64 {
        self.tag
    }

    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }
}

/// Wraps a parent heap and ORs a fixed tag into every address it returns.
///
/// The tag must fit below the parent's granularity; this is checked once in
/// [`TaggedHeap::new`].
#[derive(Debug)]
pub struct TaggedHeap<P> {
    parent: P,
    tag: u64,
    mask: u64,
}

impl<P: Heap> TaggedHeap<P> {
    /// # Errors
    /// `tag` would overlap address bits the parent can set.
    pub fn new(parent: P, tag: u64) -> Result<Self, HeapError> {
        let granularity = parent.granularity();
        if tag >= granularity {
            return Err(HeapError::TagOverlapsAlignment { tag, granularity });
        }
        Ok(Self {
            parent,
            tag,
            mask: granularity - 1,
        })
    }

    #[must_use]
    pub const fn tag(&self) -> u64 {
        self.tag
    }

    /// Bits of a returned address that carry the tag.
    #[must_use]
    pub const fn tag_mask(&self) -> u64 {
        self.mask
    }

    pub fn alloc_tagged(&self, size: u64) -> Option<TaggedAddress> {
        let offset = self.parent.alloc(size)?;
        Some(TaggedAddress::new(self.tag, offset))
    }
}

impl<P: Heap> Heap for TaggedHeap<P> {
    fn alloc(&self, size: u64) -> Option<u64> {
        self.alloc_tagged(size).map(TaggedAddress::into_raw)
    }

    fn dealloc(&self, addr: u64, size: u64) {
        let tagged = TaggedAddress::from_raw(addr, self.mask);
        if tagged.tag() != self.tag {
            warn!(
                "tagged heap {:#x}: dealloc of {addr:#x} carrying tag {:#x}",
                self.tag,
                tagged.tag()
            );
            return;
        }
        self.parent.dealloc(tagged.offset(), size);
    }

    fn granularity(&self) -> u64 {
        self.parent.granularity()
    }

    fn set_randomize(&self, randomize: bool) {
        self.parent.set_randomize(randomize);
    }
}
