//! Bump allocator backing `Config` and `Context` storage.
//!
//! A single growable backing store, allocated from in blocks, bump-style.
//! Nothing is ever freed individually — the whole arena is dropped at once
//! when its owning `Config` or `Context` goes away.
//!
//! # Safety
//!
//! Blocks are heap-allocated (`Box<[u8]>`) and never moved or shrunk once
//! pushed into `blocks`; only the `Vec<Box<[u8]>>` spine reallocates, which
//! relocates the `Box` pointers themselves but not the heap buffers they
//! point at. So a raw pointer taken from a block's buffer stays valid for
//! the arena's lifetime even as more blocks are pushed. `cursor`/`remaining`
//! track the bump position in the *current* block only.

use std::cell::{Cell, RefCell};

const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

pub struct Arena {
    blocks: RefCell<Vec<Box<[u8]>>>,
    cursor: Cell<*mut u8>,
    remaining: Cell<usize>,
    default_block_size: usize,
}

// The arena is only ever touched from the single transaction thread that
// owns its Context; it does not need to be Sync. It is Send because nothing
// in it is thread-affine.
unsafe impl Send for Arena {}

impl Default for Arena {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl Arena {
    pub fn new(default_block_size: usize) -> Self {
        Arena {
            blocks: RefCell::new(Vec::new()),
            cursor: Cell::new(std::ptr::null_mut()),
            remaining: Cell::new(0),
            default_block_size,
        }
    }

    /// Bytes left in the current block, as a mutable scratch slice. Callers
    /// may write into this speculatively (e.g. rendering a composite
    /// expression) and then `alloc` only the prefix they actually used.
    pub fn remnant(&self) -> &mut [u8] {
        if self.remaining.get() == 0 {
            return &mut [];
        }
        // SAFETY: `cursor`/`remaining` describe the unused tail of the
        // current block, which is exclusively owned by this arena and not
        // aliased elsewhere (no other call hands out the same range until
        // `alloc` advances past it).
        unsafe { std::slice::from_raw_parts_mut(self.cursor.get(), self.remaining.get()) }
    }

    /// Ensure the current block's remnant is at least `n` bytes, growing
    /// (and replacing the current block) if necessary.
    pub fn require(&self, n: usize) -> &mut [u8] {
        if self.remaining.get() < n {
            let size = n.max(self.default_block_size);
            let mut block = vec![0u8; size].into_boxed_slice();
            let ptr = block.as_mut_ptr();
            self.blocks.borrow_mut().push(block);
            self.cursor.set(ptr);
            self.remaining.set(size);
        }
        self.remnant()
    }

    /// Permanently allocate `n` bytes from the current remnant (advancing
    /// the bump pointer) and return them. Panics if fewer than `n` bytes are
    /// available — callers must `require` first.
    pub fn alloc(&self, n: usize) -> &mut [u8] {
        assert!(n <= self.remaining.get(), "arena: alloc past remnant");
        // SAFETY: see struct-level comment; `cursor` points into a block we
        // own for the arena's lifetime, and we only ever hand out disjoint
        // successive ranges by advancing `cursor`/`remaining` together.
        let slice = unsafe { std::slice::from_raw_parts_mut(self.cursor.get(), n) };
        // SAFETY: advancing by `n` stays within the current block because
        // `n <= remaining`.
        let new_cursor = unsafe { self.cursor.get().add(n) };
        self.cursor.set(new_cursor);
        self.remaining.set(self.remaining.get() - n);
        slice
    }

    /// Allocate and zero-fill `n` bytes, growing the arena if needed. This
    /// is the workhorse for reserved per-directive storage spans.
    pub fn alloc_zeroed(&self, n: usize) -> &mut [u8] {
        self.require(n);
        let out = self.alloc(n);
        out.fill(0);
        out
    }

    /// Copy `data` into permanent arena storage ("localize" a string).
    pub fn alloc_copy(&self, data: &[u8]) -> &mut [u8] {
        self.require(data.len());
        let out = self.alloc(data.len());
        out.copy_from_slice(data);
        out
    }

    pub fn total_bytes(&self) -> usize {
        self.blocks.borrow().iter().map(|b| b.len()).sum()
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("blocks", &self.blocks.borrow().len())
            .field("remaining", &self.remaining.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_then_alloc_writes_persist() {
        let arena = Arena::new(64);
        let buf = arena.require(8);
        buf[..5].copy_from_slice(b"hello");
        let committed = arena.alloc(5);
        assert_eq!(committed, b"hello");
    }

    #[test]
    fn alloc_copy_localizes_bytes() {
        let arena = Arena::new(16);
        let a = arena.alloc_copy(b"abc").as_ptr();
        let b = arena.alloc_copy(b"def");
        // Distinct, non-overlapping regions.
        assert_ne!(a, b.as_ptr());
        assert_eq!(b, b"def");
    }

    #[test]
    fn growth_allocates_new_block_when_remnant_too_small() {
        let arena = Arena::new(4);
        let _ = arena.alloc_copy(b"ab");
        // Remaining in first block is 2 bytes; this forces a new block.
        let out = arena.alloc_copy(b"abcdefgh");
        assert_eq!(out, b"abcdefgh");
        assert!(arena.total_bytes() >= 4 + 8);
    }
}
