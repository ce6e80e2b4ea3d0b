//! Per-request arena allocator.
//!
//! A bump allocator over ~4 KiB chunks, with two escape hatches: *direct*
//! blocks for allocations too large to bump-pack, and *shared refs* to
//! refcounted entries that may outlive the arena (see
//! [`SharedBytes`](crate::mem::shared::SharedBytes)).
//!
//! Lifetimes are the contract: every slice handed out by [`Pool::alloc`] is
//! valid until [`Pool::clear`], which the borrow checker enforces (`clear`
//! takes `&mut self`). A shared entry stays alive past `clear` for as long as
//! some external holder keeps a reference.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Write};
use std::ptr::NonNull;
use std::slice;

use crate::mem::shared::SharedBytes;

/// Usable bytes per chunk, mirroring a 4 KiB block minus its header.
pub const CHUNK_PAYLOAD: usize = 4096 - 2 * std::mem::size_of::<usize>();

/// Allocations at or above this size bypass the bump chunks.
const DIRECT_THRESHOLD: usize = CHUNK_PAYLOAD / 4;

/// Bump granularity; every bump allocation is rounded up to this.
const ALIGN: usize = 16;

/// Chunks are handed out as raw blocks so outstanding loans are never
/// re-borrowed through safe references; they are freed in `clear` / `Drop`.
struct RawBlock {
    ptr: NonNull<u8>,
    len: usize,
}

impl RawBlock {
    fn alloc_zeroed(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(boxed) as *mut u8;
        Self {
            ptr: NonNull::new(ptr).expect("allocation failed"),
            len,
        }
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(slice::from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

pub struct Pool {
    /// Chunk list; `chunks[0]` is the embedded first chunk and survives
    /// `clear` with only its offset reset.
    chunks: RefCell<Vec<RawBlock>>,
    /// Bump offset into the last chunk.
    offset: Cell<usize>,
    directs: RefCell<Vec<RawBlock>>,
    shared_refs: RefCell<Vec<SharedBytes>>,
}

impl Pool {
    pub fn new() -> Self {
        Self {
            chunks: RefCell::new(vec![RawBlock::alloc_zeroed(CHUNK_PAYLOAD)]),
            offset: Cell::new(0),
            directs: RefCell::new(Vec::new()),
            shared_refs: RefCell::new(Vec::new()),
        }
    }

    /// Bump-allocates `size` zeroed bytes, valid until [`Pool::clear`].
    ///
    /// Sizes of `CHUNK_PAYLOAD / 4` and above are placed on the direct list
    /// instead so a single large request cannot blow up chunk usage.
    /// Allocation failure aborts the process; there is no error path.
    pub fn alloc(&self, size: usize) -> &mut [u8] {
        if size >= DIRECT_THRESHOLD {
            let block = RawBlock::alloc_zeroed(size);
            let ptr = block.ptr.as_ptr();
            self.directs.borrow_mut().push(block);
            // Each direct block is handed out exactly once and freed only by
            // `clear` / `Drop`, which require the loan to have ended.
            return unsafe { slice::from_raw_parts_mut(ptr, size) };
        }

        let rounded = (size + (ALIGN - 1)) & !(ALIGN - 1);
        let mut chunks = self.chunks.borrow_mut();
        if CHUNK_PAYLOAD < self.offset.get() + rounded {
            chunks.push(RawBlock::alloc_zeroed(CHUNK_PAYLOAD));
            self.offset.set(0);
        }
        let off = self.offset.get();
        self.offset.set(off + rounded);
        let ptr = unsafe { chunks.last().unwrap().ptr.as_ptr().add(off) };
        // Bump regions never overlap: the offset only moves forward until
        // `clear`, so every loan covers a distinct byte range.
        unsafe { slice::from_raw_parts_mut(ptr, size) }
    }

    /// Allocates a shared entry holding a copy of `src` and records one hold
    /// in this pool, released on [`Pool::clear`]. This is the arena string:
    /// it lives exactly as long as the request unless somebody addrefs it.
    pub fn strdup(&self, src: &[u8]) -> SharedBytes {
        let entry = SharedBytes::copy_of(src);
        self.shared_refs.borrow_mut().push(entry.clone());
        entry
    }

    /// Records one pool hold on an existing shared entry.
    pub fn link_shared(&self, entry: &SharedBytes) {
        self.shared_refs.borrow_mut().push(entry.clone());
    }

    /// `format!` into a pool-held shared entry.
    pub fn format(&self, args: fmt::Arguments<'_>) -> SharedBytes {
        let mut s = String::new();
        s.write_fmt(args).expect("formatting never fails");
        let entry = SharedBytes::from_vec(s.into_bytes());
        self.shared_refs.borrow_mut().push(entry.clone());
        entry
    }

    /// Releases the pool's shared holds in list order, frees every direct
    /// block and every chunk except the embedded first, and resets the first
    /// chunk's offset to zero.
    pub fn clear(&mut self) {
        self.shared_refs.get_mut().drain(..).for_each(|entry| {
            entry.release();
        });
        self.directs.get_mut().clear();
        self.chunks.get_mut().truncate(1);
        self.offset.set(0);
    }

    /// Number of chunks currently owned (the first included).
    #[cfg(test)]
    pub(crate) fn chunk_count(&self) -> usize {
        self.chunks.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn direct_count(&self) -> usize {
        self.directs.borrow().len()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("chunks", &self.chunks.borrow().len())
            .field("offset", &self.offset.get())
            .field("directs", &self.directs.borrow().len())
            .field("shared_refs", &self.shared_refs.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_allocations_bump_pack() {
        let pool = Pool::new();
        for _ in 0..16 {
            let b = pool.alloc(100);
            assert_eq!(b.len(), 100);
        }
        // 16 * 112 rounded bytes fit comfortably in the first chunk.
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn chunk_rollover() {
        let pool = Pool::new();
        let per = 512;
        let fits = CHUNK_PAYLOAD / ((per + 15) & !15);
        for _ in 0..(fits + 1) {
            pool.alloc(per);
        }
        assert_eq!(pool.chunk_count(), 2);
    }

    #[test]
    fn large_allocations_go_direct() {
        let pool = Pool::new();
        pool.alloc(CHUNK_PAYLOAD / 4);
        pool.alloc(CHUNK_PAYLOAD * 3);
        assert_eq!(pool.direct_count(), 2);
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn clear_keeps_first_chunk_reusable() {
        let mut pool = Pool::new();
        for _ in 0..40 {
            pool.alloc(1024);
        }
        assert!(pool.chunk_count() > 1);

        pool.clear();
        assert_eq!(pool.chunk_count(), 1);

        // A post-clear allocation within the payload reuses the first chunk.
        pool.alloc(CHUNK_PAYLOAD / 8);
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn strdup_lives_until_clear() {
        let mut pool = Pool::new();
        let s = pool.strdup(b"transient");
        assert_eq!(s.ref_count(), 2); // pool + returned handle
        pool.clear();
        assert_eq!(s.ref_count(), 1);
        assert_eq!(s.as_slice(), b"transient");
    }

    #[test]
    fn shared_entry_outlives_clear_with_external_holder() {
        let mut pool = Pool::new();
        let body = pool.strdup(b"response body");
        let write_queue_hold = body.addref();
        drop(body);

        pool.clear();
        // The socket's hold keeps the entry alive past the arena.
        assert_eq!(write_queue_hold.as_slice(), b"response body");
        assert!(write_queue_hold.release());
    }

    #[test]
    fn link_shared_adds_a_pool_hold() {
        let mut pool = Pool::new();
        let entry = SharedBytes::copy_of(b"detached");
        pool.link_shared(&entry);
        assert_eq!(entry.ref_count(), 2);
        pool.clear();
        assert_eq!(entry.ref_count(), 1);
    }

    #[test]
    fn format_into_pool() {
        let pool = Pool::new();
        let s = pool.format(format_args!("{:x}\r\n", 171));
        assert_eq!(s.as_slice(), b"ab\r\n");
    }
}
