//! Refcounted shared byte entries.
//!
//! A shared entry is a heap block whose lifetime is independent of any single
//! arena: the arena that created it holds one reference, dropped on
//! [`Pool::clear`](crate::mem::pool::Pool::clear), while filters and socket
//! write queues may keep their own holds past the request's lifetime.

use std::fmt;
use std::ops::{Deref, Range};
use std::rc::Rc;

/// A write-only staging buffer, unique until frozen into a [`SharedBytes`].
///
/// This is the fill-then-share half of the shared entry: fill the bytes while
/// the buffer is exclusively owned, then [`freeze`](SharedBufMut::freeze) to
/// obtain a refcounted, immutable handle.
pub struct SharedBufMut {
    bytes: Vec<u8>,
}

impl SharedBufMut {
    /// Creates a zero-filled staging buffer of `len` bytes.
    #[inline]
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Freezes into an immutable, refcounted entry with refcount 1.
    #[inline]
    pub fn freeze(self) -> SharedBytes {
        SharedBytes::from_vec(self.bytes)
    }

    /// Freezes only the first `len` bytes (for partially filled buffers).
    #[inline]
    pub fn freeze_prefix(mut self, len: usize) -> SharedBytes {
        self.bytes.truncate(len);
        self.freeze()
    }
}

/// An immutable view into a refcounted shared entry.
///
/// Cloning adds a reference; dropping the last holder frees the entry.
/// Views are cheap: narrowing with [`view`](SharedBytes::view) shares the
/// backing allocation instead of copying.
pub struct SharedBytes {
    entry: Rc<[u8]>,
    start: usize,
    end: usize,
}

impl SharedBytes {
    /// An empty view that owns no entry worth speaking of.
    #[inline]
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Allocates a fresh entry holding a copy of `src`, refcount 1.
    #[inline]
    pub fn copy_of(src: &[u8]) -> Self {
        let entry: Rc<[u8]> = Rc::from(src);
        let end = entry.len();
        Self { entry, start: 0, end }
    }

    #[inline]
    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        let entry: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        let end = entry.len();
        Self { entry, start: 0, end }
    }

    /// Returns a narrowed view of the same entry. The range is relative to
    /// this view and must lie within it.
    #[inline]
    pub fn view(&self, range: Range<usize>) -> Self {
        assert!(range.start <= range.end && self.start + range.end <= self.end);
        Self {
            entry: Rc::clone(&self.entry),
            start: self.start + range.start,
            end: self.start + range.end,
        }
    }

    /// Adds one reference and returns the new holder. Identical to `clone`,
    /// named for symmetry with [`release`](SharedBytes::release).
    #[inline]
    pub fn addref(&self) -> Self {
        self.clone()
    }

    /// Drops this holder. Returns `true` iff the backing entry was freed.
    #[inline]
    pub fn release(self) -> bool {
        Rc::strong_count(&self.entry) == 1
    }

    /// Number of live holders of the backing entry.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.entry)
    }

    /// Whether both views share one backing entry.
    #[inline]
    pub fn same_entry(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.entry, &other.entry)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.entry[self.start..self.end]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Clone for SharedBytes {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            entry: Rc::clone(&self.entry),
            start: self.start,
            end: self.end,
        }
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for SharedBytes {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for SharedBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl PartialEq<[u8]> for SharedBytes {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_slice() == other
    }
}

impl PartialEq<&[u8]> for SharedBytes {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_slice() == *other
    }
}

impl Eq for SharedBytes {}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedBytes({:?})", String::from_utf8_lossy(self.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_and_view() {
        let b = SharedBytes::copy_of(b"hello world");
        assert_eq!(b.len(), 11);
        assert_eq!(b.as_slice(), b"hello world");

        let v = b.view(6..11);
        assert_eq!(v.as_slice(), b"world");
        assert!(v.same_entry(&b));
        assert_eq!(b.ref_count(), 2);
    }

    #[test]
    fn release_reports_last_holder() {
        let a = SharedBytes::copy_of(b"x");
        let b = a.addref();
        assert_eq!(a.ref_count(), 2);
        assert!(!a.release());
        assert!(b.release());
    }

    #[test]
    fn freeze_prefix() {
        let mut m = SharedBufMut::zeroed(8);
        m.as_mut_slice()[..3].copy_from_slice(b"abc");
        let b = m.freeze_prefix(3);
        assert_eq!(b.as_slice(), b"abc");
    }
}
