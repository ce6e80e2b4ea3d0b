//! Growable input buffer with consume-from-front semantics.
//!
//! Shared between the socket reader and the protocol parser: the reader
//! fills the unused tail, the parser consumes from the front. Capacity is
//! never returned while the buffer lives; growth doubles.

const MIN_CAPACITY: usize = 4096;

#[derive(Default)]
pub struct InputBuffer {
    bytes: Box<[u8]>,
    size: usize,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The filled prefix.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.size]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the unused tail, at least `min` bytes long, for the reader to
    /// fill. Grows by doubling when the tail is too small. Bytes already in
    /// the buffer are unchanged.
    pub fn tail(&mut self, min: usize) -> &mut [u8] {
        if self.bytes.len() - self.size < min {
            let mut cap = self.bytes.len().max(MIN_CAPACITY);
            while cap - self.size < min {
                cap *= 2;
            }
            let mut grown = vec![0u8; cap].into_boxed_slice();
            grown[..self.size].copy_from_slice(&self.bytes[..self.size]);
            self.bytes = grown;
        }
        &mut self.bytes[self.size..]
    }

    /// Marks `n` tail bytes as filled.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.size + n <= self.bytes.len());
        self.size += n;
    }

    /// Logically removes the first `n` bytes, shifting the remainder to the
    /// front. Capacity is kept for reuse.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.size);
        self.bytes.copy_within(n..self.size, 0);
        self.size -= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buf: &mut InputBuffer, data: &[u8]) {
        let tail = buf.tail(data.len());
        tail[..data.len()].copy_from_slice(data);
        buf.advance(data.len());
    }

    #[test]
    fn fill_and_consume() {
        let mut buf = InputBuffer::new();
        fill(&mut buf, b"GET / HTTP/1.1\r\n");
        fill(&mut buf, b"Host: x\r\n\r\n");
        assert_eq!(buf.bytes(), b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

        buf.consume(16);
        assert_eq!(buf.bytes(), b"Host: x\r\n\r\n");
        buf.consume(buf.len());
        assert!(buf.is_empty());
        assert!(buf.capacity() >= MIN_CAPACITY);
    }

    #[test]
    fn growth_preserves_content() {
        let mut buf = InputBuffer::new();
        let chunk = [0x5a_u8; 3000];
        for _ in 0..4 {
            fill(&mut buf, &chunk);
        }
        assert_eq!(buf.len(), 12000);
        assert!(buf.bytes().iter().all(|&b| b == 0x5a));
    }

    #[test]
    fn tail_does_not_touch_filled_prefix() {
        let mut buf = InputBuffer::new();
        fill(&mut buf, b"abc");
        let _ = buf.tail(10_000);
        assert_eq!(buf.bytes(), b"abc");
    }
}
