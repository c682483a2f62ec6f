//! Fixed-capacity FIFO buffers for audio samples.
//!
//! Every buffer drops data when full rather than blocking the radio side, and counts the bytes
//! it dropped so the loss is visible in the player statistics.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Full;

/// Byte FIFO an audio pipeline stage reads or writes, owned or shared.
pub trait SampleBuffer {
    /// Append as much of `data` as fits and return how much was taken.
    fn push_slice(&mut self, data: &[u8]) -> usize;
    fn pop_into(&mut self, out: &mut [u8]) -> usize;
    fn len(&self) -> usize;
    /// Fill level in percent.
    fn level(&self) -> u8;
    fn dropped(&self) -> u32;
    fn reset_dropped(&mut self);
    fn clear(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Byte ring of capacity `N`.
#[derive(Debug, Clone)]
pub struct RingBuffer<const N: usize> {
    buf: [u8; N],
    head: usize,
    len: usize,
    dropped: u32,
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        const { assert!(N > 0, "ring capacity must not be zero") };
        Self {
            buf: [0; N],
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn free(&self) -> usize {
        N - self.len
    }

    /// Fill level in percent.
    pub fn level(&self) -> u8 {
        (self.len * 100 / N) as u8
    }

    /// Bytes refused since creation or the last [`RingBuffer::reset_dropped`].
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn reset_dropped(&mut self) {
        self.dropped = 0;
    }

    pub fn push(&mut self, byte: u8) -> Result<(), Full> {
        if self.is_full() {
            self.dropped = self.dropped.saturating_add(1);
            return Err(Full);
        }
        let tail = (self.head + self.len) % N;
        self.buf[tail] = byte;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(byte)
    }

    /// Append as much of `data` as fits. Returns the number of bytes taken; the rest is
    /// counted as dropped.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        let tail = (self.head + self.len) % N;
        let first = n.min(N - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.len += n;
        let refused = (data.len() - n) as u32;
        self.dropped = self.dropped.saturating_add(refused);
        n
    }

    /// Move up to `out.len()` bytes into `out`, oldest first.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        let first = n.min(N - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.head = (self.head + n) % N;
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        }
        n
    }

    /// The oldest bytes that are stored contiguously.
    pub fn peek_contiguous(&self) -> &[u8] {
        let first = self.len.min(N - self.head);
        &self.buf[self.head..self.head + first]
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl<const N: usize> SampleBuffer for RingBuffer<N> {
    fn push_slice(&mut self, data: &[u8]) -> usize {
        RingBuffer::push_slice(self, data)
    }

    fn pop_into(&mut self, out: &mut [u8]) -> usize {
        RingBuffer::pop_into(self, out)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn level(&self) -> u8 {
        RingBuffer::level(self)
    }

    fn dropped(&self) -> u32 {
        self.dropped
    }

    fn reset_dropped(&mut self) {
        self.dropped = 0;
    }

    fn clear(&mut self) {
        RingBuffer::clear(self)
    }
}

/// Queue of `COUNT` fixed-size slots of `SIZE` bytes each.
#[derive(Debug, Clone)]
pub struct ChunkQueue<const SIZE: usize, const COUNT: usize> {
    slots: [[u8; SIZE]; COUNT],
    lens: [usize; COUNT],
    read: usize,
    used: usize,
    dropped: u32,
}

impl<const SIZE: usize, const COUNT: usize> Default for ChunkQueue<SIZE, COUNT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize, const COUNT: usize> ChunkQueue<SIZE, COUNT> {
    pub const fn new() -> Self {
        const { assert!(SIZE > 0 && COUNT > 0, "chunk queue needs at least one non-empty slot") };
        Self {
            slots: [[0; SIZE]; COUNT],
            lens: [0; COUNT],
            read: 0,
            used: 0,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == COUNT
    }

    /// Bytes refused since creation or the last [`ChunkQueue::reset_dropped`]: whole chunks
    /// that found every slot in use, and the tails cut off chunks longer than `SIZE`.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn reset_dropped(&mut self) {
        self.dropped = 0;
    }

    /// Copy up to `SIZE` bytes of `chunk` into the next free slot.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), Full> {
        if self.is_full() {
            self.dropped = self.dropped.saturating_add(chunk.len() as u32);
            return Err(Full);
        }
        let idx = (self.read + self.used) % COUNT;
        let n = chunk.len().min(SIZE);
        if n < chunk.len() {
            self.dropped = self.dropped.saturating_add((chunk.len() - n) as u32);
        }
        self.slots[idx][..n].copy_from_slice(&chunk[..n]);
        self.lens[idx] = n;
        self.used += 1;
        Ok(())
    }

    /// Oldest chunk, valid until the next mutation.
    pub fn pop(&mut self) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }
        let idx = self.read;
        self.read = (self.read + 1) % COUNT;
        self.used -= 1;
        Some(&self.slots[idx][..self.lens[idx]])
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.used = 0;
    }
}

/// A [`RingBuffer`] shared between the radio task and the playback task.
pub struct SharedRing<M: RawMutex, const N: usize> {
    inner: Mutex<M, RefCell<RingBuffer<N>>>,
}

impl<M: RawMutex, const N: usize> SharedRing<M, N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(RingBuffer::new())),
        }
    }

    pub fn push_slice(&self, data: &[u8]) -> usize {
        self.inner.lock(|r| r.borrow_mut().push_slice(data))
    }

    pub fn pop_into(&self, out: &mut [u8]) -> usize {
        self.inner.lock(|r| r.borrow_mut().pop_into(out))
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|r| r.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn level(&self) -> u8 {
        self.inner.lock(|r| r.borrow().level())
    }

    pub fn dropped(&self) -> u32 {
        self.inner.lock(|r| r.borrow().dropped())
    }

    pub fn reset_dropped(&self) {
        self.inner.lock(|r| r.borrow_mut().reset_dropped())
    }

    pub fn clear(&self) {
        self.inner.lock(|r| r.borrow_mut().clear())
    }

    /// Run `f` with exclusive access to the ring.
    pub fn with<T>(&self, f: impl FnOnce(&mut RingBuffer<N>) -> T) -> T {
        self.inner.lock(|r| f(&mut r.borrow_mut()))
    }
}

impl<M: RawMutex, const N: usize> SampleBuffer for &SharedRing<M, N> {
    fn push_slice(&mut self, data: &[u8]) -> usize {
        SharedRing::push_slice(self, data)
    }

    fn pop_into(&mut self, out: &mut [u8]) -> usize {
        SharedRing::pop_into(self, out)
    }

    fn len(&self) -> usize {
        SharedRing::len(self)
    }

    fn level(&self) -> u8 {
        SharedRing::level(self)
    }

    fn dropped(&self) -> u32 {
        SharedRing::dropped(self)
    }

    fn reset_dropped(&mut self) {
        SharedRing::reset_dropped(self)
    }

    fn clear(&mut self) {
        SharedRing::clear(self)
    }
}

impl<M: RawMutex, const N: usize> Default for SharedRing<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::*;

    #[test]
    fn test_push_pop_order() {
        let mut ring: RingBuffer<4> = RingBuffer::new();
        assert_eq!(ring.pop(), None);
        for b in 1..=4 {
            ring.push(b).unwrap();
        }
        assert_eq!(ring.push(5), Err(Full));
        assert_eq!(ring.dropped(), 1);
        assert_eq!(ring.pop(), Some(1));
        ring.push(6).unwrap();
        let mut out = [0; 8];
        assert_eq!(ring.pop_into(&mut out), 4);
        assert_eq!(&out[..4], &[2, 3, 4, 6]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_slices_wrap() {
        let mut ring: RingBuffer<8> = RingBuffer::new();
        assert_eq!(ring.push_slice(&[0, 1, 2, 3, 4, 5]), 6);
        let mut out = [0; 4];
        ring.pop_into(&mut out);
        assert_eq!(out, [0, 1, 2, 3]);

        // tail wraps past the end of storage
        assert_eq!(ring.push_slice(&[6, 7, 8, 9, 10, 11, 12]), 6);
        assert_eq!(ring.dropped(), 1);
        assert!(ring.is_full());
        assert_eq!(ring.level(), 100);
        assert_eq!(ring.peek_contiguous(), &[4, 5, 6, 7]);

        let mut out = [0; 8];
        assert_eq!(ring.pop_into(&mut out), 8);
        assert_eq!(out, [4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_chunk_queue() {
        let mut q: ChunkQueue<4, 2> = ChunkQueue::new();
        assert!(q.pop().is_none());
        q.push(&[1, 2]).unwrap();
        // one byte too long for a slot
        q.push(&[3, 4, 5, 6, 7]).unwrap();
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.push(&[8, 8]), Err(Full));
        assert_eq!(q.dropped(), 3);
        assert_eq!(q.pop(), Some(&[1, 2][..]));
        q.push(&[9]).unwrap();
        assert_eq!(q.pop(), Some(&[3, 4, 5, 6][..]));
        assert_eq!(q.pop(), Some(&[9][..]));
        assert!(q.is_empty());
    }

    #[test]
    fn test_shared_ring() {
        let ring: SharedRing<NoopRawMutex, 4> = SharedRing::new();
        assert_eq!(ring.push_slice(&[1, 2, 3, 4, 5]), 4);
        assert_eq!(ring.dropped(), 1);
        assert_eq!(ring.with(|r| r.pop()), Some(1));
        ring.clear();
        assert!(ring.is_empty());
    }

    fn fill<B: SampleBuffer>(mut buffer: B, data: &[u8]) -> B {
        buffer.push_slice(data);
        buffer
    }

    fn drain<B: SampleBuffer>(buffer: &mut B, out: &mut [u8]) -> usize {
        buffer.pop_into(out)
    }

    #[test]
    fn test_sample_buffer_shared_and_owned() {
        let shared: SharedRing<NoopRawMutex, 4> = SharedRing::new();
        let writer = fill(&shared, &[1, 2, 3]);
        let mut reader = &shared;
        let mut out = [0; 2];
        assert_eq!(drain(&mut reader, &mut out), 2);
        assert_eq!(out, [1, 2]);
        let mut writer = fill(writer, &[4, 5, 6, 7]);
        assert_eq!(SampleBuffer::len(&reader), 4);
        assert_eq!(SampleBuffer::dropped(&reader), 1);
        assert_eq!(SampleBuffer::level(&reader), 100);
        SampleBuffer::clear(&mut writer);
        assert!(SampleBuffer::is_empty(&reader));

        let owned = fill(RingBuffer::<2>::new(), &[9, 9, 9]);
        assert_eq!(SampleBuffer::dropped(&owned), 1);
        assert_eq!(SampleBuffer::len(&owned), 2);
    }
}
