//! Chunked ring buffer between the producer and consumer threads.
//!
//! Storage is a fixed array of fixed-size byte chunks. The producer decodes
//! directly into the current write chunk; a commit seals the chunk (short
//! reads seal it with short data) and hands it to the consumer. The consumer
//! drains sealed chunks in order and recycles them.
//!
//! [`ChunkBuffer::new`] returns a writer/reader pair sharing the storage.
//! Exclusive `&mut` access on each handle encodes the single-producer /
//! single-consumer discipline; the per-chunk sealed flag is the only
//! cross-thread state. Resizing is replacement: the player builds a new pair
//! while holding both of its locks and swaps the handles in.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Size of one buffer chunk in bytes.
pub const CHUNK_SIZE: usize = 4096;

struct Chunk {
    data: UnsafeCell<[u8; CHUNK_SIZE]>,
    /// Read offset within the chunk. Touched by the reader while sealed.
    low: AtomicUsize,
    /// Write offset within the chunk. Touched by the writer while unsealed.
    high: AtomicUsize,
    /// Set (release) by the writer on commit, cleared (release) by the
    /// reader when drained. The acquire load on the other side orders the
    /// data accesses.
    sealed: AtomicBool,
}

impl Chunk {
    fn new() -> Self {
        Self {
            data: UnsafeCell::new([0; CHUNK_SIZE]),
            low: AtomicUsize::new(0),
            high: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
        }
    }
}

struct Shared {
    chunks: Box<[Chunk]>,
}

// SAFETY: the only interior-mutable state is `data`. The writer accesses a
// chunk's data only while `sealed` is false, the reader only while it is
// true, and the flag transitions use release/acquire ordering, so the two
// sides never touch the same bytes concurrently.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

impl Shared {
    fn filled_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.sealed.load(Ordering::Relaxed))
            .count()
    }

    fn free_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| !c.sealed.load(Ordering::Relaxed) && c.high.load(Ordering::Relaxed) == 0)
            .count()
    }
}

/// Constructor namespace for the buffer pair.
pub struct ChunkBuffer;

impl ChunkBuffer {
    /// Create a buffer of `chunk_count` chunks and return its two handles.
    pub fn new(chunk_count: usize) -> (ChunkWriter, ChunkReader) {
        assert!(chunk_count >= 1);
        let shared = Arc::new(Shared {
            chunks: (0..chunk_count).map(|_| Chunk::new()).collect(),
        });
        (
            ChunkWriter {
                shared: Arc::clone(&shared),
                widx: 0,
            },
            ChunkReader { shared, ridx: 0 },
        )
    }

    /// Discard all buffered data. Requires both handles, which the player
    /// only has while holding both the consumer and producer locks.
    pub fn reset(writer: &mut ChunkWriter, reader: &mut ChunkReader) {
        debug_assert!(Arc::ptr_eq(&writer.shared, &reader.shared));
        for chunk in writer.shared.chunks.iter() {
            chunk.low.store(0, Ordering::Relaxed);
            chunk.high.store(0, Ordering::Relaxed);
            chunk.sealed.store(false, Ordering::Release);
        }
        writer.widx = 0;
        reader.ridx = 0;
    }
}

/// Producer-side handle.
pub struct ChunkWriter {
    shared: Arc<Shared>,
    widx: usize,
}

impl ChunkWriter {
    /// The writable remainder of the current chunk. Empty when the buffer is
    /// full.
    pub fn write_region(&mut self) -> &mut [u8] {
        let chunk = &self.shared.chunks[self.widx];
        if chunk.sealed.load(Ordering::Acquire) {
            // ring is full: the write cursor caught up with unread data
            return &mut [];
        }
        let high = chunk.high.load(Ordering::Relaxed);
        // SAFETY: the chunk is unsealed, so the reader does not access its
        // data; `&mut self` guarantees no other writer-side borrow exists.
        unsafe { &mut (&mut *chunk.data.get())[high..] }
    }

    /// Commit `n` bytes written to the current region and seal the chunk.
    ///
    /// Any commit with data in the chunk seals it, so a short decoder read
    /// produces a short chunk and the write position rounds up to the next
    /// chunk boundary. Committing zero bytes to an untouched chunk is a
    /// no-op.
    pub fn commit(&mut self, n: usize) {
        let chunk = &self.shared.chunks[self.widx];
        if chunk.sealed.load(Ordering::Relaxed) {
            // buffer full; only a zero commit after an empty region gets here
            debug_assert_eq!(n, 0);
            return;
        }
        let high = chunk.high.load(Ordering::Relaxed) + n;
        debug_assert!(high <= CHUNK_SIZE);
        chunk.high.store(high, Ordering::Relaxed);
        if high == 0 {
            return;
        }
        chunk.sealed.store(true, Ordering::Release);
        self.widx = (self.widx + 1) % self.shared.chunks.len();
    }

    /// Number of sealed, unread chunks.
    pub fn filled_chunks(&self) -> usize {
        self.shared.filled_chunks()
    }

    /// Number of completely empty chunks.
    pub fn free_chunks(&self) -> usize {
        self.shared.free_chunks()
    }

    pub fn chunk_count(&self) -> usize {
        self.shared.chunks.len()
    }
}

/// Consumer-side handle.
pub struct ChunkReader {
    shared: Arc<Shared>,
    ridx: usize,
}

impl ChunkReader {
    /// The unread bytes of the oldest sealed chunk. Empty when nothing is
    /// sealed.
    pub fn read_region(&mut self) -> &[u8] {
        let chunk = &self.shared.chunks[self.ridx];
        if !chunk.sealed.load(Ordering::Acquire) {
            return &[];
        }
        let low = chunk.low.load(Ordering::Relaxed);
        let high = chunk.high.load(Ordering::Relaxed);
        // SAFETY: the chunk is sealed, so the writer does not access its
        // data until the reader clears the flag below.
        unsafe { &(&*chunk.data.get())[low..high] }
    }

    /// Consume `n` bytes of the current read region. A fully drained chunk
    /// is recycled and the read position rounds up to the next boundary.
    pub fn consume(&mut self, n: usize) {
        let chunk = &self.shared.chunks[self.ridx];
        if !chunk.sealed.load(Ordering::Relaxed) {
            // nothing readable; only a zero consume after an empty region gets here
            debug_assert_eq!(n, 0);
            return;
        }
        let low = chunk.low.load(Ordering::Relaxed) + n;
        let high = chunk.high.load(Ordering::Relaxed);
        debug_assert!(low <= high);
        if low < high {
            chunk.low.store(low, Ordering::Relaxed);
            return;
        }
        chunk.low.store(0, Ordering::Relaxed);
        chunk.high.store(0, Ordering::Relaxed);
        chunk.sealed.store(false, Ordering::Release);
        self.ridx = (self.ridx + 1) % self.shared.chunks.len();
    }

    /// Number of sealed, unread chunks.
    pub fn filled_chunks(&self) -> usize {
        self.shared.filled_chunks()
    }

    pub fn free_chunks(&self) -> usize {
        self.shared.free_chunks()
    }

    pub fn chunk_count(&self) -> usize {
        self.shared.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fill_chunk(w: &mut ChunkWriter, byte: u8, n: usize) -> usize {
        let region = w.write_region();
        let n = n.min(region.len());
        for b in &mut region[..n] {
            *b = byte;
        }
        w.commit(n);
        n
    }

    #[test]
    fn test_empty_buffer() {
        let (mut w, mut r) = ChunkBuffer::new(3);
        assert_eq!(w.chunk_count(), 3);
        assert_eq!(w.filled_chunks(), 0);
        assert_eq!(w.free_chunks(), 3);
        assert!(r.read_region().is_empty());
        assert_eq!(w.write_region().len(), CHUNK_SIZE);
    }

    #[test]
    fn test_short_commit_seals_chunk() {
        let (mut w, mut r) = ChunkBuffer::new(3);
        fill_chunk(&mut w, 0xAA, 100);
        assert_eq!(w.filled_chunks(), 1);
        // the next write region is a fresh chunk, not the remainder
        assert_eq!(w.write_region().len(), CHUNK_SIZE);
        let region = r.read_region();
        assert_eq!(region.len(), 100);
        assert!(region.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_commit_zero_on_empty_chunk_is_noop() {
        let (mut w, mut r) = ChunkBuffer::new(3);
        w.commit(0);
        assert_eq!(w.filled_chunks(), 0);
        assert!(r.read_region().is_empty());
        r.consume(0);
        assert_eq!(w.filled_chunks(), 0);
    }

    #[test]
    fn test_full_buffer_reports_no_space() {
        let (mut w, _r) = ChunkBuffer::new(2);
        fill_chunk(&mut w, 1, CHUNK_SIZE);
        fill_chunk(&mut w, 2, CHUNK_SIZE);
        assert_eq!(w.filled_chunks(), 2);
        assert!(w.write_region().is_empty());
    }

    #[test]
    fn test_partial_consume_then_drain() {
        let (mut w, mut r) = ChunkBuffer::new(2);
        fill_chunk(&mut w, 7, 1000);
        r.consume(400);
        assert_eq!(r.read_region().len(), 600);
        r.consume(600);
        assert_eq!(r.filled_chunks(), 0);
        assert!(r.read_region().is_empty());
    }

    #[test]
    fn test_wraparound_order_preserved() {
        let (mut w, mut r) = ChunkBuffer::new(2);
        for round in 0u8..6 {
            fill_chunk(&mut w, round, 10);
            let region = r.read_region();
            assert_eq!(region, &[round; 10][..]);
            r.consume(10);
        }
    }

    #[test]
    fn test_reset_discards_everything() {
        let (mut w, mut r) = ChunkBuffer::new(3);
        fill_chunk(&mut w, 9, CHUNK_SIZE);
        fill_chunk(&mut w, 9, 50);
        ChunkBuffer::reset(&mut w, &mut r);
        assert_eq!(w.filled_chunks(), 0);
        assert_eq!(w.free_chunks(), 3);
        assert!(r.read_region().is_empty());
        assert_eq!(w.write_region().len(), CHUNK_SIZE);
    }

    proptest! {
        /// Random interleaving of writes and reads keeps the accounting
        /// consistent and never hands out a region crossing a chunk.
        #[test]
        fn prop_accounting_invariants(ops in proptest::collection::vec((any::<bool>(), 1usize..=CHUNK_SIZE), 1..200)) {
            let (mut w, mut r) = ChunkBuffer::new(4);
            for (write, n) in ops {
                if write {
                    let region = w.write_region();
                    prop_assert!(region.len() <= CHUNK_SIZE);
                    let n = n.min(region.len());
                    w.commit(n);
                } else {
                    let avail = r.read_region().len();
                    prop_assert!(avail <= CHUNK_SIZE);
                    r.consume(n.min(avail));
                }
                prop_assert!(w.filled_chunks() + w.free_chunks() <= w.chunk_count());
            }
        }
    }
}
