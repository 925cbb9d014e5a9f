//! Lock-free single-producer single-consumer ring buffer for decoded audio.
//!
//! The update thread WRITES bytes into the buffer (producer) and the device
//! callback READS them (consumer). No mutex is ever taken and the consumer
//! never blocks, even when the buffer is empty.
//!
//! Accounting is done in *frames* (one interleaved sample across all
//! channels, `bytes_per_frame` bytes wide), so producer and consumer always
//! move whole frames and wrap points stay frame-aligned.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer {
    /// The sample data. Fixed-size, allocated once.
    buf: Box<[u8]>,
    /// Write position in frames (only advanced by the producer).
    write_pos: AtomicUsize,
    /// Read position in frames (only advanced by the consumer).
    read_pos: AtomicUsize,
    /// Capacity in frames, always a power of two.
    capacity: usize,
    /// Bit mask for fast modulo: capacity - 1.
    mask: usize,
    bytes_per_frame: usize,
}

impl RingBuffer {
    /// Creates a ring holding `2^power` frames of `bytes_per_frame` bytes.
    pub fn new(power: u32, bytes_per_frame: usize) -> Self {
        assert!(bytes_per_frame > 0, "frame size must be non-zero");
        let capacity = 1usize << power;

        Self {
            buf: vec![0u8; capacity * bytes_per_frame].into_boxed_slice(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
            bytes_per_frame,
        }
    }

    /// Number of frames that can currently be written.
    ///
    /// May underestimate while the consumer is reading concurrently, but
    /// never overestimates.
    pub fn write_capacity(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity - write.wrapping_sub(read)
    }

    /// Number of frames available to read.
    ///
    /// May underestimate while the producer is writing concurrently, but
    /// never overestimates.
    pub fn read_capacity(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Writes whole frames from `bytes` (producer side). Returns the number
    /// of frames actually written, which may be less than offered when the
    /// ring is near full. Never blocks.
    pub fn write(&self, bytes: &[u8]) -> usize {
        assert!(
            bytes.len() % self.bytes_per_frame == 0,
            "ring write of partial frames"
        );

        let frames = (bytes.len() / self.bytes_per_frame).min(self.write_capacity());
        if frames == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        // Safe because only one thread writes: the producer owns the region
        // from write_pos up to read_pos + capacity, and the consumer reads
        // strictly below write_pos. The Release store publishes the bytes
        // before the new position becomes visible.
        unsafe {
            self.copy_in(write, &bytes[..frames * self.bytes_per_frame]);
        }
        self.write_pos
            .store(write.wrapping_add(frames), Ordering::Release);

        frames
    }

    /// Reads whole frames into `out` (consumer side). Reads as many frames
    /// as fit in `out` and are available; returns the number of frames read.
    /// Never blocks; returns 0 when the ring is empty.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let frames = (out.len() / self.bytes_per_frame).min(self.read_capacity());
        if frames == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        // Safe because only one thread reads: the consumer owns the region
        // from read_pos up to write_pos, and the Acquire load in
        // read_capacity ordered the producer's bytes before this copy.
        unsafe {
            self.copy_out(read, &mut out[..frames * self.bytes_per_frame]);
        }
        self.read_pos
            .store(read.wrapping_add(frames), Ordering::Release);

        frames
    }

    /// Drops all unread frames.
    ///
    /// Must only be called while the consumer is quiesced (device paused);
    /// it advances the consumer's position from the producer's thread.
    pub fn flush(&self) {
        self.read_pos
            .store(self.write_pos.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Copies `src` into the ring starting at frame position `pos`,
    /// splitting at the wrap point.
    unsafe fn copy_in(&self, pos: usize, src: &[u8]) {
        let base = self.buf.as_ptr() as *mut u8;
        let start = (pos & self.mask) * self.bytes_per_frame;
        let until_wrap = (self.capacity - (pos & self.mask)) * self.bytes_per_frame;
        let first = until_wrap.min(src.len());

        ptr::copy_nonoverlapping(src.as_ptr(), base.add(start), first);
        ptr::copy_nonoverlapping(src.as_ptr().add(first), base, src.len() - first);
    }

    /// Copies out of the ring starting at frame position `pos` into `dst`,
    /// splitting at the wrap point.
    unsafe fn copy_out(&self, pos: usize, dst: &mut [u8]) {
        let base = self.buf.as_ptr();
        let start = (pos & self.mask) * self.bytes_per_frame;
        let until_wrap = (self.capacity - (pos & self.mask)) * self.bytes_per_frame;
        let first = until_wrap.min(dst.len());

        ptr::copy_nonoverlapping(base.add(start), dst.as_mut_ptr(), first);
        ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), dst.len() - first);
    }
}

// Safety: the buffer is only touched through the atomic positions.
// write_pos is only advanced by the producer, read_pos only by the consumer
// (flush excepted, which requires the consumer to be quiesced), the two
// never touch the same bytes at once, and Acquire/Release ordering makes
// written bytes visible before the position that covers them.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}
