//! Read side of a ring.

use std::fmt;
use std::path::Path;
use std::slice;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, PopError};
use crate::header::Header;
use crate::shm::{self, Segment};
use crate::DEFAULT_DIR;

/// Read endpoint of a ring.
///
/// Attaches to a ring published by a [`Producer`](crate::Producer).
/// Reads are two-phase: [`pop`](Self::pop) returns every readable byte
/// as one contiguous slice, [`commit`](Self::commit) releases consumed
/// bytes back to the producer.
pub struct Consumer {
    seg: Segment,
    mask: u64,
    capacity: u64,
    /// Last observed producer index; refreshed only when the cached
    /// value says nothing is readable.
    local_head: u64,
}

impl Consumer {
    /// Open the ring named `name` in the default directory.
    pub fn open(name: &str) -> Result<Self, Error> {
        Self::open_in(name, Path::new(DEFAULT_DIR))
    }

    /// Open the ring named `name` in `dir`.
    pub fn open_in(name: &str, dir: &Path) -> Result<Self, Error> {
        let seg = shm::open(name, dir)?;
        let capacity = seg.capacity();
        let local_head = seg.header().head.0.load(Ordering::Acquire);
        Ok(Self {
            seg,
            mask: capacity - 1,
            capacity,
            local_head,
        })
    }

    /// Keep retrying [`open_in`](Self::open_in) until the ring appears
    /// or `timeout` elapses.
    ///
    /// This is the only blocking call in the crate; it exists for the
    /// common race where the consumer starts before the producer has
    /// published the ring. Attempts are spaced 1 ms apart.
    pub fn open_timeout(name: &str, dir: &Path, timeout: Duration) -> Result<Self, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::open_in(name, dir) {
                Ok(consumer) => return Ok(consumer),
                Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
                Err(_) => return Err(Error::Timeout(timeout)),
            }
        }
    }

    #[inline]
    fn header(&self) -> &Header {
        self.seg.header()
    }

    /// Return all currently readable bytes as one contiguous slice.
    ///
    /// The slice is contiguous even when the readable span wraps the end
    /// of the ring. Consumed bytes must be released afterwards with
    /// [`commit`](Self::commit); `pop` itself does not advance the ring.
    #[inline]
    pub fn pop(&mut self) -> Result<&[u8], PopError> {
        let tail = self.header().tail.0.load(Ordering::Relaxed);
        let mut size = self.local_head.wrapping_sub(tail);
        if size == 0 {
            self.local_head = self.header().head.0.load(Ordering::Acquire);
            size = self.local_head.wrapping_sub(tail);
        }
        if size == 0 {
            return if self.header().eof.0.load(Ordering::Acquire) != 0 {
                Err(PopError::Eof)
            } else {
                Err(PopError::Empty)
            };
        }

        let at = (tail & self.mask) as usize;
        Ok(unsafe { slice::from_raw_parts(self.seg.data().add(at), size as usize) })
    }

    /// Release `n` consumed bytes back to the producer.
    ///
    /// `n` must not exceed the length of the slice the preceding
    /// [`pop`](Self::pop) returned; committing less keeps the remainder
    /// readable.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        let tail = self.header().tail.0.load(Ordering::Relaxed);
        debug_assert!(
            n as u64 <= self.local_head.wrapping_sub(tail),
            "commit exceeds readable bytes"
        );
        self.header()
            .tail
            .0
            .store(tail.wrapping_add(n as u64), Ordering::Release);
    }

    /// Ring capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Page size of the backing filesystem.
    #[inline]
    pub fn page_size(&self) -> u64 {
        self.seg.page_size()
    }

    /// Bytes committed but not yet consumed. Advisory snapshot.
    #[inline]
    pub fn used(&self) -> u64 {
        let head = self.header().head.0.load(Ordering::Acquire);
        let tail = self.header().tail.0.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    /// Bytes available for reservation. Advisory snapshot.
    #[inline]
    pub fn free(&self) -> u64 {
        self.capacity - self.used()
    }

    /// Whether the ring currently holds no unconsumed bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// Whether the ring currently holds `capacity` unconsumed bytes.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.used() == self.capacity
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
