//! Write side of a ring.

use std::fmt;
use std::os::fd::AsRawFd;
use std::slice;
use std::sync::atomic::Ordering;

use tracing::debug;

use crate::error::{Error, Full};
use crate::header::Header;
use crate::shm::{self, PublishedRing, Segment};
use crate::RingConfig;

/// Owning write endpoint of a ring.
///
/// Creating a producer creates and publishes the ring file; dropping it
/// raises `eof` and retires the name, so an attached
/// [`Consumer`](crate::Consumer) drains whatever is left and then
/// observes end of stream.
///
/// Writes are two-phase: [`push`](Self::push) reserves a contiguous
/// writable slice, [`commit`](Self::commit) publishes a prefix of it.
pub struct Producer {
    seg: Segment,
    ring: PublishedRing,
    mask: u64,
    capacity: u64,
    /// Last observed consumer index; refreshed only when stale knowledge
    /// would make a reservation fail.
    local_tail: u64,
    /// Size of the outstanding reservation, 0 if none.
    reserved: u64,
}

impl Producer {
    /// Create a ring named `name` in the default directory.
    pub fn create(name: &str, capacity: u64) -> Result<Self, Error> {
        Self::create_with(name, capacity, &RingConfig::default())
    }

    /// Create a ring with an explicit directory and file mode.
    pub fn create_with(name: &str, capacity: u64, config: &RingConfig) -> Result<Self, Error> {
        let (seg, ring) = shm::create(name, capacity, &config.dir, config.mode)?;
        Ok(Self {
            seg,
            ring,
            mask: capacity - 1,
            capacity,
            local_tail: 0,
            reserved: 0,
        })
    }

    #[inline]
    fn header(&self) -> &Header {
        self.seg.header()
    }

    /// Reserve `n` contiguous bytes for writing.
    ///
    /// The slice is the ring's own memory and holds whatever bytes it
    /// last carried; overwrite it in place, then publish a prefix with
    /// [`commit`](Self::commit). The slice is contiguous even when the
    /// reservation wraps the end of the ring. Only one reservation may
    /// be outstanding at a time.
    #[inline]
    pub fn push(&mut self, n: usize) -> Result<&mut [u8], Full> {
        debug_assert_eq!(self.reserved, 0, "reservation already outstanding");

        let head = self.header().head.0.load(Ordering::Relaxed);
        let mut free = self.capacity - head.wrapping_sub(self.local_tail);
        if n as u64 > free {
            self.local_tail = self.header().tail.0.load(Ordering::Acquire);
            free = self.capacity - head.wrapping_sub(self.local_tail);
            if n as u64 > free {
                return Err(Full);
            }
        }

        self.reserved = n as u64;
        let at = (head & self.mask) as usize;
        Ok(unsafe { slice::from_raw_parts_mut(self.seg.data().add(at), n) })
    }

    /// Publish the first `n` bytes of the current reservation.
    ///
    /// `n` may be smaller than what [`push`](Self::push) reserved; the
    /// remainder is simply never sent. Over-reserving and committing
    /// what was actually filled is the intended way to hand the ring's
    /// memory to `read(2)`-style sources.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.reserved > 0, "commit without reservation");
        debug_assert!(n as u64 <= self.reserved, "commit exceeds reservation");

        let head = self.header().head.0.load(Ordering::Relaxed);
        self.header()
            .head
            .0
            .store(head.wrapping_add(n as u64), Ordering::Release);
        self.reserved = 0;
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
        let head = self.header().head.0.load(Ordering::Relaxed);
        let tail = self.header().tail.0.load(Ordering::Acquire);
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

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("name", &self.ring.name)
            .field("capacity", &self.capacity)
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        // eof first: a consumer that sees the name vanish must already be
        // able to observe end of stream.
        self.header().eof.0.store(1, Ordering::Release);
        let _ = unsafe {
            libc::unlinkat(self.ring.dir.as_raw_fd(), self.ring.name.as_ptr(), 0)
        };
        debug!(name = %self.ring.name.to_string_lossy(), "ring retired");
    }
}
