//! A file-backed, single-producer, single-consumer byte ring for
//! inter-process communication on Linux, with lock-free batch operations
//! and zero-copy access on both sides.
//!
//! A ring is one file on a RAM-backed mount (tmpfs, or hugetlbfs at
//! 2 MiB / 1 GiB pages): a header page followed by the data region. The
//! data region is mapped twice, back to back, so reads and writes always
//! see a single contiguous slice, even across wrap-around. Coordination
//! runs over two free-rolling 64-bit indices with release/acquire stores
//! only; there is no lock, no futex, no syscall on the hot path.
//!
//!```no_run
//! use shmring::{Consumer, Producer};
//!
//! let mut w = Producer::create("example-ring", 1 << 20)?;
//! let buf = w.push(9)?;
//! buf.copy_from_slice(b"foobarbaz");
//! w.commit(9);
//!
//! // Typically in another process:
//! let mut r = Consumer::open("example-ring")?;
//! assert_eq!(r.pop()?, b"foobarbaz");
//! r.commit(9);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//!```
//!
//! The producer publishes the ring atomically: the file is created
//! unlinked, initialized, and only then linked under its name, so the
//! name's existence is itself the "ready" signal. Dropping the producer
//! raises the end-of-stream flag and retires the name; attached
//! consumers drain what is left and then see [`PopError::Eof`].

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!(
    "shmring requires Linux on x86_64 (O_TMPFILE, linkat, tmpfs/hugetlbfs, \
     and total-store-ordering assumptions in the index protocol)"
);

mod consumer;
mod error;
mod header;
mod pin;
mod producer;
mod shm;

pub use consumer::Consumer;
pub use error::{Error, Full, PopError};
pub use pin::pin_to_core;
pub use producer::Producer;

use std::path::PathBuf;

/// Longest accepted ring name, including the NUL terminator.
pub const NAME_MAX: usize = 128;

/// Default ring directory; tmpfs on every mainstream distribution.
pub const DEFAULT_DIR: &str = "/dev/shm";

/// Placement options for a ring.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Directory the ring is published in. Must sit on tmpfs or on a
    /// hugetlbfs mount with 2 MiB or 1 GiB pages.
    pub dir: PathBuf,
    /// Mode bits of the ring file.
    pub mode: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            mode: 0o600,
        }
    }
}

#[cfg(test)]
mod tests;
