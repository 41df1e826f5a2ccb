//! Error types and syscall helpers.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Error raised while setting up or tearing down a ring.
///
/// Setup errors are fatal for the endpoint. The hot path (`push`, `pop`,
/// `commit`) performs no syscalls and reports flow control through
/// [`Full`] and [`PopError`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Ring name exceeds the on-disk name limit of
    /// [`NAME_MAX`](crate::NAME_MAX) − 1 bytes.
    #[error("ring name is {0} bytes, limit is 127")]
    NameTooLong(usize),

    /// Ring name or directory path contains a NUL byte.
    #[error("path contains a NUL byte")]
    InvalidName,

    /// Capacity is not a power of two, below the minimum, or not a
    /// multiple of the backing page size.
    #[error("invalid capacity {capacity}: must be a power of two, at least 8, and a multiple of the page size {page_size}")]
    InvalidCapacity {
        /// Capacity that was requested (or derived from the file size).
        capacity: u64,
        /// Page size of the backing filesystem.
        page_size: u64,
    },

    /// The target directory is not on tmpfs or hugetlbfs.
    #[error("directory is not on a supported RAM-backed filesystem")]
    NotARamFs,

    /// The segment header carries a version this build does not understand.
    #[error("unsupported ring version {0}")]
    UnsupportedVersion(u64),

    /// [`Consumer::open_timeout`](crate::Consumer::open_timeout) gave up
    /// waiting for the ring to appear.
    #[error("ring did not appear within {0:?}")]
    Timeout(Duration),

    /// A syscall failed; `call` names the operation that raised it.
    #[error("{call}: {source}")]
    Sys {
        /// Operation that failed.
        call: &'static str,
        /// Errno, as reported by the kernel.
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn sys(call: &'static str) -> Self {
        Error::Sys {
            call,
            source: io::Error::last_os_error(),
        }
    }
}

/// The ring cannot fit the requested reservation.
///
/// Expected in steady state; retry after the consumer makes progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ring full")]
pub struct Full;

/// Why [`Consumer::pop`](crate::Consumer::pop) returned no bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    /// No committed bytes right now; the producer is still attached.
    #[error("ring empty")]
    Empty,
    /// The ring is drained and the producer will write no more.
    #[error("end of stream")]
    Eof,
}

/// Run `f` until it stops failing with `EINTR`.
pub(crate) fn retry_eintr<F>(call: &'static str, mut f: F) -> Result<libc::c_int, Error>
where
    F: FnMut() -> libc::c_int,
{
    loop {
        let ret = f();
        if ret >= 0 {
            return Ok(ret);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(Error::Sys { call, source: err });
        }
    }
}
