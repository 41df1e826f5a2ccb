//! CPU affinity helper for the pinned producer/consumer pattern.

use std::io;
use std::mem;

use crate::error::{retry_eintr, Error};

/// Pin the calling thread to `core`.
///
/// The queue never sleeps either side; throughput and latency figures
/// assume the producer and the consumer each spin on their own core.
/// Cores beyond the fixed affinity-mask size (`CPU_SETSIZE`, 1024) are
/// rejected.
pub fn pin_to_core(core: usize) -> Result<(), Error> {
    // cpu_set_t covers CPU_SETSIZE cores; CPU_SET indexes past it otherwise.
    if core >= libc::CPU_SETSIZE as usize {
        return Err(Error::Sys {
            call: "sched_setaffinity",
            source: io::Error::from_raw_os_error(libc::EINVAL),
        });
    }

    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
    }
    retry_eintr("sched_setaffinity", || unsafe {
        libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set)
    })?;
    Ok(())
}
