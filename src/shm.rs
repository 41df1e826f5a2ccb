//! Shared segment lifecycle: create, publish, open, tear down.
//!
//! A ring lives in a single file on a RAM-backed mount: one header page
//! followed by `capacity` data bytes. The data region is mapped twice,
//! back to back, so any in-ring range is contiguous in virtual memory
//! even when it wraps the physical end of the ring.
//!
//! The producer creates the file unlinked (`O_TMPFILE`), fully
//! initializes the header, and only then links it into the directory
//! under the ring name. A consumer that can open the name therefore
//! always observes a fully-formed header.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::Ordering;

use libc::{c_int, off_t, MAP_FAILED};
use tracing::debug;

use crate::error::{retry_eintr, Error};
use crate::header::{Header, FORMAT_VERSION};
use crate::NAME_MAX;

// statfs(2) f_type values of the two supported backings.
const TMPFS_MAGIC: i64 = 0x0102_1994;
const HUGETLBFS_MAGIC: i64 = 0x9584_58f6;

const PAGE_4K: u64 = 4 << 10;
const PAGE_2M: u64 = 2 << 20;
const PAGE_1G: u64 = 1 << 30;

/// A mapped segment: header page plus the double-mapped data region,
/// all inside one reserved address range. Unmapped on drop.
pub(crate) struct Segment {
    map: MemoryMap,
    page_size: u64,
    capacity: u64,
}

unsafe impl Send for Segment {}

impl Segment {
    pub fn header(&self) -> &Header {
        unsafe { &*self.map.ptr().cast::<Header>() }
    }

    /// Start of the data region. Indexes up to `2 * capacity` are valid
    /// virtual addresses thanks to the alias mapping.
    pub fn data(&self) -> *mut u8 {
        unsafe { self.map.ptr().add(self.page_size as usize) }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}

/// Producer-side handle to the published name: the directory descriptor
/// plus the name linked into it, kept for the eventual unlink-by-handle.
pub(crate) struct PublishedRing {
    pub dir: OwnedFd,
    pub name: CString,
}

/// Create, initialize and publish a ring named `name` in `dir`.
pub(crate) fn create(
    name: &str,
    capacity: u64,
    dir: &Path,
    mode: u32,
) -> Result<(Segment, PublishedRing), Error> {
    let name = ring_name(name)?;
    let dir = open_dir(dir)?;
    let page_size = probe_fs(dir.as_raw_fd())?;

    if !capacity.is_power_of_two() || capacity < 8 || capacity % page_size != 0 {
        return Err(Error::InvalidCapacity {
            capacity,
            page_size,
        });
    }

    // Created unlinked: the ring stays invisible until the header is ready.
    let fd = retry_eintr("open tmpfile", || unsafe {
        libc::openat(
            dir.as_raw_fd(),
            c".".as_ptr(),
            libc::O_TMPFILE | libc::O_RDWR | libc::O_CLOEXEC,
            mode as libc::c_uint,
        )
    })?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    retry_eintr("ftruncate", || unsafe {
        libc::ftruncate(fd.as_raw_fd(), (page_size + capacity) as off_t)
    })?;

    let segment = map_segment(
        fd.as_raw_fd(),
        page_size,
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
    )?;

    // Fault in every data page now so the first hot-path write does not.
    retry_eintr("madvise", || unsafe {
        libc::madvise(segment.map.ptr().cast(), segment.map.size, libc::MADV_WILLNEED)
    })?;
    unsafe { ptr::write_bytes(segment.data(), 0, capacity as usize) };

    let header = segment.map.ptr().cast::<Header>();
    unsafe {
        (*header).version = FORMAT_VERSION;
        (*header).capacity = capacity;
        (*header).page_size = page_size;
        (*header).head.0.store(0, Ordering::Release);
        (*header).eof.0.store(0, Ordering::Release);
        (*header).tail.0.store(0, Ordering::Release);
    }

    // Linking the anonymous descriptor under the ring name is the single
    // operation that makes the fully-initialized segment visible.
    let fd_path = CString::new(format!("/proc/self/fd/{}", fd.as_raw_fd())).unwrap();
    retry_eintr("linkat", || unsafe {
        libc::linkat(
            libc::AT_FDCWD,
            fd_path.as_ptr(),
            dir.as_raw_fd(),
            name.as_ptr(),
            libc::AT_SYMLINK_FOLLOW,
        )
    })?;

    debug!(name = %name.to_string_lossy(), capacity, page_size, "ring created");

    // The mappings keep the file alive; only the directory handle stays.
    drop(fd);
    Ok((segment, PublishedRing { dir, name }))
}

/// Open an existing ring named `name` in `dir`.
pub(crate) fn open(name: &str, dir: &Path) -> Result<Segment, Error> {
    let name = ring_name(name)?;
    let dir = open_dir(dir)?;

    let fd = retry_eintr("open ring", || unsafe {
        libc::openat(
            dir.as_raw_fd(),
            name.as_ptr(),
            libc::O_RDWR | libc::O_CLOEXEC,
        )
    })?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let page_size = probe_fs(fd.as_raw_fd())?;

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    retry_eintr("fstat", || unsafe { libc::fstat(fd.as_raw_fd(), &mut st) })?;
    let capacity = (st.st_size as u64).saturating_sub(page_size);
    if !capacity.is_power_of_two() || capacity < 8 || capacity % page_size != 0 {
        return Err(Error::InvalidCapacity {
            capacity,
            page_size,
        });
    }

    let segment = map_segment(fd.as_raw_fd(), page_size, capacity, libc::PROT_READ)?;

    let version = segment.header().version;
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    debug!(name = %name.to_string_lossy(), capacity, page_size, "ring opened");
    Ok(segment)
}

/// Reserve `page_size + 2 * capacity` of address space, then map the file
/// into it three times at fixed addresses: header once, data twice back
/// to back. `data_prot` is read-write on the producer, read-only on the
/// consumer.
fn map_segment(
    fd: c_int,
    page_size: u64,
    capacity: u64,
    data_prot: c_int,
) -> Result<Segment, Error> {
    let ps = page_size as usize;
    let cap = capacity as usize;
    let huge = huge_flags(page_size);

    let map = MemoryMap::reserve(ps + 2 * cap, huge)?;

    unsafe {
        map_fixed(
            "mmap header",
            map.ptr(),
            ps,
            libc::PROT_READ | libc::PROT_WRITE,
            huge | libc::MAP_POPULATE,
            fd,
            0,
        )?;
        map_fixed(
            "mmap ring",
            map.ptr().add(ps),
            cap,
            data_prot,
            huge | libc::MAP_POPULATE,
            fd,
            ps as off_t,
        )?;
        map_fixed(
            "mmap ring alias",
            map.ptr().add(ps + cap),
            cap,
            data_prot,
            huge,
            fd,
            ps as off_t,
        )?;
    }

    Ok(Segment {
        map,
        page_size,
        capacity,
    })
}

/// Map `len` bytes of `fd` at exactly `addr`, inside an already reserved
/// range.
unsafe fn map_fixed(
    call: &'static str,
    addr: *mut u8,
    len: usize,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> Result<(), Error> {
    let got = libc::mmap(
        addr.cast(),
        len,
        prot,
        libc::MAP_SHARED | libc::MAP_FIXED | flags,
        fd,
        offset,
    );
    if got != addr.cast() {
        return Err(Error::sys(call));
    }
    Ok(())
}

/// One reserved mmap range, unmapped on drop.
///
/// Fixed maps placed inside the range replace pieces of it; per mmap(2),
/// unmapping the whole range tears those down as well, so a half-built
/// segment rolls back with a single munmap.
struct MemoryMap {
    map: *mut libc::c_void,
    size: usize,
}

impl MemoryMap {
    /// Reserve `size` bytes of address space with no access permissions.
    /// `flags` carries the hugepage selection so the range is aligned for
    /// the fixed maps that follow.
    fn reserve(size: usize, flags: c_int) -> Result<Self, Error> {
        let map = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | flags,
                -1,
                0,
            )
        };
        if map == MAP_FAILED {
            return Err(Error::sys("mmap reserve"));
        }
        Ok(Self { map, size })
    }

    fn ptr(&self) -> *mut u8 {
        self.map.cast()
    }
}

impl Drop for MemoryMap {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.map, self.size) };
    }
}

fn ring_name(name: &str) -> Result<CString, Error> {
    if name.len() >= NAME_MAX {
        return Err(Error::NameTooLong(name.len()));
    }
    CString::new(name).map_err(|_| Error::InvalidName)
}

fn open_dir(dir: &Path) -> Result<OwnedFd, Error> {
    let path = CString::new(dir.as_os_str().as_bytes()).map_err(|_| Error::InvalidName)?;
    let fd = retry_eintr("open dir", || unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_PATH | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Check that `fd` sits on tmpfs or hugetlbfs and return the mount's
/// natural page size.
fn probe_fs(fd: c_int) -> Result<u64, Error> {
    let mut st: libc::statfs = unsafe { std::mem::zeroed() };
    retry_eintr("fstatfs", || unsafe { libc::fstatfs(fd, &mut st) })?;

    match st.f_type as i64 {
        TMPFS_MAGIC | HUGETLBFS_MAGIC => {}
        _ => return Err(Error::NotARamFs),
    }
    let page_size = st.f_bsize as u64;
    match page_size {
        PAGE_4K | PAGE_2M | PAGE_1G => Ok(page_size),
        _ => Err(Error::NotARamFs),
    }
}

fn huge_flags(page_size: u64) -> c_int {
    match page_size {
        PAGE_2M => libc::MAP_HUGETLB | libc::MAP_HUGE_2MB,
        PAGE_1G => libc::MAP_HUGETLB | libc::MAP_HUGE_1GB,
        _ => 0,
    }
}
