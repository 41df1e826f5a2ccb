//! Shared header layout.
//!
//! The header occupies the first page of the segment file. The three hot
//! fields each sit on their own cache line, so the core writing `head`
//! never invalidates the line the other core writes `tail` on, and `eof`
//! polling does not disturb either.

use std::sync::atomic::AtomicU64;

/// On-disk format version carried in every header.
pub(crate) const FORMAT_VERSION: u64 = 1;

/// An atomic counter forced onto its own 64-byte cache line.
#[repr(C, align(64))]
pub(crate) struct CacheAligned(pub AtomicU64);

/// Fixed header at offset 0 of the segment file.
///
/// `version`, `capacity` and `page_size` are written once before the ring
/// is published and never change afterwards. `head` and `eof` are written
/// only by the producer, `tail` only by the consumer; all three are read
/// by both sides.
#[repr(C)]
pub(crate) struct Header {
    pub version: u64,
    pub capacity: u64,
    pub page_size: u64,
    /// Bytes ever committed by the producer. Free-rolling.
    pub head: CacheAligned,
    /// Non-zero once the producer will write no more.
    pub eof: CacheAligned,
    /// Bytes ever consumed by the consumer. Free-rolling.
    pub tail: CacheAligned,
}

const _: () = assert!(std::mem::size_of::<Header>() == 256);
const _: () = assert!(std::mem::offset_of!(Header, head) == 64);
const _: () = assert!(std::mem::offset_of!(Header, eof) == 128);
const _: () = assert!(std::mem::offset_of!(Header, tail) == 192);
