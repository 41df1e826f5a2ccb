use crate::*;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Unique per-test ring name so parallel tests never collide.
fn ring_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("shmring-test-{}-{}-{}", std::process::id(), tag, n)
}

fn dir() -> &'static Path {
    Path::new(DEFAULT_DIR)
}

#[test]
fn capacity_validation() {
    for bad in [0u64, 3, 1023, 1024, 1025] {
        let err = Producer::create(&ring_name("cap"), bad).unwrap_err();
        assert!(
            matches!(err, Error::InvalidCapacity { .. }),
            "capacity {bad}: {err}"
        );
    }
    for good in [4096u64, 8192, 1 << 20] {
        let w = Producer::create(&ring_name("cap"), good).unwrap();
        assert_eq!(w.capacity(), good);
        assert_eq!(w.page_size(), 4096);
    }
}

#[test]
fn name_length_limit() {
    let long = "x".repeat(128);
    assert!(matches!(
        Producer::create(&long, 4096),
        Err(Error::NameTooLong(128))
    ));

    let mut edge = ring_name("len");
    edge.push_str(&"y".repeat(127 - edge.len()));
    let w = Producer::create(&edge, 4096).unwrap();
    assert_eq!(w.capacity(), 4096);
}

#[test]
fn name_with_nul_rejected() {
    assert!(matches!(
        Producer::create("bad\0name", 4096),
        Err(Error::InvalidName)
    ));
}

#[test]
fn rejects_disk_backed_directories() {
    let config = RingConfig {
        dir: "/proc".into(),
        ..RingConfig::default()
    };
    let err = Producer::create_with(&ring_name("fs"), 4096, &config).unwrap_err();
    assert!(matches!(err, Error::NotARamFs), "{err}");
}

#[test]
fn u64_handshake() {
    let name = ring_name("handshake");
    let mut w = Producer::create(&name, 4096).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    let buf = w.push(8).unwrap();
    buf.copy_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
    w.commit(8);

    let got = r.pop().unwrap();
    assert_eq!(got.len(), 8);
    assert_eq!(
        u64::from_le_bytes(got.try_into().unwrap()),
        0x0102_0304_0506_0708
    );
    r.commit(8);

    assert!(w.is_empty());
    assert!(r.is_empty());
    assert_eq!(r.pop().unwrap_err(), PopError::Empty);
}

#[test]
fn wraparound_is_contiguous() {
    let name = ring_name("wrap");
    let mut w = Producer::create(&name, 4096).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    // Drive both indices to 4092 so the next 8 bytes straddle the end.
    let buf = w.push(4092).unwrap();
    buf.fill(0xAA);
    w.commit(4092);
    assert_eq!(r.pop().unwrap().len(), 4092);
    r.commit(4092);

    let buf = w.push(8).unwrap();
    assert_eq!(buf.len(), 8);
    buf.copy_from_slice(&0xDEAD_BEEF_F00D_CAFEu64.to_le_bytes());
    w.commit(8);

    let got = r.pop().unwrap();
    assert_eq!(
        u64::from_le_bytes(got.try_into().unwrap()),
        0xDEAD_BEEF_F00D_CAFE
    );
    r.commit(8);
}

#[test]
fn full_ring_rejects_push() {
    let name = ring_name("full");
    let mut w = Producer::create(&name, 4096).unwrap();

    let buf = w.push(4096).unwrap();
    buf.fill(1);
    w.commit(4096);

    assert!(w.is_full());
    assert_eq!(w.free(), 0);
    assert_eq!(w.push(1).unwrap_err(), Full);
}

#[test]
fn oversized_push_is_full() {
    let mut w = Producer::create(&ring_name("oversize"), 4096).unwrap();
    assert_eq!(w.push(4097).unwrap_err(), Full);
}

#[test]
fn empty_then_eof() {
    let name = ring_name("eof");
    let w = Producer::create(&name, 4096).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    assert_eq!(r.pop().unwrap_err(), PopError::Empty);
    drop(w);
    assert_eq!(r.pop().unwrap_err(), PopError::Eof);
}

#[test]
fn drain_before_eof() {
    let name = ring_name("drain");
    let mut w = Producer::create(&name, 4096).unwrap();

    let buf = w.push(100).unwrap();
    for (i, b) in buf.iter_mut().enumerate() {
        *b = i as u8;
    }
    w.commit(100);

    // Attach after the bytes are already in flight.
    let mut r = Consumer::open(&name).unwrap();
    drop(w);

    let got = r.pop().unwrap();
    assert_eq!(got.len(), 100);
    assert!(got.iter().enumerate().all(|(i, &b)| b == i as u8));
    r.commit(100);

    assert_eq!(r.pop().unwrap_err(), PopError::Eof);
}

#[test]
fn drop_retires_the_name() {
    let name = ring_name("unlink");
    let path = dir().join(&name);

    let w = Producer::create(&name, 4096).unwrap();
    assert!(path.exists());
    drop(w);
    assert!(!path.exists());
}

#[test]
fn partial_commit_publishes_prefix() {
    let name = ring_name("partial");
    let mut w = Producer::create(&name, 4096).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    // Over-reserve, fill a prefix, commit only that.
    let buf = w.push(4096).unwrap();
    buf[..3].copy_from_slice(b"foo");
    w.commit(3);

    assert_eq!(r.pop().unwrap(), b"foo");
    r.commit(3);
    assert_eq!(r.pop().unwrap_err(), PopError::Empty);
}

#[test]
fn consumer_commits_in_pieces() {
    let name = ring_name("pieces");
    let mut w = Producer::create(&name, 4096).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    let buf = w.push(3).unwrap();
    buf.copy_from_slice(b"foo");
    w.commit(3);

    assert_eq!(r.pop().unwrap(), b"foo");
    r.commit(1);
    assert_eq!(r.pop().unwrap(), b"oo");
    r.commit(2);
    assert_eq!(r.pop().unwrap_err(), PopError::Empty);
}

#[test]
fn observers_track_occupancy() {
    let name = ring_name("observers");
    let mut w = Producer::create(&name, 4096).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    assert_eq!(w.used(), 0);
    assert_eq!(w.free(), 4096);
    assert!(w.is_empty() && !w.is_full());
    assert_eq!(r.capacity(), 4096);
    assert_eq!(r.page_size(), 4096);

    let buf = w.push(100).unwrap();
    buf.fill(7);
    w.commit(100);

    assert_eq!(w.used(), 100);
    assert_eq!(r.used(), 100);
    assert_eq!(r.free(), 3996);
    assert!(!r.is_empty());

    let n = r.pop().unwrap().len();
    r.commit(n);
    assert!(w.is_empty() && r.is_empty());
}

#[test]
fn rejects_unknown_version() {
    use std::os::unix::fs::FileExt;

    let name = ring_name("version");
    let _w = Producer::create(&name, 4096).unwrap();

    // Corrupt the version field through the file, as a stale build would
    // have written it.
    let f = std::fs::OpenOptions::new()
        .write(true)
        .open(dir().join(&name))
        .unwrap();
    f.write_all_at(&2u64.to_le_bytes(), 0).unwrap();
    drop(f);

    assert!(matches!(
        Consumer::open(&name),
        Err(Error::UnsupportedVersion(2))
    ));
}

#[test]
fn open_timeout_expires() {
    let err =
        Consumer::open_timeout(&ring_name("absent"), dir(), Duration::from_millis(30)).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[test]
fn open_timeout_finds_late_ring() {
    let name = ring_name("late");
    let producer_name = name.clone();
    let t = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        Producer::create(&producer_name, 4096).unwrap()
    });

    let r = Consumer::open_timeout(&name, dir(), Duration::from_secs(5)).unwrap();
    let w = t.join().unwrap();
    assert_eq!(r.capacity(), w.capacity());
}

#[test]
fn threaded_sequence_transfer() {
    let name = ring_name("threaded");
    let mut w = Producer::create(&name, 1 << 16).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    const COUNT: u64 = 1_000_000;

    let wt = std::thread::spawn(move || {
        for i in 0..COUNT {
            let buf = loop {
                match w.push(8) {
                    Ok(buf) => break buf,
                    Err(Full) => std::hint::spin_loop(),
                }
            };
            buf.copy_from_slice(&i.to_le_bytes());
            w.commit(8);
        }
    });

    let rt = std::thread::spawn(move || {
        let mut expected = 0u64;
        while expected < COUNT {
            let chunk = match r.pop() {
                Ok(chunk) => chunk,
                Err(PopError::Empty) => {
                    std::hint::spin_loop();
                    continue;
                }
                Err(PopError::Eof) => break,
            };
            let whole = chunk.len() - chunk.len() % 8;
            for val in chunk[..whole].chunks_exact(8) {
                assert_eq!(u64::from_le_bytes(val.try_into().unwrap()), expected);
                expected += 1;
            }
            r.commit(whole);
        }
        assert_eq!(expected, COUNT);
    });

    wt.join().unwrap();
    rt.join().unwrap();
}

#[test]
fn pin_to_allowed_core() {
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let ret =
        unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) };
    assert_eq!(ret, 0);

    let core = (0..libc::CPU_SETSIZE as usize)
        .find(|&c| unsafe { libc::CPU_ISSET(c, &set) })
        .unwrap();
    pin_to_core(core).unwrap();
}

#[test]
fn pin_rejects_absurd_core() {
    assert!(pin_to_core(libc::CPU_SETSIZE as usize).is_err());
    assert!(pin_to_core(1 << 20).is_err());
}

#[test]
fn default_config() {
    let config = RingConfig::default();
    assert_eq!(config.dir, Path::new(DEFAULT_DIR));
    assert_eq!(config.mode, 0o600);
}
