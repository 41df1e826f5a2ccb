//! Ring throughput benchmarks.
//!
//! Run with: cargo bench

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use shmring::{Consumer, PopError, Producer};

fn unique_name(tag: &str) -> String {
    format!("shmring-bench-{}-{}", std::process::id(), tag)
}

/// Same-thread reserve/commit/pop/commit round trip of one u64.
fn bench_push_pop_u64(c: &mut Criterion) {
    let name = unique_name("u64");
    let mut w = Producer::create(&name, 1 << 20).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));
    group.bench_function("push_pop_u64", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let buf = w.push(8).unwrap();
            buf.copy_from_slice(&i.to_le_bytes());
            w.commit(8);

            let got = r.pop().unwrap();
            black_box(got);
            r.commit(8);

            i = i.wrapping_add(1);
        })
    });
    group.finish();
}

/// Producer-side cost with a second thread draining as fast as it can.
fn bench_threaded_stream(c: &mut Criterion) {
    let name = unique_name("stream");
    let mut w = Producer::create(&name, 1 << 20).unwrap();
    let mut r = Consumer::open(&name).unwrap();

    let drain = std::thread::spawn(move || loop {
        match r.pop() {
            Ok(chunk) => {
                let n = chunk.len();
                r.commit(n);
            }
            Err(PopError::Empty) => std::hint::spin_loop(),
            Err(PopError::Eof) => break,
        }
    });

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Bytes(16));
    group.bench_function("stream_16b", |b| {
        b.iter(|| {
            let buf = loop {
                match w.push(16) {
                    Ok(chunk) => break chunk,
                    Err(_) => std::hint::spin_loop(),
                }
            };
            buf.copy_from_slice(b"0123456789abcdef");
            w.commit(16);
        })
    });
    group.finish();

    drop(w);
    drain.join().unwrap();
}

criterion_group!(benches, bench_push_pop_u64, bench_threaded_stream);
criterion_main!(benches);
