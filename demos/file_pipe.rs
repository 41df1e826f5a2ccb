//! Pipes a file through a ring: one thread reads from disk straight into
//! the ring's memory, the other writes the ring's bytes to the output.
//!
//! Usage: file_pipe <input> [output]    (output defaults to /dev/null)

use std::fs::File;
use std::io::{Read, Write};
use std::time::Instant;

use shmring::{Consumer, Full, PopError, Producer};

const CAPACITY: u64 = 4 << 20;
const CHUNK: usize = 64 << 10;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let input = args.next().unwrap_or_else(|| {
        eprintln!("usage: file_pipe <input> [output]");
        std::process::exit(2);
    });
    let output = args.next().unwrap_or_else(|| "/dev/null".to_string());

    let name = format!("file-pipe-{}", std::process::id());
    let mut w = Producer::create(&name, CAPACITY).expect("create ring");
    let consumer_name = name.clone();

    let start = Instant::now();

    let reader = std::thread::spawn(move || {
        let mut file = File::open(&input).expect("open input");
        loop {
            // Over-reserve a full chunk; commit only what read() filled.
            let buf = loop {
                match w.push(CHUNK) {
                    Ok(buf) => break buf,
                    Err(Full) => std::hint::spin_loop(),
                }
            };
            let n = file.read(buf).expect("read input");
            w.commit(n);
            if n == 0 {
                break;
            }
        }
    });

    let writer = std::thread::spawn(move || {
        let mut out = File::create(&output).expect("open output");
        let mut r = Consumer::open(&consumer_name).expect("open ring");
        let mut total = 0u64;
        loop {
            match r.pop() {
                Ok(chunk) => {
                    let n = chunk.len();
                    out.write_all(chunk).expect("write output");
                    total += n as u64;
                    r.commit(n);
                }
                Err(PopError::Empty) => std::hint::spin_loop(),
                Err(PopError::Eof) => break,
            }
        }
        total
    });

    reader.join().expect("reader thread");
    let total = writer.join().expect("writer thread");
    let elapsed = start.elapsed();

    let mib = total as f64 / (1 << 20) as f64;
    println!(
        "{mib:.1} MiB in {:.3}s ({:.1} MiB/s)",
        elapsed.as_secs_f64(),
        mib / elapsed.as_secs_f64()
    );
}
