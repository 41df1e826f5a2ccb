//! Pushes 10 million 8-byte integers through a ring between two pinned
//! cores and reports the sustained rate.
//!
//! Usage: int_ping [producer-core] [consumer-core]

use std::time::Instant;

use shmring::{pin_to_core, Consumer, Full, PopError, Producer};

const COUNT: u64 = 10_000_000;
const CAPACITY: u64 = 1 << 20;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let producer_core: usize = args
        .next()
        .map(|a| a.parse().expect("producer core must be a number"))
        .unwrap_or(0);
    let consumer_core: usize = args
        .next()
        .map(|a| a.parse().expect("consumer core must be a number"))
        .unwrap_or(1);

    let name = format!("int-ping-{}", std::process::id());
    let mut w = Producer::create(&name, CAPACITY).expect("create ring");
    let consumer_name = name.clone();

    let start = Instant::now();

    let producer = std::thread::spawn(move || {
        pin_to_core(producer_core).expect("pin producer");
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

    let consumer = std::thread::spawn(move || {
        pin_to_core(consumer_core).expect("pin consumer");
        let mut r = Consumer::open(&consumer_name).expect("open ring");
        let mut expected = 0u64;
        loop {
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
                let got = u64::from_le_bytes(val.try_into().unwrap());
                assert_eq!(got, expected, "sequence gap");
                expected += 1;
            }
            r.commit(whole);
        }
        expected
    });

    producer.join().expect("producer thread");
    let received = consumer.join().expect("consumer thread");
    let elapsed = start.elapsed();

    assert_eq!(received, COUNT);
    let ops = COUNT as f64 / elapsed.as_secs_f64();
    println!(
        "{COUNT} integers in {:.3}s ({:.1} M ops/s)",
        elapsed.as_secs_f64(),
        ops / 1e6
    );
}
