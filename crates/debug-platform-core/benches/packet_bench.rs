//! Criterion benchmarks for the packet framing codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package debug-platform-core --bench packet_bench
//! ```

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use debug_platform_core::protocol::{decode_packet, encode_packet, read_frame};

// ── Payload fixtures ──────────────────────────────────────────────────────────

fn short_request() -> Vec<u8> {
    b"qLaunchGDBServer;host:localhost;".to_vec()
}

/// A memory-read style reply: long, hex-only, no escaping needed.
fn memory_reply() -> Vec<u8> {
    (0..2048u32)
        .map(|i| b"0123456789abcdef"[(i % 16) as usize])
        .collect()
}

/// Binary payload where roughly one byte in four needs escaping.
fn escaped_payload() -> Vec<u8> {
    (0..1024u32)
        .map(|i| if i % 4 == 0 { b'#' } else { b'a' })
        .collect()
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_packet");
    for (name, payload) in [
        ("short_request", short_request()),
        ("memory_reply_2k", memory_reply()),
        ("escaped_1k", escaped_payload()),
    ] {
        group.bench_function(name, |b| b.iter(|| encode_packet(black_box(&payload))));
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_packet");
    for (name, payload) in [
        ("short_request", short_request()),
        ("memory_reply_2k", memory_reply()),
        ("escaped_1k", escaped_payload()),
    ] {
        let frame = encode_packet(&payload);
        group.bench_function(name, |b| b.iter(|| decode_packet(black_box(&frame)).unwrap()));
    }
    group.finish();
}

fn bench_read_frame(c: &mut Criterion) {
    let frame = encode_packet(&memory_reply());
    c.bench_function("read_frame/memory_reply_2k", |b| {
        b.iter(|| {
            let mut input = Cursor::new(black_box(frame.as_slice()));
            read_frame(&mut input).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_read_frame);
criterion_main!(benches);
