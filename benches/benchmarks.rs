//! Performance benchmarks for the wsduplex codec.
//!
//! Run with: `cargo bench`

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use wsduplex::codec::{encode_frames, read_message};
use wsduplex::protocol::{
    ClientRequest, Frame, HandshakeRequest, HandshakeResponse, OpCode, apply_mask,
    apply_mask_fast, compute_accept_key,
};
use wsduplex::{ByteChannel, Limits, Transport};

/// Inbound bytes held in memory; writes are swallowed.
struct MemoryWire(VecDeque<u8>);

impl Transport for MemoryWire {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.0.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.0.len());
        for (slot, byte) in buf.iter_mut().zip(self.0.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_available(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_eof(&mut self) -> bool {
        false
    }

    fn shutdown(&mut self) {}

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

fn wire_bytes(payload_size: usize, chunk_size: usize, masked: bool) -> Vec<u8> {
    encode_frames(&vec![0xAB; payload_size], OpCode::Binary, chunk_size, masked)
        .unwrap()
        .concat()
}

// =============================================================================
// Encoding Benchmarks
// =============================================================================

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frames");

    for (name, size) in [("small_10b", 10), ("medium_1kb", 1024), ("large_64kb", 65536)] {
        let payload = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("{name}_unmasked"), |b| {
            b.iter(|| encode_frames(black_box(&payload), OpCode::Binary, 4096, false))
        });

        group.bench_function(format!("{name}_masked"), |b| {
            b.iter(|| encode_frames(black_box(&payload), OpCode::Binary, 4096, true))
        });
    }

    group.finish();
}

// =============================================================================
// Decoding Benchmarks
// =============================================================================

fn bench_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_message");
    let limits = Limits::default();

    for (name, size, chunk) in [
        ("single_1kb", 1024, 4096),
        ("single_64kb", 65536, 65536),
        ("fragmented_64kb_16", 65536, 4096),
    ] {
        let wire = wire_bytes(size, chunk, true);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| {
            b.iter_batched(
                || ByteChannel::new(MemoryWire(wire.iter().copied().collect()), Duration::ZERO),
                |mut channel| read_message(&mut channel, Duration::from_secs(1), &limits),
                BatchSize::SmallInput,
            )
        });
    }

    // In-memory frame parsing, no channel
    let frame = wire_bytes(1024, 4096, true);
    group.bench_function("frame_parse_1kb", |b| {
        b.iter(|| Frame::parse(black_box(&frame)))
    });

    group.finish();
}

// =============================================================================
// Masking Benchmarks
// =============================================================================

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("masking");
    let mask = [0x37, 0xfa, 0x21, 0x3d];

    for (name, size) in [("64b", 64), ("1kb", 1024), ("64kb", 65536)] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("apply_mask_{name}"), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask(black_box(&mut data), mask))
        });

        group.bench_function(format!("apply_mask_fast_{name}"), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask_fast(black_box(&mut data), mask))
        });
    }

    group.finish();
}

// =============================================================================
// Handshake Benchmarks
// =============================================================================

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake");

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    group.bench_function("compute_accept_key", |b| {
        b.iter(|| compute_accept_key(black_box(key)))
    });

    let request = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    group.bench_function("parse_request", |b| {
        b.iter(|| HandshakeRequest::parse(black_box(request)))
    });

    let req = HandshakeRequest::parse(request).unwrap();
    group.bench_function("write_response", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(256);
            HandshakeResponse::from_request(black_box(&req)).write(&mut buf);
            buf
        })
    });

    group.bench_function("write_client_request", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(256);
            ClientRequest::new("/chat", "server.example.com", 80)
                .and_then(|r| r.write(&mut buf))
                .map(|()| buf)
        })
    });

    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(
    benches,
    bench_encoding,
    bench_decoding,
    bench_masking,
    bench_handshake
);

criterion_main!(benches);
