// ABOUTME: Benchmark suite for the STOMP frame codec - parsing and serialization throughput
// ABOUTME: Covers plain encode, plain parse, and parsing under varying chunk sizes

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stompman::codec::{encode_frame, FrameParser};
use stompman::frame::{Command, Frame};
use std::time::Duration;

fn sample_send_frame(body_len: usize) -> Frame {
    let body = vec![b'x'; body_len];
    Frame::with_body(Command::Send, body.clone())
        .header("destination", "/queue/benchmark")
        .header("content-length", body_len.to_string())
        .header("content-type", "text/plain")
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for body_len in [0usize, 64, 4096, 65536] {
        let frame = sample_send_frame(body_len);
        group.bench_with_input(BenchmarkId::from_parameter(body_len), &frame, |b, frame| {
            b.iter(|| {
                let mut buf = BytesMut::new();
                encode_frame(black_box(frame), &mut buf);
                black_box(buf);
            });
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_frame");
    for body_len in [0usize, 64, 4096, 65536] {
        let frame = sample_send_frame(body_len);
        let mut encoded = BytesMut::new();
        encode_frame(&frame, &mut encoded);
        let encoded = encoded.freeze();

        group.bench_with_input(BenchmarkId::from_parameter(body_len), &encoded, |b, encoded| {
            b.iter(|| {
                let mut parser = FrameParser::new();
                let mut buf = BytesMut::from(&encoded[..]);
                let parsed = parser.parse(black_box(&mut buf)).unwrap();
                black_box(parsed);
            });
        });
    }
    group.finish();
}

fn bench_parse_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_frame_chunked");
    let frame = sample_send_frame(4096);
    let mut encoded = BytesMut::new();
    encode_frame(&frame, &mut encoded);
    let encoded = encoded.freeze();

    for chunk_size in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &chunk_size| {
            b.iter(|| {
                let mut parser = FrameParser::new();
                let mut frames = Vec::new();
                for chunk in encoded.chunks(chunk_size) {
                    let mut buf = BytesMut::from(chunk);
                    frames.extend(parser.parse_frames_from_chunk(black_box(&mut buf)).unwrap());
                }
                black_box(frames);
            });
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = bench_encode, bench_parse, bench_parse_chunked
}
criterion_main!(benches);
