// ABOUTME: Benchmark suite for the wire codec's encode/decode hot path
// ABOUTME: Measures framing and argument (de)serialization across representative message shapes

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::collections::VecDeque;
use std::io::Cursor;
use waycore::wire::{ArgType, ArgValue, Fixed, MessageHeader, decode_args, encode_message};

fn sample_uint_args() -> Vec<ArgValue> {
    vec![ArgValue::Uint(7)]
}

fn sample_mixed_args() -> Vec<ArgValue> {
    vec![
        ArgValue::Uint(42),
        ArgValue::Int(-7),
        ArgValue::Fixed(Fixed::from_f64(1.5)),
        ArgValue::String("hello wire protocol".into()),
        ArgValue::Object(5),
    ]
}

fn sample_bind_args() -> Vec<ArgValue> {
    vec![
        ArgValue::Uint(1),
        ArgValue::AnyNewId {
            interface: "wl_shm".to_string(),
            version: 1,
            id: 3,
        },
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_message");

    let uint_args = sample_uint_args();
    group.bench_function("single_uint", |b| {
        b.iter(|| encode_message(black_box(1), black_box(0), black_box(&uint_args)))
    });

    let mixed_args = sample_mixed_args();
    group.bench_function("mixed_five_args", |b| {
        b.iter(|| encode_message(black_box(1), black_box(0), black_box(&mixed_args)))
    });

    let bind_args = sample_bind_args();
    group.bench_function("any_new_id", |b| {
        b.iter(|| encode_message(black_box(1), black_box(0), black_box(&bind_args)))
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_args");

    let mixed_bytes = encode_message(1, 0, &sample_mixed_args()).unwrap();
    let mixed_signature = [
        ArgType::Uint,
        ArgType::Int,
        ArgType::Fixed,
        ArgType::String,
        ArgType::Object { nullable: false },
    ];
    group.bench_function("mixed_five_args", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(&mixed_bytes[MessageHeader::SIZE..]);
            let mut fds = VecDeque::new();
            decode_args(
                black_box(&mut cursor),
                black_box(&mixed_signature),
                &mut fds,
            )
            .unwrap()
        })
    });

    let bind_bytes = encode_message(1, 0, &sample_bind_args()).unwrap();
    let bind_signature = [ArgType::Uint, ArgType::AnyNewId];
    group.bench_function("any_new_id", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(&bind_bytes[MessageHeader::SIZE..]);
            let mut fds = VecDeque::new();
            decode_args(black_box(&mut cursor), black_box(&bind_signature), &mut fds).unwrap()
        })
    });

    group.finish();
}

fn bench_header_peek(c: &mut Criterion) {
    let bytes = encode_message(1, 0, &sample_uint_args()).unwrap();
    c.bench_function("header_peek", |b| {
        b.iter(|| {
            let cursor = Cursor::new(&bytes[..]);
            MessageHeader::peek(black_box(&cursor))
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_header_peek);
criterion_main!(benches);
