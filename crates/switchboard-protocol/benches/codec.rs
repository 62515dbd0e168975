//! Codec benchmarks for switchboard-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use switchboard_protocol::{codec, Envelope, WireFormat};

fn sample(content_len: usize) -> Envelope {
    Envelope::private(json!({
        "id": 1,
        "from": 3,
        "to": 7,
        "content": "x".repeat(content_len),
        "timestamp": 1_700_000_000_000u64,
    }))
}

fn bench_encode(c: &mut Criterion) {
    let envelope = sample(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode(black_box(&envelope), WireFormat::Json))
    });
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::encode(black_box(&envelope), WireFormat::MessagePack))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let envelope = sample(64);
    let json = codec::encode(&envelope, WireFormat::Json).unwrap();
    let msgpack = codec::encode(&envelope, WireFormat::MessagePack).unwrap();

    let mut group = c.benchmark_group("decode");
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::decode(black_box(&json), WireFormat::Json))
    });
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode(black_box(&msgpack), WireFormat::MessagePack))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
