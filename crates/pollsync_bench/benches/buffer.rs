//! Response buffer benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pollsync_bench::random_data;
use pollsync_conn::ResponseBuffer;
use pollsync_protocol::{Position, Response};

fn filled_buffer(len: u64, payload_size: usize) -> ResponseBuffer<Vec<u8>> {
    let payload = random_data(payload_size);
    let mut buffer = ResponseBuffer::new();
    for pos in 1..=len {
        let mut response = Response::new(payload.clone());
        response.position = Position::new(pos);
        buffer.push(response).unwrap();
    }
    buffer
}

/// Benchmark acknowledging the whole buffer at once.
fn bench_acknowledge_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("acknowledge_all");

    for len in [1u64, 16, 256].iter() {
        group.throughput(Throughput::Elements(*len));
        group.bench_with_input(BenchmarkId::from_parameter(len), len, |b, &len| {
            b.iter_batched(
                || filled_buffer(len, 64),
                |mut buffer| black_box(buffer.acknowledge(Position::new(len))),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark acknowledging an unknown position, which drops nothing.
fn bench_acknowledge_miss(c: &mut Criterion) {
    let mut buffer = filled_buffer(256, 64);

    c.bench_function("acknowledge_miss", |b| {
        b.iter(|| black_box(buffer.acknowledge(black_box(Position::INITIAL))));
    });
}

criterion_group!(benches, bench_acknowledge_all, bench_acknowledge_miss);
criterion_main!(benches);
