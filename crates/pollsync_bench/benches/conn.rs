//! Connection request-path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pollsync_bench::bench_conn;
use pollsync_conn::ConnConfig;
use pollsync_protocol::{Position, Request};
use pollsync_testkit::{ClientConfig, LossyClient};
use std::time::Duration;

/// Benchmark the acknowledge-then-produce cycle of a well-behaved client.
fn bench_ack_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("ack_cycle");

    for size in [64, 1024, 16384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let conn = bench_conn(size, ConnConfig::default());
            let mut position = Position::INITIAL;

            b.iter(|| {
                let request = Request::new(position, "lists=a".to_string())
                    .with_timeout(Duration::ZERO);
                let response = conn.on_incoming_request(black_box(request)).unwrap();
                position = response.position;
                black_box(response);
            });
        });
    }

    group.finish();
}

/// Benchmark serving an identical resend from the buffer.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for size in [64, 1024, 16384].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let conn = bench_conn(size, ConnConfig::default());
            let first = conn
                .on_incoming_request(Request::new(Position::INITIAL, "lists=a".to_string()))
                .unwrap();
            let resend = Request::new(first.position, "lists=a".to_string());
            conn.on_incoming_request(resend.clone()).unwrap();

            b.iter(|| {
                let response = conn.on_incoming_request(black_box(resend.clone())).unwrap();
                black_box(response);
            });
        });
    }

    group.finish();
}

/// Benchmark a lossy client end to end.
fn bench_lossy_client(c: &mut Criterion) {
    let mut group = c.benchmark_group("lossy_client");
    group.sample_size(20);

    for loss_rate in [0.0, 0.1, 0.5].iter() {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(loss_rate),
            loss_rate,
            |b, &loss_rate| {
                b.iter(|| {
                    let conn = bench_conn(64, ConnConfig::default().unbounded());
                    let mut client = LossyClient::new(ClientConfig {
                        loss_rate,
                        change_every: 10,
                        timeout: Duration::ZERO,
                        seed: 1,
                    });
                    black_box(client.run(&conn, 1000).delivered.len());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_ack_cycle, bench_replay, bench_lossy_client);
criterion_main!(benches);
