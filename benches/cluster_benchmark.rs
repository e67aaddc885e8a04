//! Benchmarks for slot routing.
//!
//! The hashing benchmarks run offline. The round-trip benchmarks need a
//! cluster and only run when `SHARDLINE_BENCH_SEEDS` is set:
//!
//! ```bash
//! docker run -d --name redis-cluster \
//!   -p 7000-7005:7000-7005 \
//!   grokzen/redis-cluster:latest
//! SHARDLINE_BENCH_SEEDS=127.0.0.1:7000 cargo bench --bench cluster_benchmark
//! ```

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shardline::cluster::{is_anchored_pattern, validate_single_slot};
use shardline::{key_slot, ClusterClient};
use tokio::runtime::Runtime;

fn bench_key_slot(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_slot");

    for len in [8usize, 64, 512] {
        let plain = vec![b'k'; len];
        let mut tagged = b"{user1000}".to_vec();
        tagged.resize(len.max(tagged.len()), b'k');

        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("plain", len), &plain, |b, key| {
            b.iter(|| key_slot(black_box(key)))
        });
        group.bench_with_input(BenchmarkId::new("tagged", len), &tagged, |b, key| {
            b.iter(|| key_slot(black_box(key)))
        });
    }

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let same_slot: Vec<String> = (0..16).map(|i| format!("{{order}}:{}", i)).collect();
    let spread: Vec<String> = (0..16).map(|i| format!("order:{}", i)).collect();

    c.bench_function("validate_single_slot/16_tagged", |b| {
        b.iter(|| validate_single_slot(black_box(&same_slot)))
    });
    c.bench_function("validate_single_slot/16_cross_slot", |b| {
        b.iter(|| validate_single_slot(black_box(&spread)))
    });
    c.bench_function("is_anchored_pattern", |b| {
        b.iter(|| is_anchored_pattern(black_box(b"{user1000}:sessions:*")))
    });
}

fn connect(rt: &Runtime) -> Option<ClusterClient> {
    let seeds = std::env::var("SHARDLINE_BENCH_SEEDS").ok()?;
    rt.block_on(ClusterClient::connect(&seeds)).ok()
}

fn bench_cluster_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let Some(client) = connect(&rt) else {
        return;
    };

    let mut group = c.benchmark_group("cluster_set");
    for size in [64usize, 1024, 16384] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let value = Bytes::from(vec![b'x'; size]);
            let key = format!("bench:set:{}", size);

            b.to_async(&rt).iter(|| async {
                client
                    .set(black_box(key.clone()), black_box(value.clone()))
                    .await
                    .expect("SET failed");
            });
        });
    }
    group.finish();

    c.bench_function("cluster_get", |b| {
        b.to_async(&rt).iter(|| async {
            client.get(black_box("bench:set:64")).await.expect("GET failed");
        });
    });
}

criterion_group!(
    benches,
    bench_key_slot,
    bench_validation,
    bench_cluster_round_trip
);
criterion_main!(benches);
