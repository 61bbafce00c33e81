//! Pool benchmarks using criterion.
//!
//! Run with: cargo bench --bench pool_bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use strpool::{AllocId, StringPool};

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");

    // Bump path: fresh tail space, no free-list traffic.
    for len in [8usize, 32, 128] {
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("bump", len), &len, |b, &len| {
            let payload = vec![b'x'; len];
            b.iter_batched(
                || StringPool::new(1 << 20, false).unwrap(),
                |mut pool| {
                    for _ in 0..1024 {
                        black_box(pool.allocate_units(&payload).unwrap());
                    }
                    pool
                },
                BatchSize::SmallInput,
            );
        });
    }

    // Reuse path: every allocation is served from the free index.
    group.bench_function("free_list_reuse", |b| {
        let mut pool = StringPool::new(1 << 16, false).unwrap();
        b.iter(|| {
            let id = pool.allocate("0123456789abcdef").unwrap();
            black_box(pool.read(id).unwrap().len());
            pool.free(id);
        });
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    let mut pool = StringPool::new(1 << 18, false).unwrap();
    let ids: Vec<AllocId> = (0..1024)
        .map(|i| pool.allocate(&format!("payload-{i:04}")).unwrap())
        .collect();
    let stale = {
        let id = pool.allocate("gone").unwrap();
        pool.free(id);
        id
    };

    group.throughput(Throughput::Elements(ids.len() as u64));
    group.bench_function("resolve_all", |b| {
        b.iter(|| {
            let mut total = 0usize;
            for id in &ids {
                total += pool.read(*id).unwrap().len();
            }
            black_box(total)
        });
    });

    group.bench_function("resolve_via_handle", |b| {
        let handle = pool.get(ids[0]);
        b.iter(|| black_box(handle.as_units().unwrap().len()));
    });

    group.bench_function("stale_lookup", |b| {
        b.iter(|| black_box(pool.read(stale).is_err()));
    });

    group.finish();
}

fn bench_maintenance(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintenance");
    group.sample_size(20);

    // A fragmented pool: allocate a lot, free every other allocation.
    fn fragmented(blocks: usize) -> StringPool {
        let mut pool = StringPool::new(blocks * 16, false).unwrap();
        let ids: Vec<AllocId> = (0..blocks).map(|_| pool.allocate_raw(16).unwrap()).collect();
        // Runs of three adjacent frees so the coalesce sweep has work to do.
        for (i, id) in ids.iter().enumerate() {
            if i % 4 != 3 {
                pool.free(*id);
            }
        }
        pool
    }

    for blocks in [64usize, 512] {
        group.throughput(Throughput::Elements(blocks as u64 / 2));
        group.bench_with_input(BenchmarkId::new("coalesce", blocks), &blocks, |b, &blocks| {
            b.iter_batched(
                || fragmented(blocks),
                |mut pool| {
                    black_box(pool.coalesce().unwrap());
                    pool
                },
                BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("compact", blocks), &blocks, |b, &blocks| {
            b.iter_batched(
                || fragmented(blocks),
                |mut pool| {
                    pool.compact_and_grow(0).unwrap();
                    black_box(pool.fragmentation_pct());
                    pool
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_allocate, bench_read, bench_maintenance);
criterion_main!(benches);
