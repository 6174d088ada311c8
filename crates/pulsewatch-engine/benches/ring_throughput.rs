use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulsewatch_engine::{MetricDescriptor, MetricRegistry, SampleFlags};

fn bench_append(c: &mut Criterion) {
    let registry = MetricRegistry::new(0);
    let handle = registry
        .get_or_create(MetricDescriptor::new("bench.append", "unit", 1, 3600))
        .unwrap();

    let mut ts = 0i64;
    c.bench_function("ring_append", |b| {
        b.iter(|| {
            ts += 1;
            handle.store_sample(ts, black_box(ts as f64), SampleFlags::NONE);
        })
    });
}

fn bench_query(c: &mut Criterion) {
    let registry = MetricRegistry::new(0);
    let handle = registry
        .get_or_create(MetricDescriptor::new("bench.query", "unit", 1, 3600))
        .unwrap();

    for i in 0..3600 {
        handle.store_sample(i, i as f64, SampleFlags::NONE);
    }

    c.bench_function("ring_query_full_window", |b| {
        b.iter(|| {
            let points: Vec<_> = handle.query(0, 3599).unwrap().collect();
            black_box(points);
        })
    });
}

criterion_group!(benches, bench_append, bench_query);
criterion_main!(benches);
