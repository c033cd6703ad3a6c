//! Benchmarks for device selection and restriction over large stub registries.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gpu_reserve::gpu::device::{DeviceSelection, GpuDevice, GIB};
use gpu_reserve::gpu::stub::StubRegistry;
use gpu_reserve::gpu::{restrict, select_freeest};

fn bench_select_freeest(c: &mut Criterion) {
    // 1,024 devices with varied free memory.
    let free: Vec<u64> = (0..1024u64).map(|i| (i * 7919 % 1024) * GIB / 32).collect();
    let registry = StubRegistry::with_free_memory(&free);

    c.bench_function("select_freeest_1024", |b| {
        b.iter(|| {
            let best = select_freeest(black_box(&registry)).unwrap();
            registry.clear_queries();
            black_box(best);
        })
    });
}

fn bench_resolve_all(c: &mut Criterion) {
    let physical: Vec<GpuDevice> = (0..1024).map(|i| GpuDevice::new(i, "Stub GPU")).collect();
    let selection = DeviceSelection::all();

    c.bench_function("resolve_all_1024", |b| {
        b.iter(|| black_box(selection.resolve(black_box(&physical)).unwrap()))
    });
}

fn bench_restrict(c: &mut Criterion) {
    c.bench_function("restrict_all_64", |b| {
        b.iter(|| {
            let mut registry = StubRegistry::with_free_memory(&[GIB; 64]);
            black_box(restrict(&mut registry, -1i64).unwrap());
        })
    });
}

criterion_group!(benches, bench_select_freeest, bench_resolve_all, bench_restrict);
criterion_main!(benches);
