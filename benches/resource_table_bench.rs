//! Resource table bind and synchronize throughput on the host backend.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use voxray::gpu::backend::HostBackend;
use voxray::gpu::device::Device;
use voxray::gpu::resource_table::{Handle, ResourceTable};
use voxray::options::{GpuNode, NodeRecord};

type NodeTable = ResourceTable<HostBackend, GpuNode>;

fn record(i: usize) -> NodeRecord {
    let t = (i % 256) as f32 / 255.0;
    NodeRecord {
        normalized_intensity: t,
        opacity: t,
        diffuse: [t, 1.0 - t, 0.5],
        specular: [1.0; 3],
        emission: [0.0; 3],
        roughness: 100.0,
    }
}

fn filled_table(device: &Device<HostBackend>, count: usize) -> NodeTable {
    let mut table = NodeTable::new(device, "bench_nodes").unwrap();
    for i in 0..count {
        let _ = table.bind(&record(i), Handle::NONE).unwrap();
    }
    table
}

fn bench_bind_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("bind_new");
    for count in [16, 64, 256] {
        let _ = group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let device = Device::new(HostBackend::new());
                black_box(filled_table(&device, count).len())
            });
        });
    }
    group.finish();
}

fn bench_overwrite(c: &mut Criterion) {
    let device = Device::new(HostBackend::new());
    let mut table = filled_table(&device, 256);
    let mut i = 0;
    let _ = c.bench_function("overwrite_full_table", |b| {
        b.iter(|| {
            i = (i + 1) % 256;
            black_box(table.bind(&record(i), Handle(i as i32)).unwrap())
        });
    });
}

fn bench_synchronize(c: &mut Criterion) {
    let device = Device::new(HostBackend::new());
    let mut table = filled_table(&device, 256);
    let _ = c.bench_function("synchronize_256", |b| {
        b.iter(|| table.synchronize().unwrap());
    });
}

criterion_group!(benches, bench_bind_new, bench_overwrite, bench_synchronize);
criterion_main!(benches);
