// benches/codec.rs

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use save_data::{SaveNode, codec};

fn create_world(entities: usize) -> SaveNode {
    let mut world = SaveNode::new();
    for i in 0..entities as u64 {
        let entity = world.address_mut(i).unwrap();
        entity.key_mut("x").unwrap().set(i as f32);
        entity.key_mut("y").unwrap().set((i * 2) as f32);
        entity.key_mut("hp").unwrap().set(100u16);
        entity.key_mut("name").unwrap().set_str("goblin");
    }
    world
}

fn bench_compute_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_size");
    for size in [100, 1_000, 10_000] {
        let world = create_world(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| codec::compute_size(black_box(&world)));
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for size in [100, 1_000, 10_000] {
        let world = create_world(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| codec::encode(black_box(&world)).unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for size in [100, 1_000, 10_000] {
        let bytes = codec::encode(&create_world(size)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| codec::decode(black_box(&bytes)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compute_size, bench_encode, bench_decode);
criterion_main!(benches);
