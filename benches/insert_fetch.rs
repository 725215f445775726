use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use railcar::{CompOp, DeallocList, Engine, EngineConfig, KeyDesc, KeyValue, ObjectId, PageId};

const SEED: u64 = 42;

/// Pre-existing index sizes to measure against.
const DB_SIZES: &[usize] = &[0, 1_000, 10_000];

struct Bench {
    _tmp: tempfile::TempDir,
    engine: Engine,
    index: ObjectId,
    root: PageId,
    kdesc: KeyDesc,
}

fn build_index(prefill: usize) -> Bench {
    let tmp = tempdir().expect("tempdir");
    let mut engine = Engine::create(tmp.path().join("bench.rc"), 0, &EngineConfig::default())
        .expect("create engine");
    let index = engine.create_index_file(1).expect("index file");
    let root = engine.create_index(&index).expect("create index");
    let kdesc = KeyDesc::single_int();
    for key in 0..prefill as i32 {
        engine
            .insert_object(
                &index,
                root,
                &kdesc,
                &KeyValue::from_i32(key),
                ObjectId::new(0, key, 0, key as u32),
            )
            .expect("prefill insert");
    }
    Bench {
        _tmp: tmp,
        engine,
        index,
        root,
        kdesc,
    }
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for &size in DB_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut bench = build_index(size);
            let mut next = size as i32;
            b.iter(|| {
                bench
                    .engine
                    .insert_object(
                        &bench.index,
                        bench.root,
                        &bench.kdesc,
                        &KeyValue::from_i32(next),
                        ObjectId::new(0, next, 0, next as u32),
                    )
                    .expect("insert");
                next += 1;
            });
        });
    }
    group.finish();
}

fn bench_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch");
    for &size in DB_SIZES.iter().filter(|s| **s > 0) {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut bench = build_index(size);
            let mut rng = StdRng::seed_from_u64(SEED);
            b.iter(|| {
                let key = KeyValue::from_i32(rng.gen_range(0..size as i32));
                let cursor = bench
                    .engine
                    .fetch(
                        bench.root,
                        &bench.kdesc,
                        Some(&key),
                        CompOp::Eq,
                        None,
                        CompOp::Eof,
                    )
                    .expect("fetch");
                black_box(cursor);
            });
        });
    }
    group.finish();
}

fn bench_insert_delete_cycle(c: &mut Criterion) {
    c.bench_function("insert_delete_cycle", |b| {
        let mut bench = build_index(1_000);
        b.iter(|| {
            let key = KeyValue::from_i32(500_000);
            let oid = ObjectId::new(0, 500_000, 0, 1);
            bench
                .engine
                .insert_object(&bench.index, bench.root, &bench.kdesc, &key, oid)
                .expect("insert");
            let mut dl = DeallocList::new();
            bench
                .engine
                .delete_object(&bench.index, bench.root, &bench.kdesc, &key, &oid, &mut dl)
                .expect("delete");
            bench.engine.apply_dealloc(&mut dl).expect("dealloc");
        });
    });
}

criterion_group!(benches, bench_insert, bench_fetch, bench_insert_delete_cycle);
criterion_main!(benches);
