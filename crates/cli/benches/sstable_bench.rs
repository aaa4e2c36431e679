use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use sstable::{SegmentReader, SegmentWriter};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;
const INDEX_INTERVAL: u64 = 4096;

fn build_records() -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
    (0..N_KEYS)
        .map(|i| {
            (
                format!("key{:05}", i).into_bytes(),
                Some(vec![b'x'; VALUE_SIZE]),
            )
        })
        .collect()
}

fn segment_write_benchmark(c: &mut Criterion) {
    c.bench_function("segment_write_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");
                (dir, path, build_records())
            },
            |(_dir, path, records)| {
                SegmentWriter::write_to_path(&path, N_KEYS, INDEX_INTERVAL, records.into_iter())
                    .unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn segment_get_hit_benchmark(c: &mut Criterion) {
    c.bench_function("segment_get_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");

                SegmentWriter::write_to_path(
                    &path,
                    N_KEYS,
                    INDEX_INTERVAL,
                    build_records().into_iter(),
                )
                .unwrap();

                let reader = SegmentReader::open(&path, INDEX_INTERVAL).unwrap();
                (dir, reader)
            },
            |(_dir, reader)| {
                for i in 0..N_KEYS {
                    let key = format!("key{:05}", i).into_bytes();
                    let v = reader.get(&key).unwrap();
                    assert!(v.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn segment_get_miss_benchmark(c: &mut Criterion) {
    c.bench_function("segment_get_miss_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.sst");

                SegmentWriter::write_to_path(
                    &path,
                    N_KEYS,
                    INDEX_INTERVAL,
                    build_records().into_iter(),
                )
                .unwrap();

                let reader = SegmentReader::open(&path, INDEX_INTERVAL).unwrap();
                (dir, reader)
            },
            |(_dir, reader)| {
                for i in 0..N_KEYS {
                    let key = format!("missing{:05}", i).into_bytes();
                    let v = reader.get(&key).unwrap();
                    assert!(v.is_none());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    segment_write_benchmark,
    segment_get_hit_benchmark,
    segment_get_miss_benchmark
);
criterion_main!(benches);
