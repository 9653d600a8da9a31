//! Performance benchmarks for the record store backends.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use recstore::{
    create_record_store, CompressorKind, Cursor, Kind, RecordStore, StoreConfig,
};
use tempfile::TempDir;

const RECORD_SIZE: usize = 4096;

fn configs(dir: &TempDir) -> Vec<(&'static str, StoreConfig)> {
    vec![
        ("file", StoreConfig::new(dir.path().join("file"), Kind::File)),
        ("archive", StoreConfig::new(dir.path().join("archive"), Kind::Archive)),
        ("database", StoreConfig::new(dir.path().join("database"), Kind::Database)),
        ("sqlite", StoreConfig::new(dir.path().join("sqlite"), Kind::Sqlite)),
        (
            "archive+lz4",
            StoreConfig::new(dir.path().join("lz4"), Kind::Archive)
                .with_compression(CompressorKind::Lz4),
        ),
        (
            "archive+zstd",
            StoreConfig::new(dir.path().join("zstd"), Kind::Archive)
                .with_compression(CompressorKind::Zstd),
        ),
    ]
}

/// Compressible payload: repeated text with a varying counter.
fn payload(i: usize) -> Vec<u8> {
    format!("record {:08} ", i)
        .into_bytes()
        .into_iter()
        .cycle()
        .take(RECORD_SIZE)
        .collect()
}

fn populated(config: &StoreConfig, records: usize) -> Box<dyn RecordStore> {
    let mut store = create_record_store(config).unwrap();
    for i in 0..records {
        store.insert(&format!("key{:08}", i), &payload(i)).unwrap();
    }
    store.sync().unwrap();
    store
}

/// Benchmark inserting fresh records
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    let dir = TempDir::new().unwrap();
    for (name, config) in configs(&dir) {
        let mut store = create_record_store(&config).unwrap();
        let data = payload(0);
        let mut next = 0usize;

        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                store.insert(&format!("key{:012}", next), &data).unwrap();
                next += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark random reads from a populated store
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let records = 1000;

    let dir = TempDir::new().unwrap();
    for (name, config) in configs(&dir) {
        let store = populated(&config, records);
        let mut i = 0usize;

        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                // Stride through the keys so caches see a spread of records.
                i = (i + 7919) % records;
                black_box(store.read(&format!("key{:08}", i)).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark a full sequencing pass
fn bench_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence");
    group.sample_size(20);

    for records in [100, 1000] {
        let dir = TempDir::new().unwrap();
        for (name, config) in configs(&dir) {
            let mut store = populated(&config, records);

            group.bench_with_input(BenchmarkId::new(name, records), &records, |b, &records| {
                b.iter(|| {
                    let mut seen = 0;
                    let mut cursor = Cursor::Start;
                    while let Some(record) = store.sequence(cursor).unwrap() {
                        black_box(record);
                        seen += 1;
                        cursor = Cursor::Next;
                    }
                    assert_eq!(seen, records);
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_read, bench_sequence);
criterion_main!(benches);
