//! Criterion benchmarks for segbase.
//!
//! Covers segment algebra across encodings, record set traversal, and a
//! bulk load through the deferred update pipeline.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use segbase::config::{DatabaseConfig, IndexSpec, SegmentSize};
use segbase::database::Database;
use segbase::recordset::{Recordset, RecordsetRegistry};
use segbase::recordset::registry::DatabaseId;
use segbase::segment::{ListSegment, Segment};
use segbase::storage::memory::MemoryStorage;

fn list_segment(step: u16, size: SegmentSize) -> Segment {
    let offsets = (0..size.upper_conversion_limit as u16).map(|i| i * step).collect();
    Segment::List(ListSegment::from_offsets(0, None, offsets, size))
}

fn bitarray_segment(step: u16, size: SegmentSize) -> Segment {
    let mut segment = Segment::empty(0, None, size);
    let bits = segment.bitarray_mut();
    for offset in (0..size.segment_width() as u16).step_by(step as usize) {
        bits.set(offset);
    }
    segment
}

fn bench_segment_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_algebra");
    let size = SegmentSize::default();

    let list_a = list_segment(7, size);
    let list_b = list_segment(11, size);
    let bits_a = bitarray_segment(2, size);
    let bits_b = bitarray_segment(3, size);

    group.bench_function("list_or_list", |b| {
        b.iter(|| black_box(list_a.or(&list_b).unwrap()))
    });
    group.bench_function("list_and_bitarray", |b| {
        b.iter(|| black_box(list_a.and(&bits_b).unwrap()))
    });
    group.bench_function("bitarray_xor_bitarray", |b| {
        b.iter(|| black_box(bits_a.xor(&bits_b).unwrap()))
    });
    group.bench_function("normalize_bitarray", |b| {
        b.iter(|| black_box(bits_a.clone().normalize(true)))
    });

    group.finish();
}

fn bench_recordset_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("recordset_traversal");
    let size = SegmentSize::default();
    let registry = RecordsetRegistry::new(DatabaseId::allocate());
    let mut recordset = Recordset::new(&registry, size);
    for record_number in (0..100_000u64).step_by(3) {
        recordset.place(record_number).unwrap();
    }
    recordset.normalize(true);

    group.throughput(Throughput::Elements(recordset.count_records() as u64));
    group.bench_function("cursor_forward", |b| {
        b.iter(|| {
            let mut cursor = recordset.cursor();
            let mut visited = 0usize;
            let mut entry = cursor.first();
            while entry.is_some() {
                visited += 1;
                entry = cursor.next();
            }
            black_box(visited)
        })
    });
    group.bench_function("select_middle", |b| {
        let middle = (recordset.count_records() / 2) as i64;
        b.iter(|| black_box(recordset.get_record_number_at_position(middle)))
    });

    group.finish();
}

fn bench_deferred_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("deferred_load");
    group.sample_size(10);

    for count in [10_000usize, 50_000] {
        let records: Vec<Vec<u8>> = (0..count)
            .map(|i| format!(r#"{{"parity":{},"bucket":{}}}"#, i % 2, i % 500).into_bytes())
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("load_{count}_records"), |b| {
            b.iter_with_setup(
                || {
                    let config = DatabaseConfig::new("bench")
                        .with_index(IndexSpec::json_field("parity"))
                        .with_index(IndexSpec::json_field("bucket"));
                    Database::create(Arc::new(MemoryStorage::new()), config).unwrap()
                },
                |mut db| {
                    db.set_defer_update().unwrap();
                    for record in &records {
                        db.put_record(record.clone()).unwrap();
                    }
                    db.do_final_segment_deferred_updates().unwrap();
                    db.unset_defer_update();
                    black_box(db.record_count())
                },
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_segment_algebra,
    bench_recordset_traversal,
    bench_deferred_load
);

criterion_main!(benches);
