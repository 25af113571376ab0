//! Table Extraction Benchmarks
//!
//! Measures block extraction over a generated dump of many tables, picking
//! one table, several tables and none.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dumpvault_engine::{BlockExtractor, extract_blocks};
use dumpvault_testing::{DumpFixture, TableFixture};
use std::time::Duration;

fn generated_dump(tables: usize, rows: usize) -> String {
    (0..tables)
        .fold(DumpFixture::new("benchdb"), |dump, t| {
            let table = (0..rows).fold(
                TableFixture::new(
                    format!("table_{t:03}"),
                    ["`id` int NOT NULL", "`payload` varchar(255)", "PRIMARY KEY (`id`)"],
                ),
                |table, r| table.with_row(format!("({r},'row {r} of table {t}')")),
            );
            dump.with_table(table)
        })
        .render(&[])
}

fn bench_extract_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_blocks");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(3));
    group.warm_up_time(Duration::from_secs(1));

    let dump = generated_dump(200, 50);
    group.throughput(Throughput::Bytes(dump.len() as u64));

    let cases: [(&str, Vec<String>); 3] = [
        ("one_table", vec!["table_100".to_string()]),
        (
            "ten_tables",
            (0..10).map(|i| format!("table_{:03}", i * 20)).collect(),
        ),
        ("no_match", vec!["missing".to_string()]),
    ];
    for (name, tables) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), tables, |b, tables| {
            b.iter(|| {
                let lines = dump.as_bytes().split_inclusive(|byte| *byte == b'\n');
                std::hint::black_box(extract_blocks(lines, std::hint::black_box(tables.as_slice())))
            })
        });
    }
    group.finish();
}

fn bench_streaming_extractor(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_extractor");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(3));

    let dump = generated_dump(50, 500);
    group.throughput(Throughput::Bytes(dump.len() as u64));

    group.bench_function("reused_buffer", |b| {
        let mut out = Vec::with_capacity(dump.len());
        b.iter(|| {
            out.clear();
            let mut extractor = BlockExtractor::new(["table_010", "table_040"]);
            for line in dump.as_bytes().split_inclusive(|byte| *byte == b'\n') {
                extractor.push_line(line, &mut out);
            }
            std::hint::black_box(extractor.finish(&mut out))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_extract_blocks, bench_streaming_extractor);
criterion_main!(benches);
