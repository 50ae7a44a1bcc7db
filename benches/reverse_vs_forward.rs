use std::fs::File;
use std::hint::black_box;
use std::io::Write;
use std::path::PathBuf;

use criterion::{Criterion, criterion_group, criterion_main};
use csv_enrich::{Reader, ReverseReader, ReverseReaderBuilder};
use tempfile::TempDir;

fn generate_orders(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let csv_path = temp_dir.path().join("orders.csv");
    let mut file = File::create(&csv_path).expect("create csv");
    writeln!(file, "id,customer,status,note").expect("header");
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        writeln!(file, "{i},customer-{},{status},\"note, {i}\"", i % 97).expect("row");
    }
    (temp_dir, csv_path)
}

fn bench_last_cell(c: &mut Criterion) {
    let (_dir, path) = generate_orders(50_000);
    let mut group = c.benchmark_group("last_cell");

    group.bench_function("forward_scan", |b| {
        b.iter(|| {
            let mut reader = Reader::from_path(&path).expect("open");
            let last = reader
                .cells("status")
                .expect("status column")
                .map(|cell| cell.expect("cell"))
                .last();
            black_box(last)
        })
    });

    group.bench_function("reverse_reader", |b| {
        b.iter(|| black_box(ReverseReader::last_cell(&path, "status").expect("last cell")))
    });

    group.finish();
}

fn bench_full_reverse(c: &mut Criterion) {
    let (_dir, path) = generate_orders(20_000);
    let mut group = c.benchmark_group("full_reverse");

    for chunk_size in [512usize, 8 * 1024, 64 * 1024] {
        group.bench_function(format!("chunk_{chunk_size}"), |b| {
            b.iter(|| {
                let rows = ReverseReaderBuilder::new()
                    .chunk_size(chunk_size)
                    .from_path(&path)
                    .expect("open")
                    .count();
                black_box(rows)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_last_cell, bench_full_reverse);
criterion_main!(benches);
