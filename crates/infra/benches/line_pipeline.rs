use std::sync::Arc;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use filepipe_core::{BlobLocator, FileId, FileRecord, NewFile};
use filepipe_infra::blob_store::InMemoryBlobStore;
use filepipe_infra::jobs::Job;
use filepipe_infra::metadata_store::{InMemoryMetadataStore, MetadataStore};
use filepipe_infra::processing::{FileProcessor, LineFramer, ProcessorSettings, interpret_line};

const LINES: usize = 10_000;

/// Mix of valid JSON, blank and malformed lines.
fn sample_file() -> Vec<u8> {
    let mut out = String::new();
    for i in 0..LINES {
        match i % 10 {
            0 => out.push('\n'),
            1 => out.push_str("not json at all\r\n"),
            _ => out.push_str(&format!(
                "{{\"id\":{i},\"name\":\"item-{i}\",\"tags\":[\"a\",\"b\"],\"price\":{}.5}}\n",
                i % 97
            )),
        }
    }
    out.into_bytes()
}

fn bench_framing(c: &mut Criterion) {
    let data = sample_file();
    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_size in [64usize, 4 * 1024, 64 * 1024].iter() {
        group.bench_with_input(
            BenchmarkId::new("chunk_size", chunk_size),
            chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut framer = LineFramer::new(1024 * 1024);
                    let mut count = 0usize;
                    for chunk in data.chunks(size) {
                        framer.push(chunk);
                        while framer.next_line().unwrap().is_some() {
                            count += 1;
                        }
                    }
                    count += framer.finish().unwrap().into_iter().count();
                    black_box(count)
                });
            },
        );
    }

    group.finish();
}

fn bench_interpretation(c: &mut Criterion) {
    let data = sample_file();
    let mut framer = LineFramer::new(1024 * 1024);
    framer.push(&data);
    let mut lines = Vec::new();
    while let Some(line) = framer.next_line().unwrap() {
        lines.push(line);
    }
    lines.extend(framer.finish().unwrap());
    let file_id = FileId::new();

    let mut group = c.benchmark_group("interpretation");
    group.throughput(Throughput::Elements(lines.len() as u64));
    group.bench_function("interpret_lines", |b| {
        b.iter(|| {
            let mut n = 0u64;
            for line in &lines {
                if let Some(rec) = interpret_line(file_id, n + 1, line) {
                    n += 1;
                    black_box(rec);
                }
            }
            n
        });
    });
    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let data = Bytes::from(sample_file());

    let mut group = c.benchmark_group("process_file");
    group.sample_size(20);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for batch_size in [10usize, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("batch_size", batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    runtime.block_on(async {
                        let blobs = Arc::new(InMemoryBlobStore::new());
                        let metadata = Arc::new(InMemoryMetadataStore::new());
                        let locator = BlobLocator::new("uploads", "bench.jsonl");
                        blobs.put_chunks(locator.clone(), vec![data.clone()]);

                        let record = FileRecord::uploaded(FileId::new(), NewFile::new(locator));
                        let file_id = record.file_id;
                        metadata.insert_file(record).await.unwrap();

                        let processor = FileProcessor::new(
                            blobs,
                            metadata,
                            ProcessorSettings {
                                batch_size,
                                ..ProcessorSettings::default()
                            },
                        );
                        let job = Job::new(FileProcessor::payload_for(file_id));
                        black_box(processor.process(&job).await.unwrap())
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_framing, bench_interpretation, bench_end_to_end);
criterion_main!(benches);
