//! 지문 / 중복 제거 벤치마크
//!
//! 라인 지문 계산과 지문 저장소 check-and-set 성능을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use linehaul_forwarder::dedup::DedupStore;
use linehaul_forwarder::fingerprint::fingerprint;
use linehaul_forwarder::normalize::normalize_line;

fn sample_line(i: usize) -> String {
    format!(
        "2024-01-15T12:00:{:02}Z web-01 nginx[1234]: GET /api/v1/users/{i} HTTP/1.1 200 OK\r",
        i % 60
    )
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    for len in [64usize, 512, 4096] {
        let line = "x".repeat(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &line, |b, line| {
            b.iter(|| fingerprint(black_box(line)))
        });
    }
    group.finish();
}

fn bench_normalize_and_fingerprint(c: &mut Criterion) {
    let lines: Vec<String> = (0..1000).map(sample_line).collect();
    let mut group = c.benchmark_group("normalize_fingerprint");
    group.throughput(Throughput::Elements(lines.len() as u64));
    group.bench_function("1000_lines", |b| {
        b.iter(|| {
            for line in &lines {
                if let Some(normalized) = normalize_line(black_box(line)) {
                    black_box(fingerprint(normalized));
                }
            }
        })
    });
    group.finish();
}

fn bench_dedup_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut store = rt
        .block_on(DedupStore::open(dir.path(), 5000, false))
        .unwrap();

    let known: Vec<_> = (0..5000).map(|i| fingerprint(&sample_line(i))).collect();
    rt.block_on(async {
        for fp in &known {
            store.record(fp).await.unwrap();
        }
    });

    let mut group = c.benchmark_group("dedup");
    group.throughput(Throughput::Elements(known.len() as u64));
    // 전부 메모리에 있는 지문 -> 디스크 I/O 없음
    group.bench_function("seen_or_record_hits_5000", |b| {
        b.iter(|| {
            rt.block_on(async {
                for fp in &known {
                    black_box(store.seen_or_record(fp).await.unwrap());
                }
            })
        })
    });
    group.bench_function("contains_5000", |b| {
        b.iter(|| {
            for fp in &known {
                black_box(store.contains(fp));
            }
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_normalize_and_fingerprint,
    bench_dedup_check
);
criterion_main!(benches);
