use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kebe_core::{digest, StreamingDigest};
use kebe_core::digest::READ_BUF_SIZE;

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha3_384");
    for size in [4 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let data = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("one_shot", size), &data, |b, data| {
            b.iter(|| digest(black_box(data)))
        });

        group.bench_with_input(BenchmarkId::new("streaming", size), &data, |b, data| {
            b.iter(|| {
                let mut s = StreamingDigest::new();
                for chunk in data.chunks(READ_BUF_SIZE) {
                    s.update(black_box(chunk));
                }
                s.finalize()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_digest);
criterion_main!(benches);
