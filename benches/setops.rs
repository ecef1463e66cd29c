use std::sync::Arc;

use binidx::region::{region_from_rids, Region, RegionType};
use binidx::setops::{CblqAlgorithm, SetOp, SetOps};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const DOMAIN: u64 = 1 << 20;

fn striped_region(rep: RegionType, stride: u64, width: u64) -> Arc<Region> {
    let rids: Vec<u64> = (0..DOMAIN)
        .filter(|r| r % stride < width)
        .collect();
    Arc::new(region_from_rids(rep, DOMAIN, &rids))
}

fn bench_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("nary_union");
    for rep in [
        RegionType::Ii,
        RegionType::Cii,
        RegionType::Bitmap,
        RegionType::Wah,
        RegionType::Cblq2,
    ] {
        let operands = [
            striped_region(rep, 64, 8),
            striped_region(rep, 96, 5),
            striped_region(rep, 257, 3),
        ];
        group.bench_with_input(BenchmarkId::from_parameter(rep.name()), &operands, |b, ops| {
            let setops = SetOps::default();
            b.iter(|| setops.nary(rep, DOMAIN, ops, SetOp::Union).unwrap());
        });
    }
    group.finish();
}

fn bench_cblq_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("cblq_union_algorithms");
    let operands = [
        striped_region(RegionType::Cblq2, 64, 8),
        striped_region(RegionType::Cblq2, 96, 5),
        striped_region(RegionType::Cblq2, 257, 3),
    ];
    for algorithm in [
        CblqAlgorithm::Baseline,
        CblqAlgorithm::FastUnion,
        CblqAlgorithm::NAry1,
        CblqAlgorithm::NAry2Dense,
        CblqAlgorithm::NAry3Dense,
        CblqAlgorithm::NAry3Fast,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", algorithm)),
            &operands,
            |b, ops| {
                let setops = SetOps::with_algorithm(algorithm);
                b.iter(|| {
                    setops
                        .nary(RegionType::Cblq2, DOMAIN, ops, SetOp::Union)
                        .unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_union, bench_cblq_algorithms);
criterion_main!(benches);
