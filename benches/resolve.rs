//! Resolution benchmarks
//!
//! Measures a cold resolve (fresh registry) and a warm one (blocks already
//! registered) for shuffles and reduces on every backend.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use oclu_subgroup::codegen::PatchRegistry;
use oclu_subgroup::codegen::subgroup::{Backend, Capabilities, ReduceOp, ShuffleOp, SubgroupProvider};
use oclu_subgroup::types::VecType;

const TYPES: [&str; 8] = ["u32", "u8v4", "i16v2", "f32v4", "f64", "u64v2", "i8v16", "f16v8"];

fn backends() -> Vec<(&'static str, Backend, &'static str)> {
    vec![
        ("khr", Backend::Khr, "sg_khr,sg_khrshuf,fp16,fp64"),
        ("intel", Backend::Intel { beignet_fix: false }, "sg_intel,sg_intel16,sg_intel8"),
        ("local", Backend::Local, ""),
        ("ptx", Backend::Ptx { sm_version: 86 }, "fp64"),
    ]
}

fn provider(backend: Backend, args: &str) -> SubgroupProvider {
    let mut caps = Capabilities::default();
    caps.apply_args(args);
    let mut provider = SubgroupProvider::with_backend(caps, backend);
    provider.begin("bench");
    provider
}

fn types() -> Vec<VecType> {
    TYPES.iter().filter_map(|t| t.parse().ok()).collect()
}

fn resolve_all(p: &mut SubgroupProvider, reg: &mut PatchRegistry, types: &[VecType]) -> usize {
    let mut resolved = 0;
    for &vtype in types {
        for op in ShuffleOp::ALL {
            resolved += usize::from(p.resolve_shuffle(reg, vtype, op, false).is_ok());
        }
        for op in ReduceOp::ALL {
            resolved += usize::from(p.resolve_reduce(reg, op, vtype).is_ok());
        }
    }
    resolved
}

fn bench_cold(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_cold");
    let types = types();
    let requests = types.len() * (ShuffleOp::ALL.len() + ReduceOp::ALL.len());
    group.throughput(Throughput::Elements(requests as u64));

    for (name, backend, args) in backends() {
        group.bench_with_input(BenchmarkId::new("all_ops", name), &types, |b, types| {
            b.iter(|| {
                let mut p = provider(backend, args);
                let mut reg = PatchRegistry::new();
                black_box(resolve_all(&mut p, &mut reg, black_box(types)))
            })
        });
    }

    group.finish();
}

fn bench_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_warm");
    let types = types();

    for (name, backend, args) in backends() {
        let mut p = provider(backend, args);
        let mut reg = PatchRegistry::new();
        resolve_all(&mut p, &mut reg, &types);
        group.bench_with_input(BenchmarkId::new("all_ops", name), &types, |b, types| {
            b.iter(|| black_box(resolve_all(&mut p, &mut reg, black_box(types))))
        });
    }

    group.finish();
}

fn bench_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit");
    let types = types();

    for (name, backend, args) in backends() {
        let mut p = provider(backend, args);
        let mut reg = PatchRegistry::new();
        resolve_all(&mut p, &mut reg, &types);
        group.bench_with_input(BenchmarkId::new("write_all", name), &reg, |b, reg| {
            b.iter(|| {
                let mut out = String::new();
                black_box(reg.write_all(&mut out).is_ok());
                out
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cold, bench_warm, bench_emit);
criterion_main!(benches);
