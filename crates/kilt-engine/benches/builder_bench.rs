use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kilt_engine::hierarchy::{build_ranges, ranges_contain};
use kilt_engine::object::{ConstValue, NativeType};
use kilt_engine::{build_flow_graph, BuildContext, FlowGraph, Fragment, FunctionId, InstrKind, KernelProgram, ObjectStore};

fn bench_fragments(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragments");

    for size in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("append_chain", size), &size, |b, &size| {
            b.iter(|| {
                let mut graph = FlowGraph::new(FunctionId(0), None);
                let mut code = Fragment::empty();
                for i in 0..size {
                    let id = graph.push(InstrKind::Constant(ConstValue::Int(i as i64)), Vec::new());
                    code = code.append(Fragment::single(id), &mut graph);
                }
                black_box(code)
            });
        });
    }

    group.finish();
}

fn bench_ffi_load(c: &mut Criterion) {
    let mut store = ObjectStore::new();
    let core = store.core().clone();
    let load = core.add_ffi_load(&mut store, NativeType::Int32);
    let program = KernelProgram::new();

    c.bench_function("build_ffi_load", |b| {
        b.iter(|| build_flow_graph(BuildContext::new(&store, &program), black_box(load)).unwrap());
    });
}

fn bench_cid_ranges(c: &mut Criterion) {
    let mut group = c.benchmark_group("cid_ranges");

    // Every third cid accepted, every seventh abstract.
    let ranges = build_ranges(10_000, |cid| cid % 3 != 0, |cid| cid % 7 == 0);

    group.bench_function("build", |b| {
        b.iter(|| build_ranges(black_box(10_000), |cid| cid % 3 != 0, |cid| cid % 7 == 0));
    });
    group.bench_function("contains", |b| {
        b.iter(|| (0..10_000u32).filter(|&cid| ranges_contain(&ranges, black_box(cid))).count());
    });

    group.finish();
}

criterion_group!(benches, bench_fragments, bench_ffi_load, bench_cid_ranges);
criterion_main!(benches);
