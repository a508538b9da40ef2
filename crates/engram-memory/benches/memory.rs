use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use engram_core::{EntityId, NodeId, Scope, SystemClock};
use engram_memory::embeddings::normalize_vector;
use engram_memory::{
    AllowAllClassifier, EngineConfig, FactWrite, GateConfig, LshConfig, LshIndex, MemoryGraph,
    QueryBudget, StaticTokenAuthorizer, WriteGate,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const DIMENSION: usize = 384;

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    let mut v: Vec<f32> = (0..DIMENSION).map(|_| rng.gen_range(-1.0..1.0)).collect();
    normalize_vector(&mut v);
    v
}

fn bench_lsh_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("lsh_query");
    let mut rng = StdRng::seed_from_u64(7);

    for size in [1_000usize, 10_000] {
        let mut index = LshIndex::new(DIMENSION, LshConfig::for_dimension(DIMENSION));
        for i in 0..size {
            index
                .insert(NodeId::from_internal(i as u64), random_vector(&mut rng))
                .unwrap();
        }
        let query = random_vector(&mut rng);
        let budget = QueryBudget::default();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| index.query(black_box(&query), 0.3, 10, &budget).unwrap())
        });
    }
    group.finish();
}

fn bench_gate_writes(c: &mut Criterion) {
    let gate = WriteGate::new(
        Arc::new(AllowAllClassifier),
        Arc::new(StaticTokenAuthorizer::new(["bench"])),
        GateConfig::default(),
    );

    c.bench_function("gate_write_new_keys", |b| {
        let mut graph = MemoryGraph::with_clock(EngineConfig::default(), Arc::new(SystemClock)).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let write = FactWrite::new(format!("key_{}", i), "value", Scope::Consolidated)
                .with_embedding(random_vector(&mut rng))
                .with_token("bench");
            gate.write_fact(&mut graph, write).unwrap()
        })
    });

    c.bench_function("gate_write_duplicate", |b| {
        let mut graph = MemoryGraph::with_clock(EngineConfig::default(), Arc::new(SystemClock)).unwrap();
        let write = FactWrite::new("user_name", "Marcus", Scope::Consolidated).with_token("bench");
        gate.write_fact(&mut graph, write.clone()).unwrap();
        b.iter(|| gate.write_fact(&mut graph, black_box(write.clone())).unwrap())
    });
}

criterion_group!(benches, bench_lsh_query, bench_gate_writes);
criterion_main!(benches);
