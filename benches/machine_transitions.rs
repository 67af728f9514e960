//! Benchmarks for state machine transitions.
//!
//! Measures the cost of driving a linear chain of vertices from start to
//! completion through the message interface: one `Start` and one
//! `Succeeded` transition per vertex, each followed by the downstream
//! reclassification pass.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dataloom::artefact::{Artefact, Checkpoint};
use dataloom::graphs::{Edge, FlowGraph, GraphBuilder};
use dataloom::machine::{Message, StateMachine, SuccessResult};
use dataloom::method::{Method, MethodContext, MethodIteration, MethodStream, MethodVertex};
use dataloom::state::VertexStatus;
use dataloom::types::{PortType, VertexIndex};
use futures_util::StreamExt;
use rustc_hash::FxHashMap;

/// Minimal source method for benchmarking transition overhead.
struct BenchSource;

#[async_trait::async_trait]
impl Method for BenchSource {
    fn inputs(&self) -> Vec<PortType> {
        vec![]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        futures_util::stream::iter(vec![Ok(MethodIteration::new(vec![Artefact::new(0)]))]).boxed()
    }
}

/// Minimal pass-through method for the interior of the chain.
struct BenchStep;

#[async_trait::async_trait]
impl Method for BenchStep {
    fn inputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        futures_util::stream::iter(vec![Ok(MethodIteration::new(vec![Artefact::new(0)]))]).boxed()
    }
}

/// Build a linear chain: source -> step_1 -> ... -> step_{n-1}
fn build_chain(n: usize) -> (FlowGraph, Vec<MethodVertex>) {
    let mut vertices = vec![MethodVertex::new("source", BenchSource)];
    for i in 1..n {
        vertices.push(MethodVertex::new(format!("step_{i}"), BenchStep));
    }
    let mut builder = GraphBuilder::new();
    for v in &vertices {
        builder = builder.add_vertex(v.clone());
    }
    for pair in vertices.windows(2) {
        builder = builder.connect(Edge::one_to_one(&pair[0], 0, &pair[1], 0, 0));
    }
    (builder.build().expect("chain is well-formed"), vertices)
}

fn drive_to_completion(graph: FlowGraph, vertices: &[MethodVertex]) {
    let root = VertexIndex::root();
    let mut machine = StateMachine::new(graph, FxHashMap::default());
    machine.start();
    for vertex in vertices {
        machine
            .apply(Message::Start {
                vertex: vertex.clone(),
                index: None,
                can_start_time: None,
            })
            .expect("start applies");
        let state = machine.state();
        let VertexStatus::Started(start_time) = state.status(vertex, &root).unwrap().clone()
        else {
            panic!("vertex did not start");
        };
        machine
            .apply(Message::Succeeded {
                vertex: vertex.clone(),
                index: root.clone(),
                start_time,
                result: SuccessResult::IterationResult(MethodIteration::new(vec![
                    Artefact::new(1),
                ])),
            })
            .expect("succeeded applies");
    }
}

fn bench_chain_drive(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine_chain_drive");
    for n in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, &n| {
            bench.iter(|| {
                let (graph, vertices) = build_chain(n);
                drive_to_completion(graph, &vertices);
            });
        });
    }
    group.finish();
}

fn bench_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine_start");
    for n in [16usize, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, &n| {
            bench.iter(|| {
                let (graph, _) = build_chain(n);
                let mut machine = StateMachine::new(graph, FxHashMap::default());
                machine.start()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain_drive, bench_normalization);
criterion_main!(benches);
