mod common;

use common::*;
use dataloom::graphs::{Edge, GraphBuilder, GraphError};
use dataloom::method::MethodVertex;

#[test]
fn empty_graph_is_valid() {
    let graph = GraphBuilder::new().build().unwrap();
    assert!(graph.vertices().is_empty());
    assert!(graph.edges().is_empty());
    assert!(dataloom::graphs::FlowGraph::empty().topo_order().is_empty());
}

#[test]
fn ranks_follow_scatter_and_reduce() {
    let a = MethodVertex::new("a", ConstArrayMethod::new(vec![1, 2]));
    let b = MethodVertex::new("b", AddOneMethod);
    let c = MethodVertex::new("c", SumMethod);
    let graph = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .add_vertex(c.clone())
        .connect(Edge::scatter(&a, 0, &b, 0, 0))
        .connect(Edge::reduce(&b, 0, &c, 0, 0))
        .build()
        .unwrap();

    assert_eq!(graph.rank(&a), Some(0));
    assert_eq!(graph.rank(&b), Some(1));
    assert_eq!(graph.rank(&c), Some(0));

    let order = graph.topo_order();
    let pos = |v: &MethodVertex| order.iter().position(|x| x == v).unwrap();
    assert!(pos(&a) < pos(&b));
    assert!(pos(&b) < pos(&c));
}

#[test]
fn cycle_is_rejected() {
    let a = MethodVertex::new("a", AddOneMethod);
    let b = MethodVertex::new("b", AddOneMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .connect(Edge::one_to_one(&a, 0, &b, 0, 0))
        .connect(Edge::one_to_one(&b, 0, &a, 0, 0))
        .build();
    assert!(matches!(result, Err(GraphError::Cycle { .. })));
}

#[test]
fn unknown_endpoint_is_rejected() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", AddOneMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .connect(Edge::one_to_one(&a, 0, &b, 0, 0))
        .build();
    assert!(matches!(result, Err(GraphError::UnknownEndpoint { .. })));
}

#[test]
fn port_out_of_range_is_rejected() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", AddOneMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .connect(Edge::one_to_one(&a, 1, &b, 0, 0))
        .build();
    assert!(matches!(
        result,
        Err(GraphError::PortOutOfRange { side: "output", .. })
    ));
}

#[test]
fn scatter_requires_array_output() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", AddOneMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .connect(Edge::scatter(&a, 0, &b, 0, 0))
        .build();
    assert!(matches!(result, Err(GraphError::TypeMismatch { .. })));
}

#[test]
fn double_binding_of_an_input_port_is_rejected() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", ConstMethod::new(2));
    let c = MethodVertex::new("c", AddOneMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .add_vertex(c.clone())
        .connect(Edge::one_to_one(&a, 0, &c, 0, 0))
        .connect(Edge::one_to_one(&b, 0, &c, 0, 0))
        .build();
    assert!(matches!(result, Err(GraphError::InputPortConflict { .. })));
}

#[test]
fn collect_cannot_mix_with_other_kinds() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", ConstArrayMethod::new(vec![1]));
    let z = MethodVertex::new("z", SumMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .add_vertex(z.clone())
        .connect(Edge::collect(&a, 0, &z, 0, 0, 0))
        .connect(Edge::one_to_one(&b, 0, &z, 0, 0))
        .build();
    assert!(matches!(result, Err(GraphError::InputPortConflict { .. })));
}

#[test]
fn clashing_collect_positions_are_rejected() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", ConstMethod::new(2));
    let z = MethodVertex::new("z", SumMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .add_vertex(z.clone())
        .connect(Edge::collect(&a, 0, &z, 0, 0, 0))
        .connect(Edge::collect(&b, 0, &z, 0, 0, 0))
        .build();
    assert!(matches!(result, Err(GraphError::CollectIdxClash { idx: 0, .. })));
}

#[test]
fn declared_rank_must_match_source() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", AddOneMethod);
    let result = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .connect(Edge::one_to_one(&a, 0, &b, 0, 1))
        .build();
    assert!(matches!(result, Err(GraphError::RankMismatch { .. })));
}

#[test]
fn duplicate_vertex_registration_is_ignored() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let graph = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(a.clone())
        .build()
        .unwrap();
    assert_eq!(graph.vertices().len(), 1);
}

#[test]
fn alteration_noops_are_idempotent() {
    let a = MethodVertex::new("a", ConstMethod::new(1));
    let b = MethodVertex::new("b", AddOneMethod);
    let unrelated = MethodVertex::new("unrelated", ConstMethod::new(9));
    let edge = Edge::one_to_one(&a, 0, &b, 0, 0);
    let graph = GraphBuilder::new()
        .add_vertex(a.clone())
        .add_vertex(b.clone())
        .connect(edge.clone())
        .build()
        .unwrap();

    // Removing an absent vertex changes nothing.
    let altered = graph.try_apply(&[], &[unrelated.clone()], None, &[]).unwrap();
    assert_eq!(altered.vertices().len(), 2);
    assert_eq!(altered.edges().len(), 1);

    // Disconnecting an edge that was never connected changes nothing.
    let absent = Edge::one_to_one(&unrelated, 0, &b, 0, 0);
    let altered = altered.try_apply(&[absent], &[], None, &[]).unwrap();
    assert_eq!(altered.edges().len(), 1);

    // Re-connecting an existing edge does not duplicate it.
    let altered = altered.try_apply(&[], &[], None, &[edge]).unwrap();
    assert_eq!(altered.edges().len(), 1);
}

#[test]
fn input_edges_sort_collects_by_position() {
    let x = MethodVertex::new("x", ConstMethod::new(1));
    let y = MethodVertex::new("y", ConstMethod::new(2));
    let z = MethodVertex::new("z", SumMethod);
    let graph = GraphBuilder::new()
        .add_vertex(x.clone())
        .add_vertex(y.clone())
        .add_vertex(z.clone())
        .connect(Edge::collect(&y, 0, &z, 0, 1, 0))
        .connect(Edge::collect(&x, 0, &z, 0, 0, 0))
        .build()
        .unwrap();

    let bound = graph.input_edges(&z, 0);
    assert_eq!(bound.len(), 2);
    assert_eq!(bound[0].source, x);
    assert_eq!(bound[1].source, y);
}
