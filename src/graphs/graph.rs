//! The dataflow graph: vertices, typed edges, and well-formedness.
//!
//! A [`FlowGraph`] is immutable between alterations. Every constructor
//! validates the full set of well-formedness rules, so holding a
//! `FlowGraph` is proof that the graph is acyclic, every input port is
//! legally bound, port references are in range, edge types line up with the
//! port descriptors, and every vertex has a consistent computed rank.
//!
//! Cycle detection and topological ordering run on a petgraph `DiGraph`
//! built from the vertex set, which also yields the evaluation order the
//! state machine uses for downstream reclassification.

use crate::graphs::edges::{Connection, Edge};
use crate::method::MethodVertex;
use crate::types::PortType;
use miette::Diagnostic;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors detected while validating a graph's structure.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// The edge set contains a directed cycle.
    #[error("graph contains a cycle through {vertex}")]
    #[diagnostic(
        code(dataloom::graphs::cycle),
        help("Dataflow graphs must be acyclic; remove one of the edges on the cycle.")
    )]
    Cycle { vertex: String },

    /// An edge references a vertex that is not part of the graph.
    #[error("edge endpoint {vertex} is not a graph vertex")]
    #[diagnostic(code(dataloom::graphs::unknown_endpoint))]
    UnknownEndpoint { vertex: String },

    /// An edge references an output or input port past the method's
    /// declared port list.
    #[error("{side} port {port} out of range for {vertex} ({len} ports)")]
    #[diagnostic(code(dataloom::graphs::port_out_of_range))]
    PortOutOfRange {
        vertex: String,
        side: &'static str,
        port: usize,
        len: usize,
    },

    /// The port descriptors on the two ends of an edge do not line up with
    /// its connection kind.
    #[error("type mismatch on edge {edge}: {output} cannot feed {input}")]
    #[diagnostic(
        code(dataloom::graphs::type_mismatch),
        help("Scatter needs an array output into an item input; reduce and collect the reverse.")
    )]
    TypeMismatch {
        edge: String,
        output: PortType,
        input: PortType,
    },

    /// An input port is bound by more than one non-collect edge, or mixes
    /// collect and non-collect edges.
    #[error("input port {port} of {vertex} is bound more than once")]
    #[diagnostic(code(dataloom::graphs::input_port_conflict))]
    InputPortConflict { vertex: String, port: usize },

    /// Two collect edges at the same input port claim the same element.
    #[error("collect element {idx} at input port {port} of {vertex} is supplied twice")]
    #[diagnostic(code(dataloom::graphs::collect_idx_clash))]
    CollectIdxClash {
        vertex: String,
        port: usize,
        idx: usize,
    },

    /// An edge's declared rank disagrees with the computed rank of its
    /// source, or two edges imply different ranks for the same target.
    #[error("rank mismatch at {vertex}: {detail}")]
    #[diagnostic(code(dataloom::graphs::rank_mismatch))]
    RankMismatch { vertex: String, detail: String },
}

/// Errors produced when an alteration batch is rejected.
///
/// A failed alteration leaves the engine state untouched; the reply of the
/// alter request resolves to this error.
#[derive(Debug, Error, Diagnostic)]
pub enum AlterError {
    /// The altered graph would be ill-formed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    /// The engine shut down before acknowledging the alteration.
    #[error("engine closed before the alteration was acknowledged")]
    #[diagnostic(code(dataloom::graphs::engine_closed))]
    EngineClosed,
}

/// An immutable, validated dataflow graph.
#[derive(Clone, Debug, Default)]
pub struct FlowGraph {
    vertices: Vec<MethodVertex>,
    edges: Vec<Edge>,
    ranks: FxHashMap<MethodVertex, usize>,
    topo: Vec<MethodVertex>,
}

impl FlowGraph {
    /// The graph with no vertices and no edges.
    #[must_use]
    pub fn empty() -> Self {
        FlowGraph::default()
    }

    /// Validates `vertices` and `edges` into a graph.
    pub fn from_parts(
        vertices: Vec<MethodVertex>,
        edges: Vec<Edge>,
    ) -> Result<Self, GraphError> {
        let (ranks, topo) = validate(&vertices, &edges)?;
        Ok(FlowGraph {
            vertices,
            edges,
            ranks,
            topo,
        })
    }

    #[must_use]
    pub fn vertices(&self) -> &[MethodVertex] {
        &self.vertices
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[must_use]
    pub fn contains_vertex(&self, vertex: &MethodVertex) -> bool {
        self.ranks.contains_key(vertex)
    }

    /// Computed rank of `vertex`, if it belongs to the graph.
    #[must_use]
    pub fn rank(&self, vertex: &MethodVertex) -> Option<usize> {
        self.ranks.get(vertex).copied()
    }

    /// Vertices in a topological order of the edge relation.
    #[must_use]
    pub fn topo_order(&self) -> &[MethodVertex] {
        &self.topo
    }

    pub fn edges_into<'a>(
        &'a self,
        target: &'a MethodVertex,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.target == target)
    }

    pub fn edges_out_of<'a>(
        &'a self,
        source: &'a MethodVertex,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.source == source)
    }

    /// Edges bound to one input port of `target`, collect edges sorted by
    /// element position.
    #[must_use]
    pub fn input_edges(&self, target: &MethodVertex, input_ref: usize) -> Vec<&Edge> {
        let mut bound: Vec<&Edge> = self
            .edges
            .iter()
            .filter(|e| &e.target == target && e.input_ref == input_ref)
            .collect();
        bound.sort_by_key(|e| match &e.kind {
            Connection::Collect { idx, .. } => *idx,
            _ => 0,
        });
        bound
    }

    /// Applies an alteration batch in order (disconnect, remove, merge,
    /// connect) and revalidates.
    ///
    /// Disconnecting an absent edge and removing an absent vertex are
    /// no-ops, so alteration batches are idempotent; only structural
    /// violations of the resulting graph are errors.
    pub fn try_apply(
        &self,
        disconnect: &[Edge],
        remove: &[MethodVertex],
        merge: Option<&FlowGraph>,
        connect: &[Edge],
    ) -> Result<FlowGraph, AlterError> {
        let mut vertices = self.vertices.clone();
        let mut edges = self.edges.clone();
        edges.retain(|e| !disconnect.contains(e));
        for v in remove {
            vertices.retain(|x| x != v);
            edges.retain(|e| &e.source != v && &e.target != v);
        }
        if let Some(other) = merge {
            for v in other.vertices() {
                if !vertices.contains(v) {
                    vertices.push(v.clone());
                }
            }
            for e in other.edges() {
                if !edges.contains(e) {
                    edges.push(e.clone());
                }
            }
        }
        for e in connect {
            if !edges.contains(e) {
                edges.push(e.clone());
            }
        }
        FlowGraph::from_parts(vertices, edges).map_err(AlterError::from)
    }
}

type Validated = (FxHashMap<MethodVertex, usize>, Vec<MethodVertex>);

fn validate(vertices: &[MethodVertex], edges: &[Edge]) -> Result<Validated, GraphError> {
    check_endpoints_and_ports(vertices, edges)?;
    check_input_bindings(edges)?;
    check_port_types(edges)?;
    let topo = topo_order(vertices, edges)?;
    let ranks = compute_ranks(&topo, edges)?;
    Ok((ranks, topo))
}

fn check_endpoints_and_ports(vertices: &[MethodVertex], edges: &[Edge]) -> Result<(), GraphError> {
    for e in edges {
        for v in [&e.source, &e.target] {
            if !vertices.contains(v) {
                return Err(GraphError::UnknownEndpoint {
                    vertex: format!("{v:?}"),
                });
            }
        }
        let outputs = e.source.method().outputs();
        if e.output_ref >= outputs.len() {
            return Err(GraphError::PortOutOfRange {
                vertex: format!("{:?}", e.source),
                side: "output",
                port: e.output_ref,
                len: outputs.len(),
            });
        }
        let inputs = e.target.method().inputs();
        if e.input_ref >= inputs.len() {
            return Err(GraphError::PortOutOfRange {
                vertex: format!("{:?}", e.target),
                side: "input",
                port: e.input_ref,
                len: inputs.len(),
            });
        }
    }
    Ok(())
}

fn check_input_bindings(edges: &[Edge]) -> Result<(), GraphError> {
    let mut by_port: FxHashMap<(MethodVertex, usize), Vec<&Edge>> = FxHashMap::default();
    for e in edges {
        by_port
            .entry((e.target.clone(), e.input_ref))
            .or_default()
            .push(e);
    }
    for ((vertex, port), bound) in by_port {
        let collects = bound.iter().filter(|e| e.kind.is_collect()).count();
        if collects == 0 {
            if bound.len() > 1 {
                return Err(GraphError::InputPortConflict {
                    vertex: format!("{vertex:?}"),
                    port,
                });
            }
        } else if collects != bound.len() {
            return Err(GraphError::InputPortConflict {
                vertex: format!("{vertex:?}"),
                port,
            });
        } else {
            let mut seen = Vec::new();
            for e in bound {
                if let Connection::Collect { idx, .. } = e.kind {
                    if seen.contains(&idx) {
                        return Err(GraphError::CollectIdxClash {
                            vertex: format!("{vertex:?}"),
                            port,
                            idx,
                        });
                    }
                    seen.push(idx);
                }
            }
        }
    }
    Ok(())
}

fn check_port_types(edges: &[Edge]) -> Result<(), GraphError> {
    for e in edges {
        let output = e.source.method().outputs()[e.output_ref].clone();
        let input = e.target.method().inputs()[e.input_ref].clone();
        let ok = match e.kind {
            Connection::OneToOne(_) => output == input,
            Connection::Scatter(_) => {
                output.is_array() && !input.is_array() && output.element() == input.element()
            }
            Connection::Reduce(_) | Connection::Collect { .. } => {
                !output.is_array() && input.is_array() && output.element() == input.element()
            }
        };
        if !ok {
            return Err(GraphError::TypeMismatch {
                edge: e.to_string(),
                output,
                input,
            });
        }
    }
    Ok(())
}

fn topo_order(vertices: &[MethodVertex], edges: &[Edge]) -> Result<Vec<MethodVertex>, GraphError> {
    let mut digraph: DiGraph<MethodVertex, ()> = DiGraph::new();
    let mut indices: FxHashMap<MethodVertex, NodeIndex> = FxHashMap::default();
    for v in vertices {
        let ix = digraph.add_node(v.clone());
        indices.insert(v.clone(), ix);
    }
    for e in edges {
        digraph.add_edge(indices[&e.source], indices[&e.target], ());
    }
    match toposort(&digraph, None) {
        Ok(order) => Ok(order.into_iter().map(|ix| digraph[ix].clone()).collect()),
        Err(cycle) => Err(GraphError::Cycle {
            vertex: format!("{:?}", digraph[cycle.node_id()]),
        }),
    }
}

fn compute_ranks(
    topo: &[MethodVertex],
    edges: &[Edge],
) -> Result<FxHashMap<MethodVertex, usize>, GraphError> {
    let mut ranks: FxHashMap<MethodVertex, usize> = FxHashMap::default();
    for v in topo {
        let incoming: Vec<&Edge> = edges.iter().filter(|e| &e.target == v).collect();
        let rank = if incoming.is_empty() {
            0
        } else {
            let mut implied: Option<usize> = None;
            for e in &incoming {
                let source_rank = ranks[&e.source];
                if source_rank != e.kind.required_source_rank() {
                    return Err(GraphError::RankMismatch {
                        vertex: format!("{v:?}"),
                        detail: format!(
                            "edge {e} declares source rank {} but {} has rank {}",
                            e.kind.required_source_rank(),
                            e.source,
                            source_rank
                        ),
                    });
                }
                let target_rank = e.kind.implied_target_rank();
                match implied {
                    None => implied = Some(target_rank),
                    Some(r) if r != target_rank => {
                        return Err(GraphError::RankMismatch {
                            vertex: format!("{v:?}"),
                            detail: format!("incident edges imply ranks {r} and {target_rank}"),
                        });
                    }
                    Some(_) => {}
                }
            }
            implied.expect("non-empty incoming edges")
        };
        ranks.insert(v.clone(), rank);
    }
    Ok(ranks)
}
