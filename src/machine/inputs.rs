//! Input assembly: what a slice would receive if it ran now.
//!
//! Availability is data-driven. A referenced output slot counts when its
//! artefact is present; a slot lost from persisted state counts as
//! *missing* while the owning slice still has a checkpoint (the reproduce
//! path will restore it) and as *transient* when it does not (nothing can
//! bring it back, consumers surface `TransientInputs`).

use crate::artefact::Artefact;
use crate::graphs::{Connection, Edge, FlowGraph};
use crate::method::MethodVertex;
use crate::state::FlowState;
use crate::types::{PortType, VertexIndex};

/// Result of assembling the inputs of one slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SliceInputs {
    /// Every port is available; values are ordered by input port, with
    /// array ports folded into array artefacts.
    Ready(Vec<Artefact>),
    /// At least one port is not yet available.
    NotReady,
    /// At least one port references a partial output that cannot be
    /// reproduced.
    Transient,
}

impl SliceInputs {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, SliceInputs::Ready(_))
    }
}

/// Value of a single input port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputValue {
    NotAvailable,
    Transient,
    Item(Artefact),
    Array(Vec<Artefact>),
}

enum OutSlot {
    Missing,
    Transient,
    Value(Artefact),
}

fn output_slot(
    flow: &FlowState,
    source: &MethodVertex,
    index: &VertexIndex,
    output_ref: usize,
) -> OutSlot {
    let Some(state) = flow.get(source).and_then(|m| m.find(index)) else {
        return OutSlot::Missing;
    };
    let Some(data) = &state.data else {
        return OutSlot::Missing;
    };
    match data.output.get(output_ref) {
        Some(artefact) => OutSlot::Value(artefact.clone()),
        // Lost payload: reproducible while a checkpoint exists.
        None if data.checkpoint.is_some() => OutSlot::Missing,
        None => OutSlot::Transient,
    }
}

/// Assembles the value of one input port of `(vertex, index)`.
pub fn port_value(
    graph: &FlowGraph,
    flow: &FlowState,
    vertex: &MethodVertex,
    index: &VertexIndex,
    input_ref: usize,
    port_type: &PortType,
) -> InputValue {
    let edges = graph.input_edges(vertex, input_ref);
    if edges.is_empty() {
        return if port_type.is_array() {
            InputValue::Array(Vec::new())
        } else {
            InputValue::NotAvailable
        };
    }
    if edges.len() == 1 && !edges[0].kind.is_collect() {
        return single_edge_value(flow, edges[0], index);
    }
    // Collect edges, pre-sorted by element position.
    let mut items = Vec::with_capacity(edges.len());
    for e in edges {
        let prefix = index.prefix(e.kind.rank());
        match output_slot(flow, &e.source, &prefix, e.output_ref) {
            OutSlot::Value(a) => items.push(a),
            OutSlot::Missing => return InputValue::NotAvailable,
            OutSlot::Transient => return InputValue::Transient,
        }
    }
    InputValue::Array(items)
}

fn single_edge_value(flow: &FlowState, edge: &Edge, index: &VertexIndex) -> InputValue {
    match edge.kind {
        Connection::OneToOne(r) => {
            match output_slot(flow, &edge.source, &index.prefix(r), edge.output_ref) {
                OutSlot::Value(a) => InputValue::Item(a),
                OutSlot::Missing => InputValue::NotAvailable,
                OutSlot::Transient => InputValue::Transient,
            }
        }
        Connection::Scatter(r) => {
            match output_slot(flow, &edge.source, &index.prefix(r), edge.output_ref) {
                OutSlot::Value(a) => {
                    let element = index.component(r).and_then(|k| a.element(k));
                    match element {
                        Some(el) => InputValue::Item(el),
                        None => InputValue::NotAvailable,
                    }
                }
                OutSlot::Missing => InputValue::NotAvailable,
                OutSlot::Transient => InputValue::Transient,
            }
        }
        Connection::Reduce(_) => {
            let Some(n) = flow.get(&edge.source).and_then(|m| m.len_at(index)) else {
                return InputValue::NotAvailable;
            };
            let mut items = Vec::with_capacity(n);
            for k in 0..n {
                match output_slot(flow, &edge.source, &index.child(k), edge.output_ref) {
                    OutSlot::Value(a) => items.push(a),
                    OutSlot::Missing => return InputValue::NotAvailable,
                    OutSlot::Transient => return InputValue::Transient,
                }
            }
            InputValue::Array(items)
        }
        Connection::Collect { .. } => unreachable!("collect ports take the multi-edge path"),
    }
}

/// Assembles all inputs of `(vertex, index)`.
pub fn assemble(
    graph: &FlowGraph,
    flow: &FlowState,
    vertex: &MethodVertex,
    index: &VertexIndex,
) -> SliceInputs {
    let ports = vertex.method().inputs();
    let mut values = Vec::with_capacity(ports.len());
    let mut missing = false;
    for (input_ref, port_type) in ports.iter().enumerate() {
        match port_value(graph, flow, vertex, index, input_ref, port_type) {
            InputValue::NotAvailable => missing = true,
            InputValue::Transient => return SliceInputs::Transient,
            InputValue::Item(a) => values.push(a),
            InputValue::Array(items) => values.push(Artefact::from_items(items)),
        }
    }
    if missing {
        SliceInputs::NotReady
    } else {
        SliceInputs::Ready(values)
    }
}

/// True if any source slice this slice consumes is currently paused.
pub(crate) fn upstream_paused(
    graph: &FlowGraph,
    flow: &FlowState,
    vertex: &MethodVertex,
    index: &VertexIndex,
) -> bool {
    graph.edges_into(vertex).any(|e| {
        let Some(map) = flow.get(&e.source) else {
            return false;
        };
        match e.kind {
            Connection::Reduce(_) => map
                .starting_with(index)
                .any(|(_, s)| s.status.is_paused()),
            _ => {
                let prefix = index.prefix(e.kind.rank());
                map.find(&prefix).is_some_and(|s| s.status.is_paused())
            }
        }
    })
}
