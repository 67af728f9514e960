//! Fluent construction of dataflow graphs.
//!
//! [`GraphBuilder`] accumulates vertices and edges and validates the whole
//! structure once on [`build`](GraphBuilder::build). Validation covers
//! acyclicity, input-port binding rules, port ranges, edge typing against
//! the methods' port descriptors, and rank consistency.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dataloom::graphs::{Edge, GraphBuilder};
//! use dataloom::method::MethodVertex;
//! # fn vertices() -> (MethodVertex, MethodVertex) { unimplemented!() }
//!
//! let (producer, consumer) = vertices();
//! let graph = GraphBuilder::new()
//!     .add_vertex(producer.clone())
//!     .add_vertex(consumer.clone())
//!     .connect(Edge::one_to_one(&producer, 0, &consumer, 0, 0))
//!     .build()
//!     .expect("well-formed graph");
//! ```

use crate::graphs::edges::Edge;
use crate::graphs::graph::{FlowGraph, GraphError};
use crate::method::MethodVertex;

/// Builder for [`FlowGraph`] values.
#[derive(Default)]
pub struct GraphBuilder {
    vertices: Vec<MethodVertex>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    /// Adds a vertex. Re-adding a vertex already present is ignored with a
    /// warning.
    #[must_use]
    pub fn add_vertex(mut self, vertex: MethodVertex) -> Self {
        if self.vertices.contains(&vertex) {
            tracing::warn!(?vertex, "ignoring duplicate vertex registration");
        } else {
            self.vertices.push(vertex);
        }
        self
    }

    /// Adds an edge. Endpoints must be added as vertices before
    /// [`build`](Self::build) is called.
    #[must_use]
    pub fn connect(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Validates and produces the graph.
    pub fn build(self) -> Result<FlowGraph, GraphError> {
        FlowGraph::from_parts(self.vertices, self.edges)
    }
}
