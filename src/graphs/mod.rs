//! Graph model: vertices, typed edges, validation, and alteration.

pub mod builder;
pub mod edges;
pub mod graph;

pub use builder::GraphBuilder;
pub use edges::{Connection, Edge};
pub use graph::{AlterError, FlowGraph, GraphError};
