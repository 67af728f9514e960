//! Edge and connection kinds for dataflow graphs.
//!
//! Edges are typed by a [`Connection`] kind that fixes how the source and
//! target index spaces relate: element-wise, fanning out over an array,
//! collapsing an axis, or collecting scalars into an array input.

use crate::method::MethodVertex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic of an edge between two vertices.
///
/// The `rank` parameter of each kind is the rank shared on the edge axis;
/// graph validation checks it against the computed rank of the source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connection {
    /// Source and target share rank `r`; slices map element-wise.
    OneToOne(usize),
    /// Target has rank `r + 1`; its last axis iterates the elements of the
    /// source's array output.
    Scatter(usize),
    /// Source has rank `r + 1`; the target collects all slices along the
    /// source's last axis into one array input.
    Reduce(usize),
    /// One of several edges at the same input port, supplying the array
    /// element at position `idx`.
    Collect { idx: usize, rank: usize },
}

impl Connection {
    /// The declared rank parameter of this kind.
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Connection::OneToOne(r)
            | Connection::Scatter(r)
            | Connection::Reduce(r)
            | Connection::Collect { rank: r, .. } => *r,
        }
    }

    #[must_use]
    pub fn is_collect(&self) -> bool {
        matches!(self, Connection::Collect { .. })
    }

    /// Rank the source must have for this kind to be well-formed.
    #[must_use]
    pub fn required_source_rank(&self) -> usize {
        match self {
            Connection::OneToOne(r)
            | Connection::Scatter(r)
            | Connection::Collect { rank: r, .. } => *r,
            Connection::Reduce(r) => *r + 1,
        }
    }

    /// Rank this kind implies for the target.
    #[must_use]
    pub fn implied_target_rank(&self) -> usize {
        match self {
            Connection::OneToOne(r) | Connection::Reduce(r) | Connection::Collect { rank: r, .. } => {
                *r
            }
            Connection::Scatter(r) => *r + 1,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::OneToOne(r) => write!(f, "one-to-one({r})"),
            Connection::Scatter(r) => write!(f, "scatter({r})"),
            Connection::Reduce(r) => write!(f, "reduce({r})"),
            Connection::Collect { idx, rank } => write!(f, "collect({idx}, {rank})"),
        }
    }
}

/// A directed, typed edge from one vertex output port to another vertex
/// input port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: MethodVertex,
    /// Index into the source's output ports.
    pub output_ref: usize,
    pub target: MethodVertex,
    /// Index into the target's input ports.
    pub input_ref: usize,
    pub kind: Connection,
}

impl Edge {
    pub fn new(
        source: MethodVertex,
        output_ref: usize,
        target: MethodVertex,
        input_ref: usize,
        kind: Connection,
    ) -> Self {
        Edge {
            source,
            output_ref,
            target,
            input_ref,
            kind,
        }
    }

    pub fn one_to_one(
        source: &MethodVertex,
        output_ref: usize,
        target: &MethodVertex,
        input_ref: usize,
        rank: usize,
    ) -> Self {
        Edge::new(
            source.clone(),
            output_ref,
            target.clone(),
            input_ref,
            Connection::OneToOne(rank),
        )
    }

    pub fn scatter(
        source: &MethodVertex,
        output_ref: usize,
        target: &MethodVertex,
        input_ref: usize,
        rank: usize,
    ) -> Self {
        Edge::new(
            source.clone(),
            output_ref,
            target.clone(),
            input_ref,
            Connection::Scatter(rank),
        )
    }

    pub fn reduce(
        source: &MethodVertex,
        output_ref: usize,
        target: &MethodVertex,
        input_ref: usize,
        rank: usize,
    ) -> Self {
        Edge::new(
            source.clone(),
            output_ref,
            target.clone(),
            input_ref,
            Connection::Reduce(rank),
        )
    }

    pub fn collect(
        source: &MethodVertex,
        output_ref: usize,
        target: &MethodVertex,
        input_ref: usize,
        idx: usize,
        rank: usize,
    ) -> Self {
        Edge::new(
            source.clone(),
            output_ref,
            target.clone(),
            input_ref,
            Connection::Collect { idx, rank },
        )
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -[{}]-> {}.{}",
            self.source, self.output_ref, self.kind, self.target, self.input_ref
        )
    }
}
