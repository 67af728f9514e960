//! Core identity and indexing types for the dataloom engine.
//!
//! This module defines the small value types that the rest of the crate is
//! built on: logical time, multi-dimensional slice indices, and the erased
//! port descriptors used for edge validation.
//!
//! # Key Types
//!
//! - [`TimeIndex`]: monotonically increasing logical counter issued by the
//!   state machine; stale worker messages are filtered by comparing times.
//! - [`VertexIndex`]: a finite sequence of non-negative integers identifying
//!   one slice of a vectorised vertex; its length equals the vertex rank.
//! - [`PortType`]: erased type descriptor for an input or output port.
//!
//! # Examples
//!
//! ```rust
//! use dataloom::types::{PortType, VertexIndex};
//!
//! let idx = VertexIndex::from(vec![2, 0, 1]);
//! assert_eq!(idx.rank(), 3);
//! assert_eq!(idx.prefix(2), VertexIndex::from(vec![2, 0]));
//!
//! let port = PortType::array("f64");
//! assert!(port.is_array());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical time issued by the state machine.
///
/// Every non-empty transition advances the engine's time index by one. The
/// statuses `CanStart`, `Started`, `Continues` and `CompleteStarted` each
/// reference the time at which they were entered, and incoming worker
/// messages carry the start time of the execution that produced them. A
/// message whose time no longer matches the slice's current status is stale
/// and is dropped without effect.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TimeIndex(u64);

impl TimeIndex {
    /// The time before any transition has been applied.
    pub const ZERO: TimeIndex = TimeIndex(0);

    /// The next logical instant.
    #[must_use]
    pub fn next(self) -> TimeIndex {
        TimeIndex(self.0 + 1)
    }

    /// Raw counter value, mainly for diagnostics.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for TimeIndex {
    fn from(value: u64) -> Self {
        TimeIndex(value)
    }
}

impl fmt::Display for TimeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Index of one slice of a vectorised vertex.
///
/// A vertex of rank `r` is instantiated once per index vector of length `r`;
/// rank-0 vertices have the single empty index. Indices order
/// lexicographically, which keeps slice iteration deterministic and makes
/// prefix queries on [`MdMap`](crate::mdmap::MdMap) contiguous ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexIndex(Vec<usize>);

impl VertexIndex {
    /// The empty index, used by every rank-0 vertex.
    #[must_use]
    pub fn root() -> Self {
        VertexIndex(Vec::new())
    }

    /// Number of components; equals the owning vertex's rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The first `r` components as a new index.
    ///
    /// # Panics
    /// Panics if `r` exceeds the rank.
    #[must_use]
    pub fn prefix(&self, r: usize) -> VertexIndex {
        VertexIndex(self.0[..r].to_vec())
    }

    /// Component at position `k`, if present.
    #[must_use]
    pub fn component(&self, k: usize) -> Option<usize> {
        self.0.get(k).copied()
    }

    /// The last component, if any.
    #[must_use]
    pub fn last(&self) -> Option<usize> {
        self.0.last().copied()
    }

    /// Extends this index with one trailing component.
    #[must_use]
    pub fn child(&self, k: usize) -> VertexIndex {
        let mut v = self.0.clone();
        v.push(k);
        VertexIndex(v)
    }

    /// True if `self` begins with every component of `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &VertexIndex) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Components as a slice.
    #[must_use]
    pub fn components(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for VertexIndex {
    fn from(components: Vec<usize>) -> Self {
        VertexIndex(components)
    }
}

impl<const N: usize> From<[usize; N]> for VertexIndex {
    fn from(components: [usize; N]) -> Self {
        VertexIndex(components.to_vec())
    }
}

impl fmt::Display for VertexIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

/// Erased type descriptor for a method port.
///
/// Artefacts are opaque to the engine; ports carry only a type name and
/// whether the port holds a single item or an array of items. Edge
/// validation compares descriptors according to the connection kind: a
/// scatter edge requires an array output feeding an item input of the same
/// element type, reduce and collect the reverse.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// A single value of the named type.
    Item(String),
    /// An array of values of the named element type.
    Array(String),
}

impl PortType {
    /// Convenience constructor for an item port.
    pub fn item(name: impl Into<String>) -> Self {
        PortType::Item(name.into())
    }

    /// Convenience constructor for an array port.
    pub fn array(name: impl Into<String>) -> Self {
        PortType::Array(name.into())
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, PortType::Array(_))
    }

    /// The element type name, regardless of array-ness.
    #[must_use]
    pub fn element(&self) -> &str {
        match self {
            PortType::Item(name) | PortType::Array(name) => name,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::Item(name) => write!(f, "{name}"),
            PortType::Array(name) => write!(f, "{name}[]"),
        }
    }
}
