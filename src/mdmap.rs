//! Persistent multi-dimensional map from index vectors to values.
//!
//! [`MdMap`] stores the slices of one vectorised vertex, keyed by
//! [`VertexIndex`]. It is persistent in the copy-on-write sense: cloning is
//! two `Arc` bumps, and every mutating operation returns a new map sharing
//! storage with its ancestor. That makes state snapshots handed to
//! observers immutable for free, the same way the engine's state snapshots
//! stay decoupled from the live state.
//!
//! Alongside the entries, the map records the *known shape* of the index
//! space as a tree of axis lengths: for a prefix of length `d`, the number
//! of slices along axis `d` under that prefix, as published by the upstream
//! scatter sources. The explicit record distinguishes a known-empty fanout
//! (length 0, a reduce over it yields an empty array) from an unknown one
//! (upstream has not produced its array yet).
//!
//! # Examples
//!
//! ```rust
//! use dataloom::mdmap::MdMap;
//! use dataloom::types::VertexIndex;
//!
//! let m: MdMap<&str> = MdMap::new(1)
//!     .add(VertexIndex::from([0]), "a")
//!     .add(VertexIndex::from([1]), "b");
//! let snapshot = m.clone();
//! let m = m.add(VertexIndex::from([2]), "c");
//! assert_eq!(m.len(), 3);
//! assert_eq!(snapshot.len(), 2); // unaffected by later additions
//! ```

use crate::types::VertexIndex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Persistent mapping from index vectors to values, with shape queries.
///
/// All keys have length [`rank`](Self::rank). Entries iterate in
/// lexicographic index order, and prefix queries are contiguous range scans.
#[derive(Clone, Debug)]
pub struct MdMap<T> {
    rank: usize,
    entries: Arc<BTreeMap<VertexIndex, T>>,
    dims: Arc<BTreeMap<VertexIndex, usize>>,
}

impl<T> MdMap<T> {
    /// An empty map whose keys will have length `rank`.
    #[must_use]
    pub fn new(rank: usize) -> Self {
        MdMap {
            rank,
            entries: Arc::new(BTreeMap::new()),
            dims: Arc::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The value at `index`, if present.
    #[must_use]
    pub fn find(&self, index: &VertexIndex) -> Option<&T> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn contains(&self, index: &VertexIndex) -> bool {
        self.entries.contains_key(index)
    }

    /// Entries in lexicographic index order.
    pub fn iter(&self) -> impl Iterator<Item = (&VertexIndex, &T)> {
        self.entries.iter()
    }

    /// Indices in lexicographic order.
    pub fn indices(&self) -> impl Iterator<Item = &VertexIndex> {
        self.entries.keys()
    }

    /// Entries whose index begins with `prefix`, in lexicographic order.
    pub fn starting_with<'a>(
        &'a self,
        prefix: &VertexIndex,
    ) -> Box<dyn Iterator<Item = (&'a VertexIndex, &'a T)> + 'a> {
        match prefix_bounds(prefix) {
            None => Box::new(self.entries.iter()),
            Some((start, end)) => Box::new(self.entries.range((start, end))),
        }
    }

    /// Known axis length under `prefix`: how many slices sit along axis
    /// `prefix.rank()` below it.
    ///
    /// `None` means the shape is not yet known (the upstream array has not
    /// been produced), which is different from a known length of zero.
    #[must_use]
    pub fn len_at(&self, prefix: &VertexIndex) -> Option<usize> {
        self.dims.get(prefix).copied()
    }

    /// Recorded shape entries, `prefix -> axis length`.
    pub fn shape(&self) -> impl Iterator<Item = (&VertexIndex, usize)> {
        self.dims.iter().map(|(k, v)| (k, *v))
    }

    /// The whole shape tree.
    #[must_use]
    pub fn shape_tree(&self) -> &BTreeMap<VertexIndex, usize> {
        &self.dims
    }
}

impl<T: Clone> MdMap<T> {
    /// A map with `value` bound at `index`.
    ///
    /// # Panics
    /// Panics if the index length differs from the map's rank.
    #[must_use]
    pub fn add(&self, index: VertexIndex, value: T) -> Self {
        assert_eq!(
            index.rank(),
            self.rank,
            "index rank {} does not match map rank {}",
            index.rank(),
            self.rank
        );
        let mut entries = (*self.entries).clone();
        entries.insert(index, value);
        MdMap {
            rank: self.rank,
            entries: Arc::new(entries),
            dims: Arc::clone(&self.dims),
        }
    }

    /// A map without the entry at `index`.
    #[must_use]
    pub fn remove(&self, index: &VertexIndex) -> Self {
        if !self.entries.contains_key(index) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.remove(index);
        MdMap {
            rank: self.rank,
            entries: Arc::new(entries),
            dims: Arc::clone(&self.dims),
        }
    }

    /// A map without any entry whose index begins with `prefix`, and with
    /// the shape record under that prefix forgotten.
    #[must_use]
    pub fn remove_starting_with(&self, prefix: &VertexIndex) -> Self {
        let mut entries = (*self.entries).clone();
        entries.retain(|k, _| !k.starts_with(prefix));
        let mut dims = (*self.dims).clone();
        dims.retain(|k, _| !k.starts_with(prefix));
        MdMap {
            rank: self.rank,
            entries: Arc::new(entries),
            dims: Arc::new(dims),
        }
    }

    /// A map recording that the axis under `prefix` has `n` slices.
    #[must_use]
    pub fn set_len(&self, prefix: VertexIndex, n: usize) -> Self {
        let mut dims = (*self.dims).clone();
        dims.insert(prefix, n);
        MdMap {
            rank: self.rank,
            entries: Arc::clone(&self.entries),
            dims: Arc::new(dims),
        }
    }

    /// A map whose shape tree is replaced wholesale.
    #[must_use]
    pub fn with_shape(&self, shape: BTreeMap<VertexIndex, usize>) -> Self {
        MdMap {
            rank: self.rank,
            entries: Arc::clone(&self.entries),
            dims: Arc::new(shape),
        }
    }

    /// A map with the shape record under `prefix` forgotten.
    #[must_use]
    pub fn clear_len(&self, prefix: &VertexIndex) -> Self {
        if !self.dims.contains_key(prefix) {
            return self.clone();
        }
        let mut dims = (*self.dims).clone();
        dims.remove(prefix);
        MdMap {
            rank: self.rank,
            entries: Arc::clone(&self.entries),
            dims: Arc::new(dims),
        }
    }

    /// Element-wise structural fold into a map of the same rank and shape.
    #[must_use]
    pub fn map<U: Clone>(&self, mut f: impl FnMut(&VertexIndex, &T) -> U) -> MdMap<U> {
        let entries: BTreeMap<VertexIndex, U> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), f(k, v)))
            .collect();
        MdMap {
            rank: self.rank,
            entries: Arc::new(entries),
            dims: Arc::clone(&self.dims),
        }
    }
}

impl<T: PartialEq> PartialEq for MdMap<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.entries == other.entries && self.dims == other.dims
    }
}

impl<T: Eq> Eq for MdMap<T> {}

fn prefix_bounds(prefix: &VertexIndex) -> Option<(Bound<VertexIndex>, Bound<VertexIndex>)> {
    if prefix.is_root() {
        return None;
    }
    let mut end = prefix.components().to_vec();
    *end.last_mut().expect("non-root prefix") += 1;
    Some((
        Bound::Included(prefix.clone()),
        Bound::Excluded(VertexIndex::from(end)),
    ))
}
