//! Change sets emitted by the state machine.
//!
//! Every transition yields one [`StateChanges`] mapping describing, per
//! vertex, what the transition did to its slice map. The change analyser
//! turns these into runtime actions; observers receive them verbatim
//! together with the state snapshot.

use crate::mdmap::MdMap;
use crate::method::MethodVertex;
use crate::state::VertexState;
use crate::types::VertexIndex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// What one transition did to one vertex.
#[derive(Clone, Debug)]
pub enum VertexChanges {
    /// The vertex appeared (graph merge or engine start).
    New(MdMap<VertexState>),
    /// The vertex left the graph; all its slices are gone.
    Removed,
    /// The slice index space itself changed: slices appeared or vanished,
    /// or the known shape tree moved.
    ShapeChanged {
        old: MdMap<VertexState>,
        new: MdMap<VertexState>,
        connection_changed: bool,
    },
    /// Same index space, but the listed slices changed status or data.
    Modified {
        indices: BTreeSet<VertexIndex>,
        old: MdMap<VertexState>,
        new: MdMap<VertexState>,
        connection_changed: bool,
    },
}

/// Per-vertex changes of one transition.
pub type StateChanges = FxHashMap<MethodVertex, VertexChanges>;

impl VertexChanges {
    /// Classifies the difference between a vertex's slice map before and
    /// after a transition. `None` means nothing observable happened.
    pub(crate) fn classify(
        old: Option<&MdMap<VertexState>>,
        new: Option<&MdMap<VertexState>>,
        connection_changed: bool,
    ) -> Option<VertexChanges> {
        match (old, new) {
            (None, None) => None,
            (None, Some(map)) => {
                if map.is_empty() && !connection_changed {
                    None
                } else {
                    Some(VertexChanges::New(map.clone()))
                }
            }
            (Some(_), None) => Some(VertexChanges::Removed),
            (Some(before), Some(after)) => {
                if before == after {
                    return if connection_changed {
                        Some(VertexChanges::Modified {
                            indices: BTreeSet::new(),
                            old: before.clone(),
                            new: after.clone(),
                            connection_changed: true,
                        })
                    } else {
                        None
                    };
                }
                let same_space = before.indices().eq(after.indices())
                    && before.shape().eq(after.shape());
                if same_space {
                    let indices: BTreeSet<VertexIndex> = after
                        .iter()
                        .filter(|(i, state)| before.find(i) != Some(state))
                        .map(|(i, _)| i.clone())
                        .collect();
                    Some(VertexChanges::Modified {
                        indices,
                        old: before.clone(),
                        new: after.clone(),
                        connection_changed,
                    })
                } else {
                    Some(VertexChanges::ShapeChanged {
                        old: before.clone(),
                        new: after.clone(),
                        connection_changed,
                    })
                }
            }
        }
    }
}
