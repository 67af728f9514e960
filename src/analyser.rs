//! Change analyser: translates a transition's change set into runtime
//! actions.
//!
//! This is a pure function over the change set. Per slice, the old and new
//! statuses decide what the runtime should do:
//!
//! - entering `CanStart` (or re-entering it at a new time) debounces and
//!   then posts a start message — [`Action::Delay`];
//! - entering `Started`, or resuming a checkpointed iteration, runs the
//!   method — [`Action::Execute`];
//! - `CompleteStarted` with a checkpoint but partial outputs invokes the
//!   method's reproduce entry point — [`Action::Reproduce`];
//! - leaving a running status with nothing new scheduled cancels the
//!   in-flight worker — [`Action::StopMethod`];
//! - a removed vertex cancels everything it owns — [`Action::Remove`].
//!
//! Action order is deterministic: vertices by identity, slices by index.

use crate::artefact::Checkpoint;
use crate::machine::{StateChanges, VertexChanges};
use crate::method::MethodVertex;
use crate::state::{VertexState, VertexStatus};
use crate::types::{TimeIndex, VertexIndex};

/// Imperative directive for the runtime.
#[derive(Clone, Debug)]
pub enum Action {
    /// Debounce, then post a start message for the slice scheduled at
    /// `time`.
    Delay {
        vertex: MethodVertex,
        index: VertexIndex,
        time: TimeIndex,
    },
    /// Run the slice's method now. `checkpoint` is set when resuming a
    /// suspended iteration.
    Execute {
        vertex: MethodVertex,
        index: VertexIndex,
        time: TimeIndex,
        checkpoint: Option<Checkpoint>,
    },
    /// Restore lost outputs through the method's reproduce entry point.
    Reproduce {
        vertex: MethodVertex,
        index: VertexIndex,
        time: TimeIndex,
        checkpoint: Checkpoint,
    },
    /// Cancel the slice's in-flight worker.
    StopMethod {
        vertex: MethodVertex,
        index: VertexIndex,
    },
    /// Cancel every worker of a removed vertex.
    Remove { vertex: MethodVertex },
}

/// Maps one change set to the runtime actions it requires.
#[must_use]
pub fn analyse(changes: &StateChanges) -> Vec<Action> {
    let mut by_vertex: Vec<(&MethodVertex, &VertexChanges)> = changes.iter().collect();
    by_vertex.sort_by_key(|(v, _)| v.id());

    let mut actions = Vec::new();
    for (vertex, change) in by_vertex {
        match change {
            VertexChanges::Removed => actions.push(Action::Remove {
                vertex: vertex.clone(),
            }),
            VertexChanges::New(map) => {
                for (index, state) in map.iter() {
                    slice_actions(vertex, index, None, state, &mut actions);
                }
            }
            VertexChanges::ShapeChanged { old, new, .. } => {
                for (index, state) in new.iter() {
                    slice_actions(vertex, index, old.find(index), state, &mut actions);
                }
                // Slices that fell out of the index space lose their
                // workers.
                for (index, state) in old.iter() {
                    if state.status.is_running() && !new.contains(index) {
                        actions.push(Action::StopMethod {
                            vertex: vertex.clone(),
                            index: index.clone(),
                        });
                    }
                }
            }
            VertexChanges::Modified {
                indices, old, new, ..
            } => {
                for index in indices {
                    if let Some(state) = new.find(index) {
                        slice_actions(vertex, index, old.find(index), state, &mut actions);
                    }
                }
            }
        }
    }
    actions
}

fn slice_actions(
    vertex: &MethodVertex,
    index: &VertexIndex,
    old: Option<&VertexState>,
    new: &VertexState,
    actions: &mut Vec<Action>,
) {
    let old_status = old.map(|s| &s.status);
    let mut scheduled = false;

    match &new.status {
        VertexStatus::CanStart(t) => {
            if old_status.and_then(|s| s.can_start_time()) != Some(*t) {
                actions.push(Action::Delay {
                    vertex: vertex.clone(),
                    index: index.clone(),
                    time: *t,
                });
                scheduled = true;
            }
        }
        VertexStatus::Started(t) => {
            if old_status != Some(&VertexStatus::Started(*t)) {
                actions.push(Action::Execute {
                    vertex: vertex.clone(),
                    index: index.clone(),
                    time: *t,
                    checkpoint: None,
                });
                scheduled = true;
            }
        }
        VertexStatus::Continues { time, .. } => {
            // A worker already drives this slice if the old status was the
            // same run; anything else is a resumption from a checkpoint.
            let same_run = matches!(
                old_status,
                Some(VertexStatus::Started(t)
                    | VertexStatus::Continues { time: t, .. }
                    | VertexStatus::CompleteStarted(t)) if t == time
            );
            if !same_run && old_status != Some(&new.status) {
                actions.push(Action::Execute {
                    vertex: vertex.clone(),
                    index: index.clone(),
                    time: *time,
                    checkpoint: new.data.as_ref().and_then(|d| d.checkpoint.clone()),
                });
                scheduled = true;
            } else {
                scheduled = same_run;
            }
        }
        VertexStatus::CompleteStarted(t) => {
            if old_status != Some(&VertexStatus::CompleteStarted(*t)) {
                let reproducible = new
                    .data
                    .as_ref()
                    .filter(|d| d.output.is_partial())
                    .and_then(|d| d.checkpoint.clone());
                match reproducible {
                    Some(checkpoint) => actions.push(Action::Reproduce {
                        vertex: vertex.clone(),
                        index: index.clone(),
                        time: *t,
                        checkpoint,
                    }),
                    None => actions.push(Action::Execute {
                        vertex: vertex.clone(),
                        index: index.clone(),
                        time: *t,
                        checkpoint: None,
                    }),
                }
                scheduled = true;
            }
        }
        _ => {}
    }

    let was_running = old.is_some_and(|s| s.status.is_running());
    if was_running && !new.status.is_running() && !scheduled {
        actions.push(Action::StopMethod {
            vertex: vertex.clone(),
            index: index.clone(),
        });
    }
}
