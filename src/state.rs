//! Vertex state lattice and the engine's immutable state snapshot.
//!
//! Each slice of each vertex carries a [`VertexStatus`] describing where it
//! sits in its lifecycle, plus optional [`MethodVertexData`] holding the
//! artefacts it has produced and the checkpoint that reproduces them. The
//! whole picture — graph, per-vertex slice maps, and the logical clock —
//! is the [`DataflowState`] snapshot emitted to observers on every
//! transition.
//!
//! Statuses that represent scheduled or in-flight work reference the
//! logical time at which they were entered; the state machine uses those
//! times to drop stale worker messages (see
//! [`TimeIndex`](crate::types::TimeIndex)).

use crate::artefact::{Checkpoint, OutputSlots};
use crate::graphs::FlowGraph;
use crate::mdmap::MdMap;
use crate::method::MethodVertex;
use crate::types::{TimeIndex, VertexIndex};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure record stored when a slice ends in `ExecutionFailed`.
///
/// Carries the failure message, an optional chained cause, and the wall
/// clock time at which the failure was observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    pub cause: Option<Box<ExecutionError>>,
    pub when: DateTime<Utc>,
}

impl ExecutionError {
    pub fn msg(message: impl Into<String>) -> Self {
        ExecutionError {
            message: message.into(),
            cause: None,
            when: Utc::now(),
        }
    }

    #[must_use]
    pub fn caused_by(mut self, cause: ExecutionError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// Why a slice is not (or no longer) able to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncompleteReason {
    /// One or more inputs have never been produced or connected.
    UnassignedInputs,
    /// Inputs were available before but have changed or disappeared.
    OutdatedInputs,
    /// The method raised an error; never retried automatically.
    ExecutionFailed(ExecutionError),
    /// Cancelled on user request; stable until inputs change.
    Stopped,
    /// An upstream output is partial and cannot be reproduced.
    TransientInputs,
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompleteReason::UnassignedInputs => write!(f, "unassigned inputs"),
            IncompleteReason::OutdatedInputs => write!(f, "outdated inputs"),
            IncompleteReason::ExecutionFailed(e) => write!(f, "execution failed: {e}"),
            IncompleteReason::Stopped => write!(f, "stopped"),
            IncompleteReason::TransientInputs => write!(f, "transient inputs"),
        }
    }
}

/// Lifecycle status of one slice.
///
/// The payloads of `Complete`, `Continues` and `CompleteStarted` — output
/// artefacts and checkpoint — live in the slice's
/// [`MethodVertexData`], not in the status itself, so that restored states
/// can be reclassified without reconstructing statuses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VertexStatus {
    /// Not runnable; see the reason.
    Incomplete(IncompleteReason),
    /// All inputs available and consistent; scheduled to begin at the given
    /// logical time.
    CanStart(TimeIndex),
    /// Execution in flight since the given start time.
    Started(TimeIndex),
    /// An iterative method has emitted `iteration` checkpoints; the last
    /// output is available in the slice data.
    Continues { iteration: u32, time: TimeIndex },
    /// Terminal success; outputs (and checkpoint, when resumable) are in
    /// the slice data.
    Complete,
    /// Transient re-execution in flight to restore lost outputs.
    CompleteStarted(TimeIndex),
    /// Started work suspended on user request.
    Paused,
    /// Iteration suspended on user request; data of completed iterations is
    /// kept for resumption.
    PausedContinues { iteration: u32 },
    /// Ready to start but parked because an upstream slice is paused.
    PausedInherited,
}

impl VertexStatus {
    /// A fresh, never-run slice.
    #[must_use]
    pub fn unassigned() -> Self {
        VertexStatus::Incomplete(IncompleteReason::UnassignedInputs)
    }

    /// True while a worker may be executing on behalf of this slice.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            VertexStatus::Started(_)
                | VertexStatus::Continues { .. }
                | VertexStatus::CompleteStarted(_)
        )
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            VertexStatus::Paused
                | VertexStatus::PausedContinues { .. }
                | VertexStatus::PausedInherited
        )
    }

    /// The start time an in-flight worker message must match.
    #[must_use]
    pub fn start_time(&self) -> Option<TimeIndex> {
        match self {
            VertexStatus::Started(t)
            | VertexStatus::Continues { time: t, .. }
            | VertexStatus::CompleteStarted(t) => Some(*t),
            _ => None,
        }
    }

    /// The scheduled time if this slice is `CanStart`.
    #[must_use]
    pub fn can_start_time(&self) -> Option<TimeIndex> {
        match self {
            VertexStatus::CanStart(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for VertexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexStatus::Incomplete(reason) => write!(f, "incomplete({reason})"),
            VertexStatus::CanStart(t) => write!(f, "can-start({t})"),
            VertexStatus::Started(t) => write!(f, "started({t})"),
            VertexStatus::Continues { iteration, time } => {
                write!(f, "continues({iteration}, {time})")
            }
            VertexStatus::Complete => write!(f, "complete"),
            VertexStatus::CompleteStarted(t) => write!(f, "complete-started({t})"),
            VertexStatus::Paused => write!(f, "paused"),
            VertexStatus::PausedContinues { iteration } => {
                write!(f, "paused-continues({iteration})")
            }
            VertexStatus::PausedInherited => write!(f, "paused-inherited"),
        }
    }
}

/// Artefacts a slice has produced, plus the checkpoint that reproduces
/// them.
///
/// `output` may be partial after restoring persisted state whose payloads
/// were dropped; with a checkpoint present such a slice classifies as
/// `CompleteStarted` and takes the reproduce path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodVertexData {
    pub output: OutputSlots,
    pub checkpoint: Option<Checkpoint>,
}

impl MethodVertexData {
    pub fn new(output: OutputSlots, checkpoint: Option<Checkpoint>) -> Self {
        MethodVertexData { output, checkpoint }
    }
}

/// State of one slice: status plus whatever it has produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexState {
    pub status: VertexStatus,
    pub data: Option<MethodVertexData>,
}

impl VertexState {
    /// A fresh slice with unassigned inputs and no data.
    #[must_use]
    pub fn unassigned() -> Self {
        VertexState {
            status: VertexStatus::unassigned(),
            data: None,
        }
    }

    /// A completed slice carrying `data`, as used for restore scenarios.
    #[must_use]
    pub fn complete(data: MethodVertexData) -> Self {
        VertexState {
            status: VertexStatus::Complete,
            data: Some(data),
        }
    }

    /// Same slice with a different status.
    #[must_use]
    pub fn with_status(&self, status: VertexStatus) -> Self {
        VertexState {
            status,
            data: self.data.clone(),
        }
    }

    /// The artefact at `output_ref`, if produced.
    #[must_use]
    pub fn output(&self, output_ref: usize) -> Option<&crate::artefact::Artefact> {
        self.data.as_ref().and_then(|d| d.output.get(output_ref))
    }
}

/// Per-vertex slice maps; the mutable heart of the engine state.
pub type FlowState = FxHashMap<MethodVertex, MdMap<VertexState>>;

/// Immutable snapshot of the whole engine state.
///
/// Cloning is cheap: the graph shares its vertices, the slice maps are
/// persistent, and artefacts are reference-counted.
#[derive(Clone, Debug)]
pub struct DataflowState {
    pub graph: FlowGraph,
    pub flow: FlowState,
    pub time: TimeIndex,
}

impl DataflowState {
    /// State of one slice, if the vertex and index exist.
    #[must_use]
    pub fn vertex_state(&self, vertex: &MethodVertex, index: &VertexIndex) -> Option<&VertexState> {
        self.flow.get(vertex).and_then(|m| m.find(index))
    }

    /// Status of one slice, if present.
    #[must_use]
    pub fn status(&self, vertex: &MethodVertex, index: &VertexIndex) -> Option<&VertexStatus> {
        self.vertex_state(vertex, index).map(|s| &s.status)
    }

    /// All slices of one vertex.
    #[must_use]
    pub fn slices(&self, vertex: &MethodVertex) -> Option<&MdMap<VertexState>> {
        self.flow.get(vertex)
    }
}
