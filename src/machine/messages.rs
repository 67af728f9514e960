//! Messages consumed by the state machine.
//!
//! External alterations and internal worker results enter through a single
//! message channel, which is what serialises graph mutation with execution
//! feedback. Worker messages carry the start time of the run that produced
//! them; the machine drops any whose time no longer matches the slice.

use crate::graphs::{AlterError, Edge, FlowGraph};
use crate::method::{MethodIteration, MethodVertex};
use crate::state::ExecutionError;
use crate::types::{TimeIndex, VertexIndex};
use tokio::sync::oneshot;

/// An atomic graph mutation batch.
///
/// Fields are applied in order: disconnect, remove, merge, connect; then
/// downstream statuses are recomputed. A rejected batch leaves the state
/// untouched and resolves the reply with the error.
#[derive(Debug, Default)]
pub struct AlterRequest {
    pub disconnect: Vec<Edge>,
    pub remove: Vec<MethodVertex>,
    pub merge: Option<FlowGraph>,
    pub connect: Vec<Edge>,
    pub(crate) reply: Option<oneshot::Sender<Result<(), AlterError>>>,
}

impl AlterRequest {
    #[must_use]
    pub fn new() -> Self {
        AlterRequest::default()
    }

    #[must_use]
    pub fn disconnect(mut self, edge: Edge) -> Self {
        self.disconnect.push(edge);
        self
    }

    #[must_use]
    pub fn remove(mut self, vertex: MethodVertex) -> Self {
        self.remove.push(vertex);
        self
    }

    #[must_use]
    pub fn merge(mut self, graph: FlowGraph) -> Self {
        self.merge = Some(graph);
        self
    }

    #[must_use]
    pub fn connect(mut self, edge: Edge) -> Self {
        self.connect.push(edge);
        self
    }

    pub(crate) fn with_reply(
        mut self,
        reply: oneshot::Sender<Result<(), AlterError>>,
    ) -> Self {
        self.reply = Some(reply);
        self
    }

    pub(crate) fn take_reply(&mut self) -> Option<oneshot::Sender<Result<(), AlterError>>> {
        self.reply.take()
    }
}

/// Terminal result delivered by a worker.
#[derive(Clone, Debug)]
pub enum SuccessResult {
    /// The run finished with this final output tuple (single-shot methods
    /// and the reproduce path).
    IterationResult(MethodIteration),
    /// The iteration stream ended; the last published iteration stands as
    /// the terminal output.
    NoMoreIterations,
}

/// Input to one state machine transition.
#[derive(Debug)]
pub enum Message {
    /// Atomic graph mutation batch.
    Alter(AlterRequest),
    /// Move matching `CanStart` slices to `Started`. With `index` absent,
    /// every `CanStart` slice of the vertex starts. A stale
    /// `can_start_time` drops the message.
    Start {
        vertex: MethodVertex,
        index: Option<VertexIndex>,
        can_start_time: Option<TimeIndex>,
    },
    /// An iterative run published a checkpointed output tuple.
    Iteration {
        vertex: MethodVertex,
        index: VertexIndex,
        result: MethodIteration,
        start_time: TimeIndex,
    },
    /// A run finished successfully.
    Succeeded {
        vertex: MethodVertex,
        index: VertexIndex,
        start_time: TimeIndex,
        result: SuccessResult,
    },
    /// A run raised an error.
    Failed {
        vertex: MethodVertex,
        index: VertexIndex,
        start_time: TimeIndex,
        failure: ExecutionError,
    },
    /// User-requested cancellation of in-flight work.
    Stop {
        vertex: MethodVertex,
        index: Option<VertexIndex>,
    },
    /// Suspend in-flight iteration, keeping completed iterations' data.
    Pause {
        vertex: MethodVertex,
        index: Option<VertexIndex>,
    },
    /// Lift a previous pause; resumable slices re-execute from their last
    /// checkpoint.
    Resume {
        vertex: MethodVertex,
        index: Option<VertexIndex>,
    },
}
