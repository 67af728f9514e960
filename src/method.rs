//! Method contract and execution context.
//!
//! A [`Method`] is the unit of user computation placed on a graph vertex:
//! it declares erased port descriptors for edge validation, produces a lazy
//! sequence of checkpointed iterations when executed, and can reproduce the
//! outputs of a past checkpoint bit-identically. [`MethodVertex`] wraps a
//! method with a stable identity so it can serve as a map key and appear in
//! several places of a graph.
//!
//! Methods never touch engine state. They communicate exclusively through
//! their returned stream and the [`MethodContext`] handed to each
//! invocation, which carries the cooperative cancellation token and the
//! progress reporter.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use dataloom::artefact::Artefact;
//! use dataloom::method::{Method, MethodContext, MethodIteration, MethodStream};
//! use dataloom::types::PortType;
//! use futures_util::{stream, StreamExt};
//!
//! /// Doubles its single integer input in one iteration.
//! struct Doubler;
//!
//! #[async_trait]
//! impl Method for Doubler {
//!     fn inputs(&self) -> Vec<PortType> {
//!         vec![PortType::item("i64")]
//!     }
//!
//!     fn outputs(&self) -> Vec<PortType> {
//!         vec![PortType::item("i64")]
//!     }
//!
//!     fn execute(
//!         &self,
//!         inputs: Vec<Artefact>,
//!         _checkpoint: Option<dataloom::artefact::Checkpoint>,
//!         _ctx: MethodContext,
//!     ) -> MethodStream {
//!         let n = inputs[0].value().as_i64().unwrap_or(0);
//!         stream::iter(vec![Ok(MethodIteration::new(vec![Artefact::new(n * 2)]))]).boxed()
//!     }
//! }
//! ```

use crate::artefact::{Artefact, Checkpoint};
use crate::types::{PortType, TimeIndex, VertexIndex};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use miette::Diagnostic;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One element of a method's lazy output sequence: a full output tuple plus
/// the checkpoint that reproduces it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodIteration {
    /// One artefact per declared output port.
    pub outputs: Vec<Artefact>,
    /// Method-defined state sufficient to resume from or reproduce this
    /// iteration. `None` for methods that are not resumable.
    pub checkpoint: Option<Checkpoint>,
}

impl MethodIteration {
    pub fn new(outputs: Vec<Artefact>) -> Self {
        MethodIteration {
            outputs,
            checkpoint: None,
        }
    }

    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }
}

/// The lazy sequence returned by [`Method::execute`].
///
/// The runtime forwards each `Ok` element as an iteration message, treats
/// the end of the stream as successful completion, and converts an `Err`
/// element into an execution failure.
pub type MethodStream = BoxStream<'static, Result<MethodIteration, MethodError>>;

/// Errors that can occur when using [`MethodContext`].
#[derive(Debug, Error, Diagnostic)]
pub enum MethodContextError {
    /// Progress update could not be delivered; the engine side has shut
    /// down or the pump is gone.
    #[error("failed to report progress: progress channel unavailable")]
    #[diagnostic(
        code(dataloom::method::progress_unavailable),
        help("The engine may have been shut down while this method was running.")
    )]
    ProgressUnavailable,
}

/// Errors raised by method implementations.
///
/// These surface in the vertex status as `Incomplete(ExecutionFailed)`;
/// they never abort the engine.
#[derive(Debug, Error, Diagnostic)]
pub enum MethodError {
    /// An expected input artefact was absent or had the wrong shape.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(dataloom::method::missing_input),
        help("Check the graph wiring and the upstream method's outputs.")
    )]
    MissingInput { what: &'static str },

    /// An input artefact could not be interpreted as the expected value.
    #[error("invalid artefact: {what}")]
    #[diagnostic(code(dataloom::method::invalid_artefact))]
    InvalidArtefact { what: String },

    /// General execution failure inside the method body.
    #[error("method execution failed: {message}")]
    #[diagnostic(code(dataloom::method::execution))]
    Execution { message: String },

    /// JSON conversion error while packing or unpacking artefacts.
    #[error(transparent)]
    #[diagnostic(code(dataloom::method::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Progress reporting failed.
    #[error(transparent)]
    #[diagnostic(code(dataloom::method::context))]
    Context(#[from] MethodContextError),
}

impl MethodError {
    pub fn execution(message: impl Into<String>) -> Self {
        MethodError::Execution {
            message: message.into(),
        }
    }
}

/// Progress report published by a running slice.
#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub vertex: MethodVertex,
    pub index: VertexIndex,
    /// Fraction of work done, clamped to `[0, 1]`.
    pub fraction: f64,
}

/// Execution context passed to methods for one slice invocation.
///
/// The context identifies the slice being computed and carries the two
/// channels a method may use while running: cooperative cancellation and
/// progress reporting. Iterative methods should check
/// [`is_cancelled`](Self::is_cancelled) between expensive steps; the
/// runtime checks it between yields regardless.
#[derive(Clone)]
pub struct MethodContext {
    vertex: MethodVertex,
    index: VertexIndex,
    start_time: TimeIndex,
    cancellation: CancellationToken,
    progress: flume::Sender<ProgressUpdate>,
}

impl MethodContext {
    pub(crate) fn new(
        vertex: MethodVertex,
        index: VertexIndex,
        start_time: TimeIndex,
        cancellation: CancellationToken,
        progress: flume::Sender<ProgressUpdate>,
    ) -> Self {
        MethodContext {
            vertex,
            index,
            start_time,
            cancellation,
            progress,
        }
    }

    /// The vertex this invocation computes.
    #[must_use]
    pub fn vertex(&self) -> &MethodVertex {
        &self.vertex
    }

    /// The slice index this invocation computes.
    #[must_use]
    pub fn index(&self) -> &VertexIndex {
        &self.index
    }

    /// Logical start time of this invocation; results are filtered against
    /// it, so a restarted slice silently discards the old run's messages.
    #[must_use]
    pub fn start_time(&self) -> TimeIndex {
        self.start_time
    }

    /// The cooperative cancellation token for this invocation.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Publishes a progress fraction for this slice.
    ///
    /// Values are clamped to `[0, 1]`. NaN is reported as `0`.
    pub fn report_progress(&self, fraction: f64) -> Result<(), MethodContextError> {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.progress
            .send(ProgressUpdate {
                vertex: self.vertex.clone(),
                index: self.index.clone(),
                fraction,
            })
            .map_err(|_| MethodContextError::ProgressUnavailable)
    }
}

impl fmt::Debug for MethodContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodContext")
            .field("vertex", &self.vertex)
            .field("index", &self.index)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

/// Core trait for user computations placed on graph vertices.
///
/// # Contract
///
/// - `execute` must yield at least one iteration, must be deterministic
///   given `(inputs, checkpoint)`, and should honour the context's
///   cancellation token between yields.
/// - `reproduce` must return exactly the outputs `execute` produced when it
///   emitted `checkpoint`, structurally identical.
/// - Port descriptor lists are fixed for the lifetime of the method; the
///   graph validates edges against them.
#[async_trait]
pub trait Method: Send + Sync {
    /// Ordered input port descriptors.
    fn inputs(&self) -> Vec<PortType>;

    /// Ordered output port descriptors.
    fn outputs(&self) -> Vec<PortType>;

    /// Begins (or resumes, when `checkpoint` is given) the computation,
    /// returning the lazy sequence of checkpointed iterations.
    fn execute(
        &self,
        inputs: Vec<Artefact>,
        checkpoint: Option<Checkpoint>,
        ctx: MethodContext,
    ) -> MethodStream;

    /// Restores the outputs that `execute` produced at `checkpoint`.
    ///
    /// The default implementation refuses; methods whose outputs may be
    /// dropped from persisted state must override it.
    async fn reproduce(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Checkpoint,
        _ctx: MethodContext,
    ) -> Result<Vec<Artefact>, MethodError> {
        Err(MethodError::execution("method does not support reproduce"))
    }
}

/// Process-wide stable identity for a [`MethodVertex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(u64);

impl VertexId {
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

static NEXT_VERTEX_ID: AtomicU64 = AtomicU64::new(1);

/// A graph vertex: a method plus a stable identity.
///
/// Two vertices compare equal only if they are the same construction, even
/// when they share a method implementation; the same method can therefore
/// appear at several places in a graph. Identity is assigned once at
/// construction and gives vertices the total equality, ordering and hashing
/// required of map keys. Cloning shares the identity.
#[derive(Clone)]
pub struct MethodVertex {
    id: VertexId,
    label: Arc<str>,
    method: Arc<dyn Method>,
}

impl MethodVertex {
    /// Wraps `method` in a fresh vertex identity.
    pub fn new(label: impl Into<String>, method: impl Method + 'static) -> Self {
        Self::from_arc(label, Arc::new(method))
    }

    /// As [`new`](Self::new), for an already shared method.
    pub fn from_arc(label: impl Into<String>, method: Arc<dyn Method>) -> Self {
        MethodVertex {
            id: VertexId(NEXT_VERTEX_ID.fetch_add(1, Ordering::Relaxed)),
            label: Arc::from(label.into()),
            method,
        }
    }

    #[must_use]
    pub fn id(&self) -> VertexId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn method(&self) -> &Arc<dyn Method> {
        &self.method
    }
}

impl PartialEq for MethodVertex {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MethodVertex {}

impl std::hash::Hash for MethodVertex {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for MethodVertex {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MethodVertex {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for MethodVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

impl fmt::Display for MethodVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    struct Unit;

    #[async_trait]
    impl Method for Unit {
        fn inputs(&self) -> Vec<PortType> {
            vec![]
        }

        fn outputs(&self) -> Vec<PortType> {
            vec![PortType::item("unit")]
        }

        fn execute(
            &self,
            _inputs: Vec<Artefact>,
            _checkpoint: Option<Checkpoint>,
            _ctx: MethodContext,
        ) -> MethodStream {
            futures_util::stream::iter(vec![Ok(MethodIteration::new(vec![Artefact::new(
                serde_json::json!(null),
            )]))])
            .boxed()
        }
    }

    fn ctx_for(vertex: &MethodVertex) -> (MethodContext, flume::Receiver<ProgressUpdate>) {
        let (tx, rx) = flume::unbounded();
        (
            MethodContext::new(
                vertex.clone(),
                VertexIndex::root(),
                TimeIndex::ZERO,
                CancellationToken::new(),
                tx,
            ),
            rx,
        )
    }

    #[test]
    fn vertex_identity_is_per_construction() {
        let shared: Arc<dyn Method> = Arc::new(Unit);
        let a = MethodVertex::from_arc("a", Arc::clone(&shared));
        let b = MethodVertex::from_arc("b", shared);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(a.id() < b.id());
    }

    #[test]
    fn progress_is_clamped() {
        let v = MethodVertex::new("unit", Unit);
        let (ctx, rx) = ctx_for(&v);
        ctx.report_progress(2.5).unwrap();
        ctx.report_progress(-1.0).unwrap();
        ctx.report_progress(f64::NAN).unwrap();
        let got: Vec<f64> = rx.drain().map(|p| p.fraction).collect();
        assert_eq!(got, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn progress_fails_when_receiver_dropped() {
        let v = MethodVertex::new("unit", Unit);
        let (ctx, rx) = ctx_for(&v);
        drop(rx);
        assert!(ctx.report_progress(0.5).is_err());
    }
}
