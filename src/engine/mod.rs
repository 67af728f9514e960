//! Engine façade: wires the state machine, analyser and runtime together.
//!
//! ```text
//! alter_async ──┐                               ┌─► state watch
//!               ▼                               ├─► (state, changes) hub
//!   message channel ─► StateMachine ─► analyse ─┤
//!               ▲                               └─► Runtime ─► Scheduler ─► workers
//!               └──────────── worker messages ◄─────────────────┘
//! ```
//!
//! One pump task serialises everything: external alterations and worker
//! results enter through a single channel, each message becomes one atomic
//! transition, and every transition is published to observers before its
//! actions are performed. Workers only ever post messages; they never see
//! engine state.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dataloom::engine::Engine;
//! use dataloom::graphs::FlowGraph;
//! use dataloom::runtimes::EngineConfig;
//! use rustc_hash::FxHashMap;
//!
//! # async fn example(graph: FlowGraph) {
//! let engine = Engine::new(graph, FxHashMap::default(), EngineConfig::default());
//! let mut changes = engine.changes();
//! engine.start().expect("first start");
//! while let Some(event) = changes.recv().await {
//!     let (state, _changes) = &*event;
//!     println!("time is now {}", state.time);
//! }
//! # }
//! ```

pub mod hub;

pub use hub::{Hub, HubStream};

use crate::analyser::analyse;
use crate::graphs::{AlterError, FlowGraph};
use crate::machine::{AlterRequest, Message, StateChanges, StateMachine};
use crate::method::{MethodVertex, ProgressUpdate};
use crate::runtimes::{EngineConfig, Runtime};
use crate::schedulers::{Scheduler, WorkerPool};
use crate::state::{DataflowState, FlowState};
use crate::types::VertexIndex;
use miette::Diagnostic;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// One `(state, changes)` emission, shared cheaply between subscribers.
pub type ChangesEvent = Arc<(DataflowState, StateChanges)>;

/// Errors raised by the engine façade itself.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// `start` was called more than once.
    #[error("engine already started")]
    #[diagnostic(code(dataloom::engine::already_started))]
    AlreadyStarted,

    /// The engine has shut down; no further messages are accepted.
    #[error("engine is closed")]
    #[diagnostic(code(dataloom::engine::closed))]
    Closed,
}

struct PumpParts {
    machine: StateMachine,
    runtime: Runtime,
    messages_rx: flume::Receiver<Message>,
    progress_rx: flume::Receiver<ProgressUpdate>,
    state_tx: watch::Sender<DataflowState>,
}

/// The dataflow execution engine.
///
/// Created suspended over a graph and a (possibly restored) flow state;
/// [`start`](Engine::start) activates the machine and begins executing.
/// Messages posted before `start` queue up and are applied in order once
/// the engine is running.
pub struct Engine {
    messages: flume::Sender<Message>,
    state_rx: watch::Receiver<DataflowState>,
    changes_hub: Arc<Hub<ChangesEvent>>,
    progress_hub: Arc<Hub<ProgressUpdate>>,
    shutdown: CancellationToken,
    pending: Mutex<Option<PumpParts>>,
}

impl Engine {
    /// An engine over the default bounded worker pool.
    #[must_use]
    pub fn new(graph: FlowGraph, initial_flow: FlowState, config: EngineConfig) -> Self {
        let pool = match config.concurrency {
            Some(limit) => WorkerPool::new(limit),
            None => WorkerPool::with_available_parallelism(),
        };
        Self::with_scheduler(graph, initial_flow, Arc::new(pool), config)
    }

    /// An engine over a caller-provided scheduler.
    #[must_use]
    pub fn with_scheduler(
        graph: FlowGraph,
        initial_flow: FlowState,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
    ) -> Self {
        let machine = StateMachine::new(graph, initial_flow);
        let (messages_tx, messages_rx) = flume::unbounded();
        let (progress_tx, progress_rx) = flume::unbounded();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let runtime = Runtime::new(scheduler, messages_tx.clone(), progress_tx, config.delay);
        Engine {
            messages: messages_tx,
            state_rx,
            changes_hub: Hub::new(config.changes_capacity),
            progress_hub: Hub::new(config.progress_capacity),
            shutdown: CancellationToken::new(),
            pending: Mutex::new(Some(PumpParts {
                machine,
                runtime,
                messages_rx,
                progress_rx,
                state_tx,
            })),
        }
    }

    /// Current immutable state snapshot.
    #[must_use]
    pub fn state(&self) -> DataflowState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel carrying the latest state snapshot.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<DataflowState> {
        self.state_rx.clone()
    }

    /// Subscribes to `(state, changes)` emissions.
    #[must_use]
    pub fn changes(&self) -> HubStream<ChangesEvent> {
        self.changes_hub.subscribe()
    }

    /// Subscribes to per-slice progress updates.
    #[must_use]
    pub fn progress(&self) -> HubStream<ProgressUpdate> {
        self.progress_hub.subscribe()
    }

    /// Activates the suspended machine and begins pumping messages.
    ///
    /// The normalisation of the initial flow state is emitted as the first
    /// change set. Returns [`EngineError::AlreadyStarted`] on a second
    /// call.
    pub fn start(&self) -> Result<(), EngineError> {
        let Some(parts) = self.pending.lock().take() else {
            return Err(EngineError::AlreadyStarted);
        };
        let changes_hub = Arc::clone(&self.changes_hub);
        let progress_hub = Arc::clone(&self.progress_hub);
        let shutdown = self.shutdown.clone();
        tokio::spawn(pump(parts, changes_hub, progress_hub, shutdown));
        Ok(())
    }

    /// Posts an alteration batch and resolves once the machine has applied
    /// (or rejected) it.
    #[tracing::instrument(skip_all, err)]
    pub async fn alter_async(&self, request: AlterRequest) -> Result<(), AlterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = request.with_reply(reply_tx);
        self.messages
            .send(Message::Alter(request))
            .map_err(|_| AlterError::EngineClosed)?;
        reply_rx.await.map_err(|_| AlterError::EngineClosed)?
    }

    /// Posts a raw message into the engine's channel.
    pub fn post(&self, message: Message) -> Result<(), EngineError> {
        self.messages.send(message).map_err(|_| EngineError::Closed)
    }

    /// Requests cancellation of in-flight work on a vertex (all slices
    /// when `index` is `None`).
    pub fn stop_vertex(
        &self,
        vertex: MethodVertex,
        index: Option<VertexIndex>,
    ) -> Result<(), EngineError> {
        self.post(Message::Stop { vertex, index })
    }

    /// Suspends in-flight iteration on a vertex.
    pub fn pause_vertex(
        &self,
        vertex: MethodVertex,
        index: Option<VertexIndex>,
    ) -> Result<(), EngineError> {
        self.post(Message::Pause { vertex, index })
    }

    /// Lifts a previous pause on a vertex.
    pub fn resume_vertex(
        &self,
        vertex: MethodVertex,
        index: Option<VertexIndex>,
    ) -> Result<(), EngineError> {
        self.post(Message::Resume { vertex, index })
    }

    /// Stops the pump and cancels every outstanding worker.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn pump(
    parts: PumpParts,
    changes_hub: Arc<Hub<ChangesEvent>>,
    progress_hub: Arc<Hub<ProgressUpdate>>,
    shutdown: CancellationToken,
) {
    let PumpParts {
        mut machine,
        mut runtime,
        messages_rx,
        progress_rx,
        state_tx,
    } = parts;

    if let Some((state, changes)) = machine.start() {
        emit(&state_tx, &changes_hub, &mut runtime, state, changes);
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            update = progress_rx.recv_async() => match update {
                Ok(update) => progress_hub.publish(update),
                Err(_) => break,
            },
            message = messages_rx.recv_async() => {
                let Ok(message) = message else { break };
                let (message, reply) = match message {
                    Message::Alter(mut request) => {
                        let reply = request.take_reply();
                        (Message::Alter(request), reply)
                    }
                    other => (other, None),
                };
                match machine.apply(message) {
                    Ok(Some((state, changes))) => {
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(()));
                        }
                        emit(&state_tx, &changes_hub, &mut runtime, state, changes);
                    }
                    Ok(None) => {
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    Err(error) => match reply {
                        Some(reply) => {
                            let _ = reply.send(Err(error));
                        }
                        None => tracing::warn!(%error, "alteration rejected with no reply channel"),
                    },
                }
            }
        }
    }

    runtime.shutdown();
    changes_hub.close();
    progress_hub.close();
    tracing::debug!("engine pump stopped");
}

fn emit(
    state_tx: &watch::Sender<DataflowState>,
    changes_hub: &Arc<Hub<ChangesEvent>>,
    runtime: &mut Runtime,
    state: DataflowState,
    changes: StateChanges,
) {
    let actions = analyse(&changes);
    let _ = state_tx.send(state.clone());
    changes_hub.publish(Arc::new((state.clone(), changes)));
    runtime.perform(&state, actions);
}
