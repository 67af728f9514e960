//! Action runtime: schedules, cancels and reports method executions.
//!
//! The runtime owns one cancellation token per `(vertex, index)` slice.
//! Scheduling a slice replaces (and cancels) any prior token, so a
//! restarted slice implicitly cancels the run it supersedes; explicit stop
//! and remove actions cancel without rescheduling. Workers communicate
//! results exclusively by posting messages back into the engine's channel,
//! never by touching state.

use crate::analyser::Action;
use crate::machine::{assemble, Message, SliceInputs, SuccessResult};
use crate::method::{
    Method, MethodContext, MethodIteration, MethodVertex, ProgressUpdate,
};
use crate::artefact::{Artefact, Checkpoint};
use crate::schedulers::Scheduler;
use crate::state::{DataflowState, ExecutionError};
use crate::types::{TimeIndex, VertexIndex};
use futures_util::{FutureExt, StreamExt};
use rustc_hash::FxHashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Executes analyser actions against a scheduler and posts results back.
pub struct Runtime {
    scheduler: Arc<dyn Scheduler>,
    handles: FxHashMap<(MethodVertex, VertexIndex), CancellationToken>,
    messages: flume::Sender<Message>,
    progress: flume::Sender<ProgressUpdate>,
    delay: Duration,
}

impl Runtime {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        messages: flume::Sender<Message>,
        progress: flume::Sender<ProgressUpdate>,
        delay: Duration,
    ) -> Self {
        Runtime {
            scheduler,
            handles: FxHashMap::default(),
            messages,
            progress,
            delay,
        }
    }

    /// Performs one transition's actions against the post-transition state.
    #[tracing::instrument(skip_all, fields(actions = actions.len(), time = %state.time))]
    pub fn perform(&mut self, state: &DataflowState, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Delay {
                    vertex,
                    index,
                    time,
                } => self.delay(vertex, index, time),
                Action::Execute {
                    vertex,
                    index,
                    time,
                    checkpoint,
                } => self.execute(state, vertex, index, time, checkpoint),
                Action::Reproduce {
                    vertex,
                    index,
                    time,
                    checkpoint,
                } => self.reproduce(state, vertex, index, time, checkpoint),
                Action::StopMethod { vertex, index } => {
                    if let Some(token) = self.handles.remove(&(vertex, index)) {
                        token.cancel();
                    }
                }
                Action::Remove { vertex } => self.remove(&vertex),
            }
        }
    }

    /// Cancels every outstanding handle; used on engine teardown.
    pub fn shutdown(&mut self) {
        for (_, token) in self.handles.drain() {
            token.cancel();
        }
    }

    fn fresh_handle(&mut self, vertex: &MethodVertex, index: &VertexIndex) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(prior) = self
            .handles
            .insert((vertex.clone(), index.clone()), token.clone())
        {
            prior.cancel();
        }
        token
    }

    fn remove(&mut self, vertex: &MethodVertex) {
        self.handles.retain(|(v, _), token| {
            if v == vertex {
                token.cancel();
                false
            } else {
                true
            }
        });
    }

    fn delay(&mut self, vertex: MethodVertex, index: VertexIndex, time: TimeIndex) {
        let token = self.fresh_handle(&vertex, &index);
        let messages = self.messages.clone();
        if self.delay.is_zero() {
            let _ = messages.send(Message::Start {
                vertex,
                index: Some(index),
                can_start_time: Some(time),
            });
            return;
        }
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = messages.send(Message::Start {
                        vertex,
                        index: Some(index),
                        can_start_time: Some(time),
                    });
                }
            }
        });
    }

    fn slice_inputs(
        state: &DataflowState,
        vertex: &MethodVertex,
        index: &VertexIndex,
    ) -> Option<Vec<Artefact>> {
        match assemble(&state.graph, &state.flow, vertex, index) {
            SliceInputs::Ready(inputs) => Some(inputs),
            other => {
                // The machine only schedules slices with available inputs;
                // reaching here means the state moved in between.
                tracing::warn!(?vertex, %index, ?other, "scheduled slice has unavailable inputs");
                None
            }
        }
    }

    fn execute(
        &mut self,
        state: &DataflowState,
        vertex: MethodVertex,
        index: VertexIndex,
        time: TimeIndex,
        checkpoint: Option<Checkpoint>,
    ) {
        let Some(inputs) = Self::slice_inputs(state, &vertex, &index) else {
            return;
        };
        let token = self.fresh_handle(&vertex, &index);
        let method = Arc::clone(vertex.method());
        let ctx = MethodContext::new(
            vertex.clone(),
            index.clone(),
            time,
            token.clone(),
            self.progress.clone(),
        );
        let messages = self.messages.clone();
        tracing::debug!(?vertex, %index, %time, resuming = checkpoint.is_some(), "executing slice");
        self.scheduler.start(
            async move {
                let run = run_iterations(
                    method,
                    inputs,
                    checkpoint,
                    ctx,
                    token,
                    messages.clone(),
                    vertex.clone(),
                    index.clone(),
                    time,
                );
                if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
                    let _ = messages.send(Message::Failed {
                        vertex,
                        index,
                        start_time: time,
                        failure: ExecutionError::msg(panic_message(panic)),
                    });
                }
            }
            .boxed(),
        );
    }

    fn reproduce(
        &mut self,
        state: &DataflowState,
        vertex: MethodVertex,
        index: VertexIndex,
        time: TimeIndex,
        checkpoint: Checkpoint,
    ) {
        let Some(inputs) = Self::slice_inputs(state, &vertex, &index) else {
            return;
        };
        let token = self.fresh_handle(&vertex, &index);
        let method = Arc::clone(vertex.method());
        let ctx = MethodContext::new(
            vertex.clone(),
            index.clone(),
            time,
            token.clone(),
            self.progress.clone(),
        );
        let messages = self.messages.clone();
        tracing::debug!(?vertex, %index, %time, "reproducing slice outputs");
        self.scheduler.start(
            async move {
                let run = async {
                    let produced = method
                        .reproduce(inputs, checkpoint.clone(), ctx)
                        .await;
                    if token.is_cancelled() {
                        return;
                    }
                    let message = match produced {
                        Ok(outputs) => Message::Succeeded {
                            vertex: vertex.clone(),
                            index: index.clone(),
                            start_time: time,
                            result: SuccessResult::IterationResult(MethodIteration {
                                outputs,
                                checkpoint: Some(checkpoint),
                            }),
                        },
                        Err(e) => Message::Failed {
                            vertex: vertex.clone(),
                            index: index.clone(),
                            start_time: time,
                            failure: ExecutionError::msg(e.to_string()),
                        },
                    };
                    let _ = messages.send(message);
                };
                if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
                    let _ = messages.send(Message::Failed {
                        vertex,
                        index,
                        start_time: time,
                        failure: ExecutionError::msg(panic_message(panic)),
                    });
                }
            }
            .boxed(),
        );
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_iterations(
    method: Arc<dyn Method>,
    inputs: Vec<Artefact>,
    checkpoint: Option<Checkpoint>,
    ctx: MethodContext,
    token: CancellationToken,
    messages: flume::Sender<Message>,
    vertex: MethodVertex,
    index: VertexIndex,
    time: TimeIndex,
) {
    let mut stream = method.execute(inputs, checkpoint, ctx);
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            item = stream.next() => item,
        };
        match next {
            Some(Ok(iteration)) => {
                if token.is_cancelled() {
                    return;
                }
                let sent = messages.send(Message::Iteration {
                    vertex: vertex.clone(),
                    index: index.clone(),
                    result: iteration,
                    start_time: time,
                });
                if sent.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                let _ = messages.send(Message::Failed {
                    vertex,
                    index,
                    start_time: time,
                    failure: ExecutionError::msg(e.to_string()),
                });
                return;
            }
            None => {
                let _ = messages.send(Message::Succeeded {
                    vertex,
                    index,
                    start_time: time,
                    result: SuccessResult::NoMoreIterations,
                });
                return;
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("method panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("method panicked: {s}")
    } else {
        "method panicked".to_string()
    }
}
