//! The deterministic state machine at the core of the engine.
//!
//! [`StateMachine`] owns the graph, the flow state and the logical clock.
//! Each [`Message`] is applied as one atomic transition in three phases:
//!
//! 1. *Local update* — the slice named by the message changes status
//!    (stale messages, whose start time no longer matches, are dropped).
//! 2. *Shape synchronisation* — newly published array outputs extend the
//!    shape trees of downstream scatter targets; slices appear and
//!    disappear to match the known index spaces.
//! 3. *Downstream reclassification* — every vertex is revisited in
//!    topological order; slices whose inputs became available move to
//!    `CanStart`, slices whose inputs changed or vanished are invalidated
//!    and their data cleared.
//!
//! The machine is created suspended: nothing is emitted until
//! [`start`](StateMachine::start), which normalises the (possibly
//! restored) initial flow state and emits it as the first change set. This
//! lets an embedder install a snapshot atomically before the runtime acts
//! on it.
//!
//! All mutation is transactional: a transition either produces a
//! `(state, changes)` pair or provably changed nothing, and a rejected
//! alteration leaves the state untouched.

pub mod changes;
pub mod inputs;
pub mod messages;

pub use changes::{StateChanges, VertexChanges};
pub use inputs::{assemble, port_value, InputValue, SliceInputs};
pub use messages::{AlterRequest, Message, SuccessResult};

use crate::graphs::{AlterError, Connection, FlowGraph};
use crate::mdmap::MdMap;
use crate::method::{MethodIteration, MethodVertex};
use crate::state::{
    DataflowState, ExecutionError, FlowState, IncompleteReason, MethodVertexData, VertexState,
    VertexStatus,
};
use crate::types::{TimeIndex, VertexIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};

/// Working record of one transition.
#[derive(Default)]
struct Txn {
    /// Pre-image of every touched vertex; `None` means absent before.
    old: FxHashMap<MethodVertex, Option<MdMap<VertexState>>>,
    /// Vertices whose incident connections changed in this transition.
    connection_changed: FxHashSet<MethodVertex>,
    /// Slices whose output data changed; drives downstream invalidation.
    data_changed: FxHashMap<MethodVertex, BTreeSet<VertexIndex>>,
}

impl Txn {
    fn mark_data(&mut self, vertex: &MethodVertex, index: &VertexIndex) {
        self.data_changed
            .entry(vertex.clone())
            .or_default()
            .insert(index.clone());
    }
}

/// Deterministic transition function over the engine state.
pub struct StateMachine {
    graph: FlowGraph,
    flow: FlowState,
    time: TimeIndex,
    started: bool,
}

impl StateMachine {
    /// Creates a suspended machine over `graph` with a (possibly restored)
    /// initial flow state.
    pub fn new(graph: FlowGraph, initial: FlowState) -> Self {
        StateMachine {
            graph,
            flow: initial,
            time: TimeIndex::ZERO,
            started: false,
        }
    }

    /// Current immutable snapshot.
    #[must_use]
    pub fn state(&self) -> DataflowState {
        DataflowState {
            graph: self.graph.clone(),
            flow: self.flow.clone(),
            time: self.time,
        }
    }

    #[must_use]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Activates the machine: normalises the initial flow state against the
    /// graph and emits everything as the first change set.
    ///
    /// Restored statuses are recomputed from data: slices with full outputs
    /// become `Complete`, partial outputs with a checkpoint take the
    /// reproduce path via `CompleteStarted`, paused slices stay paused, and
    /// everything else is reclassified from input availability. Calling
    /// `start` twice is a no-op.
    pub fn start(&mut self) -> Option<(DataflowState, StateChanges)> {
        if self.started {
            return None;
        }
        self.started = true;
        let next = self.time.next();
        let mut txn = Txn::default();

        let graph = &self.graph;
        self.flow.retain(|vertex, _| {
            let known = graph.contains_vertex(vertex);
            if !known {
                tracing::warn!(?vertex, "discarding restored state for unknown vertex");
            }
            known
        });

        // The first emission reports the whole flow state as new.
        for vertex in self.graph.vertices().to_vec() {
            txn.old.insert(vertex.clone(), None);
        }
        for vertex in self.graph.vertices().to_vec() {
            if let Some(map) = self.flow.get(&vertex) {
                let normalized = map.map(|_, s| normalize_slice(s, next));
                self.flow.insert(vertex.clone(), normalized);
            }
        }
        self.reclassify(&mut txn, next);
        self.finish(txn, next)
    }

    /// Applies one message as an atomic transition.
    ///
    /// Returns `Ok(None)` when the message was stale or otherwise without
    /// effect. Only alteration batches can fail; a failed alteration
    /// leaves the state unchanged.
    pub fn apply(
        &mut self,
        message: Message,
    ) -> Result<Option<(DataflowState, StateChanges)>, AlterError> {
        let next = self.time.next();
        let mut txn = Txn::default();
        match message {
            Message::Alter(request) => self.apply_alter(&mut txn, request)?,
            Message::Start {
                vertex,
                index,
                can_start_time,
            } => self.apply_start(&mut txn, &vertex, index, can_start_time, next),
            Message::Iteration {
                vertex,
                index,
                result,
                start_time,
            } => self.apply_iteration(&mut txn, &vertex, &index, result, start_time),
            Message::Succeeded {
                vertex,
                index,
                start_time,
                result,
            } => self.apply_succeeded(&mut txn, &vertex, &index, start_time, result),
            Message::Failed {
                vertex,
                index,
                start_time,
                failure,
            } => self.apply_failed(&mut txn, &vertex, &index, start_time, failure),
            Message::Stop { vertex, index } => self.apply_stop(&mut txn, &vertex, index),
            Message::Pause { vertex, index } => self.apply_pause(&mut txn, &vertex, index),
            Message::Resume { vertex, index } => self.apply_resume(&mut txn, &vertex, index, next),
        }
        self.reclassify(&mut txn, next);
        Ok(self.finish(txn, next))
    }

    fn finish(&mut self, txn: Txn, next: TimeIndex) -> Option<(DataflowState, StateChanges)> {
        let mut changes = StateChanges::default();
        for (vertex, old) in txn.old {
            let connection_changed = txn.connection_changed.contains(&vertex);
            if let Some(change) =
                VertexChanges::classify(old.as_ref(), self.flow.get(&vertex), connection_changed)
            {
                changes.insert(vertex, change);
            }
        }
        if changes.is_empty() {
            None
        } else {
            self.time = next;
            Some((self.state(), changes))
        }
    }

    fn touch(&self, txn: &mut Txn, vertex: &MethodVertex) {
        if !txn.old.contains_key(vertex) {
            txn.old.insert(vertex.clone(), self.flow.get(vertex).cloned());
        }
    }

    fn set_slice(
        &mut self,
        txn: &mut Txn,
        vertex: &MethodVertex,
        index: &VertexIndex,
        state: VertexState,
    ) {
        self.touch(txn, vertex);
        let map = match self.flow.get(vertex) {
            Some(m) => m.clone(),
            None => MdMap::new(self.graph.rank(vertex).unwrap_or_else(|| index.rank())),
        };
        let old_output = map
            .find(index)
            .and_then(|s| s.data.as_ref().map(|d| d.output.clone()));
        let new_output = state.data.as_ref().map(|d| d.output.clone());
        if old_output != new_output {
            txn.mark_data(vertex, index);
        }
        self.flow.insert(vertex.clone(), map.add(index.clone(), state));
    }

    /// The slice's current state, if its in-flight time matches.
    fn in_flight(
        &self,
        vertex: &MethodVertex,
        index: &VertexIndex,
        start_time: TimeIndex,
    ) -> Option<VertexState> {
        let state = self.flow.get(vertex)?.find(index)?;
        if state.status.start_time() == Some(start_time) {
            Some(state.clone())
        } else {
            tracing::debug!(
                ?vertex,
                index = %index,
                %start_time,
                current = %state.status,
                "dropping stale worker message"
            );
            None
        }
    }

    fn targeted(
        &self,
        vertex: &MethodVertex,
        index: Option<VertexIndex>,
    ) -> Vec<(VertexIndex, VertexState)> {
        let Some(map) = self.flow.get(vertex) else {
            return Vec::new();
        };
        match index {
            Some(i) => map
                .find(&i)
                .map(|s| vec![(i.clone(), s.clone())])
                .unwrap_or_default(),
            None => map.iter().map(|(i, s)| (i.clone(), s.clone())).collect(),
        }
    }

    fn apply_alter(&mut self, txn: &mut Txn, mut request: AlterRequest) -> Result<(), AlterError> {
        debug_assert!(request.reply.is_none(), "reply is handled by the engine");
        request.take_reply();
        let new_graph = self.graph.try_apply(
            &request.disconnect,
            &request.remove,
            request.merge.as_ref(),
            &request.connect,
        )?;

        // Targets of rewired edges must re-evaluate their inputs.
        for edge in request.disconnect.iter().chain(request.connect.iter()) {
            txn.connection_changed.insert(edge.target.clone());
        }
        if let Some(merged) = &request.merge {
            for edge in merged.edges() {
                txn.connection_changed.insert(edge.target.clone());
            }
        }
        for vertex in &request.remove {
            for edge in self.graph.edges_out_of(vertex) {
                txn.connection_changed.insert(edge.target.clone());
            }
            self.touch(txn, vertex);
        }
        for vertex in &request.remove {
            self.flow.remove(vertex);
        }
        self.graph = new_graph;
        Ok(())
    }

    fn apply_start(
        &mut self,
        txn: &mut Txn,
        vertex: &MethodVertex,
        index: Option<VertexIndex>,
        can_start_time: Option<TimeIndex>,
        next: TimeIndex,
    ) {
        for (i, state) in self.targeted(vertex, index) {
            if let VertexStatus::CanStart(t) = state.status {
                if can_start_time.map_or(true, |ct| ct == t) {
                    self.set_slice(txn, vertex, &i, state.with_status(VertexStatus::Started(next)));
                } else {
                    tracing::debug!(?vertex, index = %i, "dropping stale start message");
                }
            }
        }
    }

    fn apply_iteration(
        &mut self,
        txn: &mut Txn,
        vertex: &MethodVertex,
        index: &VertexIndex,
        result: MethodIteration,
        start_time: TimeIndex,
    ) {
        let Some(state) = self.in_flight(vertex, index, start_time) else {
            return;
        };
        let iteration = match state.status {
            VertexStatus::Started(_) | VertexStatus::CompleteStarted(_) => 1,
            VertexStatus::Continues { iteration, .. } => iteration + 1,
            _ => unreachable!("in_flight matched a non-running status"),
        };
        let data = MethodVertexData::new(
            crate::artefact::OutputSlots::full(result.outputs),
            result.checkpoint,
        );
        self.set_slice(
            txn,
            vertex,
            index,
            VertexState {
                status: VertexStatus::Continues {
                    iteration,
                    time: start_time,
                },
                data: Some(data),
            },
        );
    }

    fn apply_succeeded(
        &mut self,
        txn: &mut Txn,
        vertex: &MethodVertex,
        index: &VertexIndex,
        start_time: TimeIndex,
        result: SuccessResult,
    ) {
        let Some(state) = self.in_flight(vertex, index, start_time) else {
            return;
        };
        let new_state = match result {
            SuccessResult::IterationResult(iteration) => VertexState {
                status: VertexStatus::Complete,
                data: Some(MethodVertexData::new(
                    crate::artefact::OutputSlots::full(iteration.outputs),
                    iteration.checkpoint,
                )),
            },
            SuccessResult::NoMoreIterations => match state.data {
                Some(data) => VertexState {
                    status: VertexStatus::Complete,
                    data: Some(data),
                },
                None => VertexState {
                    status: VertexStatus::Incomplete(IncompleteReason::ExecutionFailed(
                        ExecutionError::msg("method finished without producing any iteration"),
                    )),
                    data: None,
                },
            },
        };
        self.set_slice(txn, vertex, index, new_state);
    }

    fn apply_failed(
        &mut self,
        txn: &mut Txn,
        vertex: &MethodVertex,
        index: &VertexIndex,
        start_time: TimeIndex,
        failure: ExecutionError,
    ) {
        if self.in_flight(vertex, index, start_time).is_none() {
            return;
        }
        self.set_slice(
            txn,
            vertex,
            index,
            VertexState {
                status: VertexStatus::Incomplete(IncompleteReason::ExecutionFailed(failure)),
                data: None,
            },
        );
    }

    fn apply_stop(&mut self, txn: &mut Txn, vertex: &MethodVertex, index: Option<VertexIndex>) {
        for (i, state) in self.targeted(vertex, index) {
            if state.status.is_running() {
                // Data of completed iterations stays; it is real output.
                let stopped = state.with_status(VertexStatus::Incomplete(IncompleteReason::Stopped));
                self.set_slice(txn, vertex, &i, stopped);
            }
        }
    }

    fn apply_pause(&mut self, txn: &mut Txn, vertex: &MethodVertex, index: Option<VertexIndex>) {
        for (i, state) in self.targeted(vertex, index) {
            let paused = match state.status {
                VertexStatus::Started(_) | VertexStatus::CompleteStarted(_) => VertexStatus::Paused,
                VertexStatus::Continues { iteration, .. } => {
                    VertexStatus::PausedContinues { iteration }
                }
                _ => continue,
            };
            self.set_slice(txn, vertex, &i, state.with_status(paused));
        }
    }

    fn apply_resume(
        &mut self,
        txn: &mut Txn,
        vertex: &MethodVertex,
        index: Option<VertexIndex>,
        next: TimeIndex,
    ) {
        for (i, state) in self.targeted(vertex, index) {
            match state.status {
                VertexStatus::Paused => {
                    self.set_slice(
                        txn,
                        vertex,
                        &i,
                        VertexState {
                            status: VertexStatus::Incomplete(IncompleteReason::OutdatedInputs),
                            data: None,
                        },
                    );
                }
                VertexStatus::PausedContinues { iteration } => {
                    let resumed = state.with_status(VertexStatus::Continues {
                        iteration,
                        time: next,
                    });
                    self.set_slice(txn, vertex, &i, resumed);
                }
                // PausedInherited lifts in reclassification once no
                // consumed upstream slice is paused any more.
                _ => {}
            }
        }
    }

    fn reclassify(&mut self, txn: &mut Txn, next: TimeIndex) {
        for vertex in self.graph.topo_order().to_vec() {
            self.sync_vertex(txn, &vertex, next);
        }
    }

    /// Aligns one vertex's slice map with the known index space, then
    /// reclassifies every slice against current input availability.
    fn sync_vertex(&mut self, txn: &mut Txn, vertex: &MethodVertex, next: TimeIndex) {
        self.touch(txn, vertex);
        let rank = self.graph.rank(vertex).expect("vertex is in the graph");
        let current = self
            .flow
            .get(vertex)
            .cloned()
            .unwrap_or_else(|| MdMap::new(rank));
        let mut map = if current.rank() == rank {
            current
        } else {
            // Rank changed by an alteration; the old index space is void.
            for (i, s) in current.iter() {
                if s.data.is_some() {
                    txn.mark_data(vertex, i);
                }
            }
            MdMap::new(rank)
        };

        let dims = self.expected_dims(vertex);
        let expected = expected_indices(rank, &dims);
        map = map.with_shape(dims);
        let stale: Vec<VertexIndex> = map
            .indices()
            .filter(|i| !expected.contains(*i))
            .cloned()
            .collect();
        for i in stale {
            if map.find(&i).is_some_and(|s| s.data.is_some()) {
                txn.mark_data(vertex, &i);
            }
            map = map.remove(&i);
        }
        for i in &expected {
            if !map.contains(i) {
                map = map.add(i.clone(), VertexState::unassigned());
            }
        }
        self.flow.insert(vertex.clone(), map.clone());

        let slices: Vec<(VertexIndex, VertexState)> =
            map.iter().map(|(i, s)| (i.clone(), s.clone())).collect();
        for (i, state) in slices {
            let affected = self.slice_affected(txn, vertex, &i);
            let readiness = inputs::assemble(&self.graph, &self.flow, vertex, &i);
            let paused_upstream = inputs::upstream_paused(&self.graph, &self.flow, vertex, &i);
            let new_state = reclassified(&state, &readiness, paused_upstream, affected, next);
            if new_state != state {
                self.set_slice(txn, vertex, &i, new_state);
            }
        }
    }

    /// The index-space shape of `vertex` implied by its in-edges and the
    /// outputs published upstream.
    fn expected_dims(&self, vertex: &MethodVertex) -> BTreeMap<VertexIndex, usize> {
        let mut merged: Option<BTreeMap<VertexIndex, usize>> = None;
        for edge in self.graph.edges_into(vertex) {
            let contribution: BTreeMap<VertexIndex, usize> = match self.flow.get(&edge.source) {
                None => BTreeMap::new(),
                Some(source) => match edge.kind {
                    Connection::OneToOne(_) | Connection::Collect { .. } => {
                        source.shape_tree().clone()
                    }
                    Connection::Scatter(_) => {
                        let mut tree = source.shape_tree().clone();
                        for (i, s) in source.iter() {
                            if let Some(n) =
                                s.output(edge.output_ref).and_then(|a| a.array_len())
                            {
                                tree.insert(i.clone(), n);
                            }
                        }
                        tree
                    }
                    Connection::Reduce(r) => source
                        .shape_tree()
                        .iter()
                        .filter(|(k, _)| k.rank() < r)
                        .map(|(k, n)| (k.clone(), *n))
                        .collect(),
                },
            };
            merged = Some(match merged {
                None => contribution,
                Some(mut acc) => {
                    acc.retain(|k, n| contribution.get(k) == Some(n));
                    acc
                }
            });
        }
        merged.unwrap_or_default()
    }

    /// Whether the inputs consumed by `(vertex, index)` changed in this
    /// transition.
    fn slice_affected(&self, txn: &Txn, vertex: &MethodVertex, index: &VertexIndex) -> bool {
        if txn.connection_changed.contains(vertex) {
            return true;
        }
        self.graph.edges_into(vertex).any(|edge| {
            let Some(changed) = txn.data_changed.get(&edge.source) else {
                return false;
            };
            match edge.kind {
                Connection::Reduce(_) => changed.iter().any(|ci| ci.starts_with(index)),
                _ => changed.contains(&index.prefix(edge.kind.rank())),
            }
        })
    }
}

/// All indices reachable through a fully known shape tree.
fn expected_indices(rank: usize, dims: &BTreeMap<VertexIndex, usize>) -> BTreeSet<VertexIndex> {
    let mut acc = vec![VertexIndex::root()];
    for _ in 0..rank {
        let mut deeper = Vec::new();
        for prefix in &acc {
            if let Some(n) = dims.get(prefix) {
                for k in 0..*n {
                    deeper.push(prefix.child(k));
                }
            }
        }
        acc = deeper;
    }
    acc.into_iter().collect()
}

/// Status-from-data classification applied once at machine start.
fn normalize_slice(state: &VertexState, next: TimeIndex) -> VertexState {
    // A deliberate pause survives a restore.
    if matches!(
        state.status,
        VertexStatus::Paused | VertexStatus::PausedContinues { .. }
    ) {
        return state.clone();
    }
    match &state.data {
        Some(data) if !data.output.is_partial() => VertexState::complete(data.clone()),
        Some(data) if data.checkpoint.is_some() => VertexState {
            status: VertexStatus::CompleteStarted(next),
            data: Some(data.clone()),
        },
        // Partial and irreproducible; consumers will see transient inputs.
        Some(data) => VertexState::complete(data.clone()),
        None => VertexState::unassigned(),
    }
}

/// The per-slice reclassification table.
///
/// `affected` means the inputs this slice consumes changed in the current
/// transition. Invalidation clears the slice's data, so a completion whose
/// inputs changed drags its own consumers out of `Complete` as well.
fn reclassified(
    state: &VertexState,
    readiness: &SliceInputs,
    upstream_paused: bool,
    affected: bool,
    next: TimeIndex,
) -> VertexState {
    use IncompleteReason::*;
    use VertexStatus::*;

    match readiness {
        SliceInputs::Transient => match &state.status {
            Incomplete(TransientInputs) => state.clone(),
            _ => VertexState {
                status: Incomplete(TransientInputs),
                data: None,
            },
        },
        SliceInputs::NotReady => match &state.status {
            Incomplete(UnassignedInputs) => state.clone(),
            _ => VertexState {
                status: Incomplete(OutdatedInputs),
                data: None,
            },
        },
        SliceInputs::Ready(_) => {
            let ready = |data: Option<MethodVertexData>| VertexState {
                status: if upstream_paused {
                    PausedInherited
                } else {
                    CanStart(next)
                },
                data,
            };
            match &state.status {
                Incomplete(UnassignedInputs) | Incomplete(OutdatedInputs)
                | Incomplete(TransientInputs) => ready(state.data.clone()),
                Incomplete(ExecutionFailed(_)) | Incomplete(Stopped) => {
                    if affected {
                        ready(None)
                    } else {
                        state.clone()
                    }
                }
                CanStart(_) => {
                    if affected {
                        ready(state.data.clone())
                    } else if upstream_paused {
                        VertexState {
                            status: PausedInherited,
                            data: state.data.clone(),
                        }
                    } else {
                        state.clone()
                    }
                }
                Started(_) | Continues { .. } | CompleteStarted(_) | Complete => {
                    if affected {
                        ready(None)
                    } else {
                        state.clone()
                    }
                }
                Paused | PausedContinues { .. } => {
                    if affected {
                        VertexState {
                            status: Paused,
                            data: None,
                        }
                    } else {
                        state.clone()
                    }
                }
                PausedInherited => {
                    if upstream_paused {
                        state.clone()
                    } else {
                        VertexState {
                            status: CanStart(next),
                            data: state.data.clone(),
                        }
                    }
                }
            }
        }
    }
}
