//! ```text
//! GraphBuilder ─► FlowGraph ──┐
//!                             ▼
//! alter_async ──► Engine ─► StateMachine ─► (state, changes) ─► observers
//!                  ▲            │
//!                  │            ▼
//!                  │        analyser ─► Actions ─► Runtime ─► Scheduler ─► Methods
//!                  │                                  │                      │
//!                  └──────── worker messages ◄────────┴── progress ◄─────────┘
//! ```
//!
//! Dataloom is a dataflow execution engine: a runtime that evaluates a
//! directed acyclic graph of computational *methods* whose edges carry
//! typed *artefacts*. Vertices are vectorised over multi-dimensional index
//! spaces (scatter, reduce, collect, element-wise), methods may be
//! iterative with resumable checkpoints, execution is concurrent with
//! cooperative cancellation, and the graph can be altered while running.
//!
//! The crate splits into a deterministic [`machine`](crate::machine) that
//! turns messages into `(state, changes)` transitions, a pure
//! [`analyser`](crate::analyser) that maps changes to actions, and a
//! [`runtimes`](crate::runtimes) layer that performs those actions through
//! a [`schedulers`](crate::schedulers) worker pool. The
//! [`engine`](crate::engine) façade wires the loop together and exposes
//! observable streams for state, changes and progress.

pub mod analyser;
pub mod artefact;
pub mod engine;
pub mod graphs;
pub mod machine;
pub mod mdmap;
pub mod method;
pub mod runtimes;
pub mod schedulers;
pub mod state;
pub mod types;
