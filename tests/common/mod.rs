#![allow(dead_code)]

pub mod methods;

pub use methods::*;

use dataloom::engine::Engine;
use dataloom::state::DataflowState;
use std::time::Duration;

/// Polls the engine's state watch until `pred` holds, panicking on
/// timeout. Returns the first satisfying snapshot.
pub async fn wait_for_state<F>(engine: &Engine, timeout: Duration, pred: F) -> DataflowState
where
    F: Fn(&DataflowState) -> bool,
{
    let mut watch = engine.state_watch();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = watch.borrow().clone();
        if pred(&snapshot) {
            return snapshot;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                panic!("timed out waiting for state; last time {}", snapshot.time)
            }
            changed = watch.changed() => {
                if changed.is_err() {
                    panic!("engine state watch closed while waiting");
                }
            }
        }
    }
}
