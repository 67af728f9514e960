#![allow(dead_code)]

use async_trait::async_trait;
use dataloom::artefact::{Artefact, Checkpoint};
use dataloom::method::{Method, MethodContext, MethodError, MethodIteration, MethodStream};
use dataloom::types::PortType;
use futures_util::{stream, StreamExt};
use serde_json::json;

fn int(artefact: &Artefact) -> Result<i64, MethodError> {
    artefact
        .value()
        .as_i64()
        .ok_or_else(|| MethodError::InvalidArtefact {
            what: format!("expected integer, got {}", artefact.value()),
        })
}

/// Produces one constant integer in a single iteration.
pub struct ConstMethod {
    pub value: i64,
}

impl ConstMethod {
    pub fn new(value: i64) -> Self {
        ConstMethod { value }
    }
}

#[async_trait]
impl Method for ConstMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        let value = self.value;
        stream::iter(vec![Ok(MethodIteration::new(vec![Artefact::new(value)]))]).boxed()
    }

    async fn reproduce(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Checkpoint,
        _ctx: MethodContext,
    ) -> Result<Vec<Artefact>, MethodError> {
        Ok(vec![Artefact::new(self.value)])
    }
}

/// Produces a constant integer array, for scatter sources.
pub struct ConstArrayMethod {
    pub values: Vec<i64>,
}

impl ConstArrayMethod {
    pub fn new(values: Vec<i64>) -> Self {
        ConstArrayMethod { values }
    }
}

#[async_trait]
impl Method for ConstArrayMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::array("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        let values = self.values.clone();
        stream::iter(vec![Ok(MethodIteration::new(vec![Artefact::new(json!(
            values
        ))]))])
        .boxed()
    }
}

/// Adds one to its single integer input.
pub struct AddOneMethod;

#[async_trait]
impl Method for AddOneMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        stream::once(async move {
            let n = int(&inputs[0])?;
            Ok(MethodIteration::new(vec![Artefact::new(n + 1)]))
        })
        .boxed()
    }
}

/// Doubles its single integer input.
pub struct DoubleMethod;

#[async_trait]
impl Method for DoubleMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        stream::once(async move {
            let n = int(&inputs[0])?;
            Ok(MethodIteration::new(vec![Artefact::new(n * 2)]))
        })
        .boxed()
    }
}

/// Sums its single integer-array input.
pub struct SumMethod;

#[async_trait]
impl Method for SumMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![PortType::array("i64")]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        stream::once(async move {
            let items = inputs[0]
                .as_array()
                .ok_or_else(|| MethodError::MissingInput { what: "array" })?;
            let mut sum = 0;
            for item in items {
                sum += item.as_i64().ok_or_else(|| MethodError::InvalidArtefact {
                    what: format!("non-integer array element {item}"),
                })?;
            }
            Ok(MethodIteration::new(vec![Artefact::new(sum)]))
        })
        .boxed()
    }
}

/// Yields one checkpointed iteration per configured value, resuming after
/// the checkpointed step when given one.
pub struct IterativeMethod {
    pub values: Vec<i64>,
}

impl IterativeMethod {
    pub fn new(values: Vec<i64>) -> Self {
        IterativeMethod { values }
    }
}

fn checkpoint_step(checkpoint: &Checkpoint) -> Option<usize> {
    checkpoint
        .value()
        .get("step")
        .and_then(|v| v.as_u64())
        .map(|s| s as usize)
}

#[async_trait]
impl Method for IterativeMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        let resume_after = checkpoint.as_ref().and_then(checkpoint_step);
        let start = resume_after.map(|s| s + 1).unwrap_or(0);
        let items: Vec<Result<MethodIteration, MethodError>> = self
            .values
            .iter()
            .enumerate()
            .skip(start)
            .map(|(step, value)| {
                Ok(MethodIteration::new(vec![Artefact::new(*value)])
                    .with_checkpoint(Checkpoint::new(json!({ "step": step }))))
            })
            .collect();
        stream::iter(items).boxed()
    }

    async fn reproduce(
        &self,
        _inputs: Vec<Artefact>,
        checkpoint: Checkpoint,
        _ctx: MethodContext,
    ) -> Result<Vec<Artefact>, MethodError> {
        let step = checkpoint_step(&checkpoint)
            .ok_or_else(|| MethodError::execution("malformed checkpoint"))?;
        self.values
            .get(step)
            .map(|v| vec![Artefact::new(*v)])
            .ok_or_else(|| MethodError::execution("checkpoint past the last step"))
    }
}

/// Always fails with the configured message.
pub struct FailingMethod {
    pub message: &'static str,
}

impl Default for FailingMethod {
    fn default() -> Self {
        FailingMethod {
            message: "deliberate test failure",
        }
    }
}

#[async_trait]
impl Method for FailingMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        let message = self.message;
        stream::iter(vec![Err(MethodError::execution(message))]).boxed()
    }
}

/// Never yields; only cancellation ends it.
pub struct PendingMethod;

#[async_trait]
impl Method for PendingMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        _ctx: MethodContext,
    ) -> MethodStream {
        stream::pending().boxed()
    }
}

/// Reports progress halfway, then completes with its input unchanged.
pub struct ProgressMethod;

#[async_trait]
impl Method for ProgressMethod {
    fn inputs(&self) -> Vec<PortType> {
        vec![]
    }

    fn outputs(&self) -> Vec<PortType> {
        vec![PortType::item("i64")]
    }

    fn execute(
        &self,
        _inputs: Vec<Artefact>,
        _checkpoint: Option<Checkpoint>,
        ctx: MethodContext,
    ) -> MethodStream {
        stream::once(async move {
            ctx.report_progress(0.5)?;
            Ok(MethodIteration::new(vec![Artefact::new(1)]))
        })
        .boxed()
    }
}
