//! Opaque artefact and checkpoint values.
//!
//! Methods exchange [`Artefact`]s: immutable, reference-counted JSON values
//! the engine never interprets beyond array structure. Scatter edges iterate
//! the elements of an array artefact; reduce and collect edges assemble
//! array artefacts from scalar ones. [`Checkpoint`]s use the same
//! representation and are meaningful only to the method that produced them.
//!
//! Structural equality on the underlying JSON is what "bit-identical
//! reproduction" means for the reproduce contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An opaque output value of a method.
///
/// Cloning is cheap (an `Arc` bump), so artefacts can flow through state
/// snapshots, change sets and observer streams without copying payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artefact(Arc<Value>);

impl Artefact {
    pub fn new(value: impl Into<Value>) -> Self {
        Artefact(Arc::new(value.into()))
    }

    /// Builds an array artefact from scalar artefacts, preserving order.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Artefact>,
    {
        let values: Vec<Value> = items.into_iter().map(|a| a.0.as_ref().clone()).collect();
        Artefact(Arc::new(Value::Array(values)))
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// The elements if this artefact is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        self.0.as_array().map(|v| v.as_slice())
    }

    /// Number of elements if this artefact is an array.
    #[must_use]
    pub fn array_len(&self) -> Option<usize> {
        self.0.as_array().map(|v| v.len())
    }

    /// Element `k` of an array artefact, as an artefact of its own.
    #[must_use]
    pub fn element(&self, k: usize) -> Option<Artefact> {
        self.0
            .as_array()
            .and_then(|v| v.get(k))
            .map(|v| Artefact(Arc::new(v.clone())))
    }
}

impl From<Value> for Artefact {
    fn from(value: Value) -> Self {
        Artefact(Arc::new(value))
    }
}

impl fmt::Display for Artefact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque method-defined state sufficient to resume or reproduce an
/// iteration.
///
/// The engine stores checkpoints alongside outputs and hands them back to
/// [`Method::execute`](crate::method::Method::execute) for resumption and to
/// [`Method::reproduce`](crate::method::Method::reproduce) for restoring
/// lost outputs after a state reload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(Arc<Value>);

impl Checkpoint {
    pub fn new(value: impl Into<Value>) -> Self {
        Checkpoint(Arc::new(value.into()))
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for Checkpoint {
    fn from(value: Value) -> Self {
        Checkpoint(Arc::new(value))
    }
}

/// Output artefacts of one slice, one slot per output port.
///
/// A slot may be `None` after restoring persisted state whose payloads were
/// not saved; such data is *partial* and triggers the reproduce path when a
/// checkpoint is available.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlots(Vec<Option<Artefact>>);

impl OutputSlots {
    /// All slots populated.
    pub fn full(outputs: Vec<Artefact>) -> Self {
        OutputSlots(outputs.into_iter().map(Some).collect())
    }

    /// Slots as given; `None` marks a lost payload.
    pub fn partial(slots: Vec<Option<Artefact>>) -> Self {
        OutputSlots(slots)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if any slot payload is missing.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.0.iter().any(Option::is_none)
    }

    /// The artefact at `output_ref`, if present.
    #[must_use]
    pub fn get(&self, output_ref: usize) -> Option<&Artefact> {
        self.0.get(output_ref).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn slots(&self) -> &[Option<Artefact>] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn array_artefact_elements() {
        let a = Artefact::new(json!([1, 2, 3]));
        assert_eq!(a.array_len(), Some(3));
        assert_eq!(a.element(1), Some(Artefact::new(json!(2))));
        assert_eq!(a.element(3), None);
        assert_eq!(Artefact::new(json!(7)).array_len(), None);
    }

    #[test]
    fn from_items_preserves_order() {
        let a = Artefact::from_items(vec![Artefact::new(json!("x")), Artefact::new(json!("y"))]);
        assert_eq!(a.value(), &json!(["x", "y"]));
    }

    #[test]
    fn partial_slots_detected() {
        let full = OutputSlots::full(vec![Artefact::new(json!(1))]);
        assert!(!full.is_partial());
        assert_eq!(full.len(), 1);
        let partial = OutputSlots::partial(vec![Some(Artefact::new(json!(1))), None]);
        assert!(partial.is_partial());
        assert!(!partial.is_empty());
        assert_eq!(partial.slots().len(), 2);
        assert_eq!(partial.get(0).unwrap().value(), &json!(1));
        assert_eq!(partial.get(1), None);
    }
}
