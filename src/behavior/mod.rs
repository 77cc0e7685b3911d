//! Behavior registration for agents.
//!
//! The agent front-end compiles each agent definition into guard-evaluator /
//! behavior-unit pairs; the kernel only ever consumes the compiled form. A
//! [`GuardEvaluator`] decides, synchronously and per event, which deferred
//! [`BehaviorUnit`]s apply. The [`BehaviorRegistry`] maps event kinds to
//! evaluators in declaration order and is immutable once built; there is no
//! runtime discovery of behaviors.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::events::{Event, EventKind};
use crate::kernel::AgentHandle;

/// A deferred unit of agent logic, bound to one matched (event, agent) pair.
///
/// Units are scheduled onto the shared worker pool; their output is not
/// visible to the dispatcher.
pub type BehaviorUnit = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Box a future as a [`BehaviorUnit`].
pub fn unit<F>(future: F) -> BehaviorUnit
where
    F: Future<Output = ()> + Send + 'static,
{
    Box::pin(future)
}

/// Per-agent, per-event-kind selector of behavior units.
///
/// Evaluators run synchronously during dispatch and must be side-effect-free
/// apart from building the units they return.
pub type GuardEvaluator = Box<dyn Fn(&Arc<Event>) -> Vec<BehaviorUnit> + Send + Sync + 'static>;

/// Compiled agent definition, supplied by the front-end.
///
/// `behaviors` is called exactly once per spawned agent; the returned
/// registry is owned by that agent for its whole life. The handle lets the
/// produced closures reach back into the kernel (emit, `kill_me`) by id
/// without holding the kernel alive.
pub trait AgentDefinition: Send + Sync {
    fn behaviors(&self, agent: AgentHandle) -> BehaviorRegistry;
}

/// Mapping from event kind to guard evaluators, in declaration order.
///
/// Owned exclusively by its agent and immutable after construction.
pub struct BehaviorRegistry {
    table: HashMap<EventKind, Vec<GuardEvaluator>>,
}

impl BehaviorRegistry {
    pub fn builder() -> BehaviorRegistryBuilder {
        BehaviorRegistryBuilder {
            table: HashMap::new(),
        }
    }

    /// Registry with no behaviors at all; such an agent reacts to nothing.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Evaluators registered for `kind`, in declaration order.
    pub fn evaluators(&self, kind: &EventKind) -> Option<&[GuardEvaluator]> {
        self.table.get(kind).map(Vec::as_slice)
    }

    /// Whether any evaluator is registered for `kind`.
    pub fn handles(&self, kind: &EventKind) -> bool {
        self.table.contains_key(kind)
    }

    /// Number of event kinds with at least one evaluator.
    pub fn kind_count(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, evaluators) in &self.table {
            map.entry(&kind.to_string(), &evaluators.len());
        }
        map.finish()
    }
}

/// Builder for [`BehaviorRegistry`]; consumed by `build` so the registry
/// cannot grow after agent construction.
pub struct BehaviorRegistryBuilder {
    table: HashMap<EventKind, Vec<GuardEvaluator>>,
}

impl BehaviorRegistryBuilder {
    /// Append a guard evaluator for `kind`. Declaration order is preserved
    /// per kind.
    pub fn on<F>(mut self, kind: EventKind, evaluator: F) -> Self
    where
        F: Fn(&Arc<Event>) -> Vec<BehaviorUnit> + Send + Sync + 'static,
    {
        self.table.entry(kind).or_default().push(Box::new(evaluator));
        self
    }

    pub fn build(self) -> BehaviorRegistry {
        BehaviorRegistry { table: self.table }
    }
}

impl fmt::Debug for BehaviorRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistryBuilder")
            .field("kinds", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_evaluator(_: &Arc<Event>) -> Vec<BehaviorUnit> {
        Vec::new()
    }

    #[test]
    fn evaluators_keep_declaration_order() {
        let registry = BehaviorRegistry::builder()
            .on(EventKind::Initialize, |_| vec![unit(async {})])
            .on(EventKind::Initialize, noop_evaluator)
            .on(EventKind::Destroy, noop_evaluator)
            .build();

        assert_eq!(registry.evaluators(&EventKind::Initialize).unwrap().len(), 2);
        assert_eq!(registry.evaluators(&EventKind::Destroy).unwrap().len(), 1);
        assert_eq!(registry.kind_count(), 2);
    }

    #[test]
    fn missing_kind_yields_none() {
        let registry = BehaviorRegistry::empty();
        assert!(registry.evaluators(&EventKind::Initialize).is_none());
        assert!(!registry.handles(&EventKind::Destroy));
        assert!(registry.is_empty());
    }

    #[test]
    fn debug_shows_kinds_and_counts() {
        let registry = BehaviorRegistry::builder()
            .on(EventKind::Destroy, noop_evaluator)
            .build();
        let rendered = format!("{:?}", registry);
        assert!(rendered.contains("destroy"));
    }
}
