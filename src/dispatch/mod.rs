//! Behavior dispatch.
//!
//! `dispatch` decides which of an agent's behavior units run in response to
//! an event:
//!   - Guard evaluators run synchronously, in registry order
//!   - Collected units are scheduled onto the tokio worker pool; collection
//!     order is a scheduling hint, not a guarantee
//!   - A failing evaluator or unit is isolated, logged, and never blocks its
//!     siblings
//!
//! Guard evaluation for the next event may begin before the units scheduled
//! here have finished; nothing in the dispatcher serializes agents against
//! each other.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Level;

use crate::events::Event;
use crate::kernel::recovery::{extract_panic_message, with_recovery};
use crate::kernel::Agent;
use crate::observability::LoggingService;

/// Evaluates guards and schedules matched behavior units.
pub struct Dispatcher {
    logger: Arc<dyn LoggingService>,
}

impl Dispatcher {
    pub fn new(logger: Arc<dyn LoggingService>) -> Self {
        Self { logger }
    }

    /// Dispatch `event` to `agent`.
    ///
    /// An agent with no registry entry for the event kind is a no-op, not an
    /// error. Returns the number of behavior units scheduled.
    pub fn dispatch(&self, agent: &Agent, event: Arc<Event>) -> usize {
        let Some(evaluators) = agent.registry().evaluators(&event.kind) else {
            return 0;
        };

        // Guard evaluation: synchronous, registry order. A panicking
        // evaluator is contained and the remaining evaluators still run.
        let mut units = Vec::new();
        for (index, evaluator) in evaluators.iter().enumerate() {
            match with_recovery(|| Ok(evaluator(&event)), "guard_evaluator") {
                Ok(mut selected) => units.append(&mut selected),
                Err(err) => self.logger.log(
                    Level::ERROR,
                    &format!(
                        "guard evaluator {} for {} on agent {} failed: {}",
                        index,
                        event.kind,
                        agent.id(),
                        err
                    ),
                ),
            }
        }

        // Deferred execution: each unit is its own task, isolated from its
        // siblings. Panics surface here, through the logging collaborator.
        let scheduled = units.len();
        for unit in units {
            let logger = Arc::clone(&self.logger);
            let kind = event.kind.clone();
            let agent_id = agent.id();
            tokio::spawn(async move {
                if let Err(payload) = AssertUnwindSafe(unit).catch_unwind().await {
                    logger.log(
                        Level::ERROR,
                        &format!(
                            "behavior unit for {} on agent {} panicked: {}",
                            kind,
                            agent_id,
                            extract_panic_message(&payload)
                        ),
                    );
                }
            });
        }

        tracing::debug!(
            "dispatched event kind={} to agent {}: {} unit(s) scheduled",
            event.kind,
            agent.id(),
            scheduled
        );

        scheduled
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("logger", &self.logger)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{self, BehaviorRegistry};
    use crate::events::EventKind;
    use crate::observability::TracingLogger;
    use crate::types::{AgentId, ContextId};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn agent_with(registry: BehaviorRegistry) -> Agent {
        Agent::new(AgentId::new(), None, ContextId::new(), registry)
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(TracingLogger))
    }

    #[tokio::test]
    async fn unknown_event_kind_is_a_noop() {
        let agent = agent_with(BehaviorRegistry::empty());
        let scheduled = dispatcher().dispatch(&agent, Arc::new(Event::custom("ping", None, serde_json::Value::Null)));
        assert_eq!(scheduled, 0);
    }

    #[tokio::test]
    async fn guard_order_matches_registration_order() {
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let registry = {
            let first = Arc::clone(&seen);
            let second = Arc::clone(&seen);
            BehaviorRegistry::builder()
                .on(EventKind::Initialize, move |_| {
                    first.lock().unwrap().push("first");
                    Vec::new()
                })
                .on(EventKind::Initialize, move |_| {
                    second.lock().unwrap().push("second");
                    Vec::new()
                })
                .build()
        };

        let agent = agent_with(registry);
        let d = dispatcher();
        for _ in 0..3 {
            d.dispatch(&agent, Arc::new(Event::initialize(agent.id())));
        }

        let order = seen.lock().unwrap().clone();
        assert_eq!(
            order,
            vec!["first", "second", "first", "second", "first", "second"]
        );
    }

    #[tokio::test]
    async fn panicking_guard_does_not_block_siblings() {
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let registry = {
            let survivor = Arc::clone(&seen);
            BehaviorRegistry::builder()
                .on(EventKind::Initialize, |_| panic!("bad guard"))
                .on(EventKind::Initialize, move |_| {
                    survivor.lock().unwrap().push("survivor");
                    Vec::new()
                })
                .build()
        };

        let agent = agent_with(registry);
        let scheduled = dispatcher().dispatch(&agent, Arc::new(Event::initialize(agent.id())));

        assert_eq!(scheduled, 0);
        assert_eq!(*seen.lock().unwrap(), vec!["survivor"]);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn panicking_guard_is_reported_not_propagated() {
        let registry = BehaviorRegistry::builder()
            .on(EventKind::Initialize, |_| panic!("guard exploded"))
            .build();

        let agent = agent_with(registry);
        dispatcher().dispatch(&agent, Arc::new(Event::initialize(agent.id())));

        assert!(logs_contain("panic_recovered"));
    }

    #[tokio::test]
    async fn panicking_unit_does_not_block_siblings() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let registry = BehaviorRegistry::builder()
            .on(EventKind::Initialize, move |_| {
                let tx = tx.clone();
                vec![
                    behavior::unit(async { panic!("bad unit") }),
                    behavior::unit(async move {
                        let _ = tx.send("ran");
                    }),
                ]
            })
            .build();

        let agent = agent_with(registry);
        let scheduled = dispatcher().dispatch(&agent, Arc::new(Event::initialize(agent.id())));
        assert_eq!(scheduled, 2);

        assert_eq!(rx.recv().await, Some("ran"));
    }

    #[tokio::test]
    async fn units_receive_the_dispatched_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let registry = BehaviorRegistry::builder()
            .on(EventKind::Custom("ping".to_string()), move |event| {
                let tx = tx.clone();
                let event = Arc::clone(event);
                vec![behavior::unit(async move {
                    let _ = tx.send(event.payload["seq"].as_i64());
                })]
            })
            .build();

        let agent = agent_with(registry);
        dispatcher().dispatch(
            &agent,
            Arc::new(Event::custom("ping", None, serde_json::json!({"seq": 9}))),
        );

        assert_eq!(rx.recv().await, Some(Some(9)));
    }
}
