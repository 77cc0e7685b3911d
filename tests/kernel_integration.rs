//! End-to-end kernel scenarios: spawn, dispatch, destruction, broadcasts.

use hive_core::behavior::{self, AgentDefinition, BehaviorRegistry};
use hive_core::events::{Event, EventKind};
use hive_core::kernel::{AgentHandle, AgentState, Kernel};
use hive_core::types::AgentId;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Poll until `cond` holds; behavior units run on the worker pool, so
/// observable effects lag the API calls that scheduled them.
async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Definition with no behaviors at all.
struct NullDefinition;

impl AgentDefinition for NullDefinition {
    fn behaviors(&self, _agent: AgentHandle) -> BehaviorRegistry {
        BehaviorRegistry::empty()
    }
}

/// Agent whose Initialize behavior immediately requests self-destruction,
/// and whose Destroy behavior records every delivery it observes.
struct SelfDestructingDefinition {
    destroys: Arc<Mutex<Vec<AgentId>>>,
}

impl AgentDefinition for SelfDestructingDefinition {
    fn behaviors(&self, agent: AgentHandle) -> BehaviorRegistry {
        let destroys = Arc::clone(&self.destroys);
        let killer = agent;
        BehaviorRegistry::builder()
            .on(EventKind::Initialize, move |_| {
                let killer = killer.clone();
                vec![behavior::unit(async move {
                    killer.kill_me().await;
                })]
            })
            .on(EventKind::Destroy, move |event| {
                let destroys = Arc::clone(&destroys);
                let event = Arc::clone(event);
                vec![behavior::unit(async move {
                    if let Some(source) = event.source {
                        destroys.lock().unwrap().push(source);
                    }
                })]
            })
            .build()
    }
}

/// Records Destroy deliveries; destruction is driven externally.
struct DestroyProbeDefinition {
    destroys: Arc<Mutex<Vec<AgentId>>>,
}

impl AgentDefinition for DestroyProbeDefinition {
    fn behaviors(&self, _agent: AgentHandle) -> BehaviorRegistry {
        let destroys = Arc::clone(&self.destroys);
        BehaviorRegistry::builder()
            .on(EventKind::Destroy, move |event| {
                let destroys = Arc::clone(&destroys);
                let event = Arc::clone(event);
                vec![behavior::unit(async move {
                    if let Some(source) = event.source {
                        destroys.lock().unwrap().push(source);
                    }
                })]
            })
            .build()
    }
}

/// Records the AgentSpawned / AgentKilled broadcasts it receives.
struct WatcherDefinition {
    spawned: Arc<Mutex<Vec<AgentId>>>,
    killed: Arc<Mutex<Vec<AgentId>>>,
}

impl AgentDefinition for WatcherDefinition {
    fn behaviors(&self, _agent: AgentHandle) -> BehaviorRegistry {
        let spawned = Arc::clone(&self.spawned);
        let killed = Arc::clone(&self.killed);
        BehaviorRegistry::builder()
            .on(EventKind::AgentSpawned, move |event| {
                let spawned = Arc::clone(&spawned);
                let event = Arc::clone(event);
                vec![behavior::unit(async move {
                    if let Some(source) = event.source {
                        spawned.lock().unwrap().push(source);
                    }
                })]
            })
            .on(EventKind::AgentKilled, move |event| {
                let killed = Arc::clone(&killed);
                let event = Arc::clone(event);
                vec![behavior::unit(async move {
                    if let Some(source) = event.source {
                        killed.lock().unwrap().push(source);
                    }
                })]
            })
            .build()
    }
}

// =============================================================================
// Destruction protocol
// =============================================================================

/// The regression scenario: killing yourself from inside the Initialize
/// behavior must deliver Destroy once, not twice.
#[tokio::test]
async fn kill_me_during_initialize_delivers_exactly_one_destroy() {
    let destroys = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::builder().build().await.unwrap();
    let definition = SelfDestructingDefinition {
        destroys: Arc::clone(&destroys),
    };

    let id = kernel.spawn_agent(&definition, None).await.unwrap();

    wait_until(|| !destroys.lock().unwrap().is_empty()).await;
    // give a duplicate delivery every chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*destroys.lock().unwrap(), vec![id]);
    assert_eq!(kernel.agent_count().await, 0);
}

#[tokio::test]
async fn concurrent_kill_requests_deliver_exactly_one_destroy() {
    let destroys = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::builder().build().await.unwrap();
    let definition = DestroyProbeDefinition {
        destroys: Arc::clone(&destroys),
    };

    let id = kernel.spawn_agent(&definition, None).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let kernel = kernel.clone();
        tasks.push(tokio::spawn(async move {
            // later callers may find the agent already gone; both outcomes
            // are silent from the agent's point of view
            let _ = kernel.kill_agent(&id).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    wait_until(|| !destroys.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*destroys.lock().unwrap(), vec![id]);
}

#[tokio::test]
async fn destroyed_agent_is_a_member_of_zero_spaces() {
    let kernel = Kernel::builder().build().await.unwrap();
    let id = kernel.spawn_agent(&NullDefinition, None).await.unwrap();

    // put the agent in a second space of its context as well
    let extra = kernel
        .contexts()
        .create_space(&kernel.root_context_id())
        .await
        .unwrap();
    kernel
        .contexts()
        .join(&extra.id(), id, &kernel.root_context_id())
        .await
        .unwrap();

    kernel.kill_agent(&id).await.unwrap();

    for space in kernel.contexts().spaces_of(&kernel.root_context_id()).await {
        assert!(!space.contains(&id).await);
    }
    assert_eq!(kernel.agent_state(&id).await, None);
}

// =============================================================================
// Dispatch isolation and ordering
// =============================================================================

struct PanickyGuardsDefinition {
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl AgentDefinition for PanickyGuardsDefinition {
    fn behaviors(&self, _agent: AgentHandle) -> BehaviorRegistry {
        let first = Arc::clone(&self.seen);
        let second = Arc::clone(&self.seen);
        BehaviorRegistry::builder()
            .on(EventKind::Initialize, move |_| {
                first.lock().unwrap().push("first");
                panic!("guard blew up");
            })
            .on(EventKind::Initialize, move |_| {
                let second = Arc::clone(&second);
                vec![behavior::unit(async move {
                    second.lock().unwrap().push("second");
                })]
            })
            .build()
    }
}

#[tokio::test]
async fn guard_panic_is_isolated_from_siblings_and_kernel() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::builder().build().await.unwrap();
    let definition = PanickyGuardsDefinition {
        seen: Arc::clone(&seen),
    };

    let id = kernel.spawn_agent(&definition, None).await.unwrap();

    wait_until(|| seen.lock().unwrap().len() == 2).await;
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);

    // the kernel survived and the agent is fully functional
    assert_eq!(kernel.agent_state(&id).await, Some(AgentState::Alive));
}

struct PingCounterDefinition {
    pings: Arc<Mutex<u32>>,
}

impl AgentDefinition for PingCounterDefinition {
    fn behaviors(&self, _agent: AgentHandle) -> BehaviorRegistry {
        let pings = Arc::clone(&self.pings);
        BehaviorRegistry::builder()
            .on(EventKind::Custom("ping".to_string()), move |_| {
                let pings = Arc::clone(&pings);
                vec![behavior::unit(async move {
                    *pings.lock().unwrap() += 1;
                })]
            })
            .build()
    }
}

#[tokio::test]
async fn submitted_events_fan_out_to_all_members() {
    let pings = Arc::new(Mutex::new(0));
    let kernel = Kernel::builder().build().await.unwrap();
    let definition = PingCounterDefinition {
        pings: Arc::clone(&pings),
    };

    kernel.spawn_agent(&definition, None).await.unwrap();
    kernel.spawn_agent(&definition, None).await.unwrap();
    kernel.spawn_agent(&NullDefinition, None).await.unwrap();

    let delivered = kernel
        .submit_event(
            Event::custom("ping", None, serde_json::Value::Null),
            &kernel.root_space_id(),
        )
        .await
        .unwrap();
    assert_eq!(delivered, 3);

    wait_until(|| *pings.lock().unwrap() == 2).await;
}

// =============================================================================
// Platform broadcasts
// =============================================================================

#[tokio::test]
async fn watchers_observe_spawn_and_kill_broadcasts() {
    let spawned = Arc::new(Mutex::new(Vec::new()));
    let killed = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::builder().build().await.unwrap();
    let watcher = WatcherDefinition {
        spawned: Arc::clone(&spawned),
        killed: Arc::clone(&killed),
    };

    kernel.spawn_agent(&watcher, None).await.unwrap();

    let subject = kernel.spawn_agent(&NullDefinition, None).await.unwrap();
    wait_until(|| !spawned.lock().unwrap().is_empty()).await;
    assert_eq!(*spawned.lock().unwrap(), vec![subject]);

    kernel.kill_agent(&subject).await.unwrap();
    wait_until(|| !killed.lock().unwrap().is_empty()).await;
    assert_eq!(*killed.lock().unwrap(), vec![subject]);
}

#[tokio::test]
async fn newcomer_does_not_observe_its_own_spawn_broadcast() {
    let spawned = Arc::new(Mutex::new(Vec::new()));
    let killed = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::builder().build().await.unwrap();
    let watcher = WatcherDefinition {
        spawned: Arc::clone(&spawned),
        killed: Arc::clone(&killed),
    };

    let lone = kernel.spawn_agent(&watcher, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!spawned.lock().unwrap().contains(&lone));
}

// =============================================================================
// Contexts
// =============================================================================

#[tokio::test]
async fn second_root_context_fails_already_exists() {
    use hive_core::types::{ContextId, Error};

    let kernel = Kernel::builder().build().await.unwrap();
    let err = kernel
        .contexts()
        .create_context(ContextId::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));

    // the original root is still retrievable
    let root = kernel.contexts().root_context().await.unwrap();
    assert_eq!(root.id(), kernel.root_context_id());
}

#[tokio::test]
async fn agents_spawn_into_child_contexts() {
    use hive_core::types::ContextId;

    let kernel = Kernel::builder().build().await.unwrap();
    let child = kernel
        .contexts()
        .create_context(ContextId::new(), false)
        .await
        .unwrap();

    let id = kernel
        .spawn_agent_in(&NullDefinition, None, child.id())
        .await
        .unwrap();

    let members = kernel
        .space_participants(&child.default_space())
        .await
        .unwrap();
    assert_eq!(members, vec![id]);

    // the root default space was not touched
    assert!(kernel
        .space_participants(&kernel.root_space_id())
        .await
        .unwrap()
        .is_empty());
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn shutdown_destroys_agents_and_delivers_destroy() {
    let destroys = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::builder().build().await.unwrap();
    let definition = DestroyProbeDefinition {
        destroys: Arc::clone(&destroys),
    };

    let a = kernel.spawn_agent(&definition, None).await.unwrap();
    let b = kernel.spawn_agent(&definition, None).await.unwrap();

    kernel.shutdown().await;

    assert_eq!(kernel.agent_count().await, 0);
    wait_until(|| destroys.lock().unwrap().len() == 2).await;
    let seen = destroys.lock().unwrap().clone();
    assert!(seen.contains(&a));
    assert!(seen.contains(&b));
}
