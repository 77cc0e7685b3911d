//! Kernel types: AgentState and the per-agent record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::behavior::BehaviorRegistry;
use crate::types::{AgentId, ContextId, Error, Result};

/// Agent lifecycle state.
///
/// State transitions:
/// ```text
/// CREATED → INITIALIZING → ALIVE → DESTROYING → DESTROYED
///     ↓           ↓
///           DESTROYING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Created,
    Initializing,
    Alive,
    Destroying,
    Destroyed,
}

impl AgentState {
    /// Check if this is the terminal state.
    pub fn is_terminal(self) -> bool {
        self == AgentState::Destroyed
    }

    /// Check if destruction can still be requested from this state.
    pub fn accepts_destruction(self) -> bool {
        matches!(
            self,
            AgentState::Created | AgentState::Initializing | AgentState::Alive
        )
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: AgentState) -> bool {
        match (self, to) {
            // CREATED
            (AgentState::Created, AgentState::Initializing) => true,
            // killAgent before Initialize was ever delivered
            (AgentState::Created, AgentState::Destroying) => true,
            // INITIALIZING
            (AgentState::Initializing, AgentState::Alive) => true,
            (AgentState::Initializing, AgentState::Destroying) => true,
            // ALIVE
            (AgentState::Alive, AgentState::Destroying) => true,
            // DESTROYING
            (AgentState::Destroying, AgentState::Destroyed) => true,
            // DESTROYED is terminal
            _ => false,
        }
    }
}

/// Kernel record for one hosted agent.
///
/// State is mutated only through the lifecycle manager; the destruction flag
/// is the atomic test-and-set that makes `kill_me` idempotent. The behavior
/// registry is owned exclusively by this agent and never changes after
/// construction.
pub struct Agent {
    id: AgentId,
    parent: Option<AgentId>,
    context: ContextId,
    state: Mutex<AgentState>,
    destruction_requested: AtomicBool,
    registry: BehaviorRegistry,
    spawned_at: DateTime<Utc>,
}

impl Agent {
    pub(crate) fn new(
        id: AgentId,
        parent: Option<AgentId>,
        context: ContextId,
        registry: BehaviorRegistry,
    ) -> Self {
        Self {
            id,
            parent,
            context,
            state: Mutex::new(AgentState::Created),
            destruction_requested: AtomicBool::new(false),
            registry,
            spawned_at: Utc::now(),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn parent(&self) -> Option<AgentId> {
        self.parent
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether destruction has been accepted for this agent.
    pub fn destruction_requested(&self) -> bool {
        self.destruction_requested.load(Ordering::SeqCst)
    }

    /// Atomic test-and-set on the destruction flag.
    ///
    /// Returns true exactly once, for the first caller; every later call,
    /// concurrent or reentrant, observes false and must do nothing.
    pub(crate) fn request_destruction(&self) -> bool {
        self.destruction_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Transition to `to`, validating against the state machine.
    pub(crate) fn transition_to(&self, to: AgentState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(to) {
            return Err(Error::state_transition(format!(
                "agent {}: cannot transition {:?} -> {:?}",
                self.id, *state, to
            )));
        }
        *state = to;
        Ok(())
    }

    /// Transition to `to` only if the current state is `from`.
    ///
    /// Returns false (without error) otherwise; used for the
    /// Initializing → Alive step, which loses the race when an Initialize
    /// behavior unit already requested destruction.
    pub(crate) fn transition_if(&self, from: AgentState, to: AgentState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from && state.can_transition_to(to) {
            *state = to;
            true
        } else {
            false
        }
    }
}

// Manual Debug: the behavior registry holds closures.
impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("context", &self.context)
            .field("state", &self.state())
            .field("destruction_requested", &self.destruction_requested())
            .field("behavior_kinds", &self.registry.kind_count())
            .field("spawned_at", &self.spawned_at)
            .finish()
    }
}
