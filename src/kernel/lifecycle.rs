//! Agent lifecycle management.
//!
//! Owns the agent table and drives the lifecycle state machine:
//! CREATED → INITIALIZING → ALIVE → DESTROYING → DESTROYED.
//!
//! The destruction protocol is the delicate part. `try_begin_destruction`
//! performs the atomic test-and-set that makes `kill_me` idempotent: exactly
//! one caller wins the flag and moves the agent to Destroying; everyone else
//! gets a silent no-op, even when racing from inside the agent's own
//! Initialize behavior. The Destroy dispatch itself is the kernel's job;
//! the manager only hands the winner the agent record.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::{Agent, AgentState};
use crate::types::{AgentId, Error, Result};

/// Lifecycle manager - the kernel's agent table and state machine driver.
///
/// NOT a separate actor - owned by the Kernel and shared behind its `Arc`.
#[derive(Debug, Default)]
pub struct LifecycleManager {
    agents: RwLock<HashMap<AgentId, Arc<Agent>>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly constructed agent (Created state).
    pub async fn insert(&self, agent: Arc<Agent>) -> Result<()> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id()) {
            return Err(Error::already_exists(format!(
                "agent {} is already registered",
                agent.id()
            )));
        }
        agents.insert(agent.id(), agent);
        Ok(())
    }

    /// Get an agent by id.
    pub async fn get(&self, id: &AgentId) -> Option<Arc<Agent>> {
        self.agents.read().await.get(id).cloned()
    }

    /// CREATED → INITIALIZING, at Initialize delivery.
    pub async fn begin_initialize(&self, id: &AgentId) -> Result<Arc<Agent>> {
        let agent = self
            .get(id)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown agent: {}", id)))?;
        agent.transition_to(AgentState::Initializing)?;
        Ok(agent)
    }

    /// INITIALIZING → ALIVE, once the Initialize dispatch has been scheduled.
    ///
    /// Returns false without error when the agent already left Initializing;
    /// an Initialize behavior unit may have requested destruction first.
    pub async fn mark_alive(&self, id: &AgentId) -> bool {
        match self.get(id).await {
            Some(agent) => agent.transition_if(AgentState::Initializing, AgentState::Alive),
            None => false,
        }
    }

    /// First half of the destruction protocol: atomic test-and-set.
    ///
    /// - `Err(NotFound)` for an unknown agent (already destroyed included)
    /// - `Ok(None)` when destruction was already requested: the silent no-op
    /// - `Ok(Some(agent))` for the single winner, with the agent now in
    ///   Destroying; the caller must dispatch Destroy and then call
    ///   `complete_destruction`
    pub async fn try_begin_destruction(&self, id: &AgentId) -> Result<Option<Arc<Agent>>> {
        let agent = self
            .get(id)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown agent: {}", id)))?;

        if !agent.request_destruction() {
            return Ok(None);
        }

        agent.transition_to(AgentState::Destroying)?;
        tracing::debug!("agent {} entering destruction", id);
        Ok(Some(agent))
    }

    /// Second half: DESTROYING → DESTROYED, after the Destroy event has been
    /// fully dispatched (all matched units scheduled). Drops the agent from
    /// the table; the id can never be resurrected.
    pub async fn complete_destruction(&self, id: &AgentId) -> Result<Arc<Agent>> {
        let agent = self
            .get(id)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown agent: {}", id)))?;
        agent.transition_to(AgentState::Destroyed)?;

        let mut agents = self.agents.write().await;
        agents.remove(id);
        tracing::debug!("agent {} destroyed", id);
        Ok(agent)
    }

    /// Snapshot of all live agent records.
    pub async fn live_agents(&self) -> Vec<Arc<Agent>> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Snapshot of all agent ids.
    pub async fn list(&self) -> Vec<AgentId> {
        self.agents.read().await.keys().copied().collect()
    }

    /// Count agents in the table.
    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Count agents currently in `state`.
    pub async fn count_by_state(&self, state: AgentState) -> usize {
        self.agents
            .read()
            .await
            .values()
            .filter(|agent| agent.state() == state)
            .count()
    }
}
