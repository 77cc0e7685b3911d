//! Spaces - scoped event channels with explicit membership.

use std::collections::HashSet;
use tokio::sync::Mutex;

use crate::types::{AgentId, ContextId, SpaceId};

/// A scoped event channel.
///
/// Membership changes are atomic under the per-space mutex: join and leave
/// are never partially visible. Emission takes a snapshot of the membership
/// and fans out to the snapshot, so an agent joining mid-emission may miss
/// that event and one leaving mid-emission may still receive it. That race
/// is part of the contract.
#[derive(Debug)]
pub struct Space {
    id: SpaceId,
    context: ContextId,
    members: Mutex<HashSet<AgentId>>,
}

impl Space {
    pub(crate) fn new(id: SpaceId, context: ContextId) -> Self {
        Self {
            id,
            context,
            members: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// The context this space belongs to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Add `agent` to the membership set. Returns false if already a member.
    pub async fn join(&self, agent: AgentId) -> bool {
        self.members.lock().await.insert(agent)
    }

    /// Remove `agent` from the membership set. Returns false if not a member.
    pub async fn leave(&self, agent: &AgentId) -> bool {
        self.members.lock().await.remove(agent)
    }

    pub async fn contains(&self, agent: &AgentId) -> bool {
        self.members.lock().await.contains(agent)
    }

    /// Consistent snapshot of the current membership.
    pub async fn participants(&self) -> Vec<AgentId> {
        self.members.lock().await.iter().copied().collect()
    }

    pub async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_and_leave_are_idempotent_per_membership() {
        let space = Space::new(SpaceId::new(), ContextId::new());
        let agent = AgentId::new();

        assert!(space.join(agent).await);
        assert!(!space.join(agent).await);
        assert!(space.contains(&agent).await);
        assert_eq!(space.member_count().await, 1);

        assert!(space.leave(&agent).await);
        assert!(!space.leave(&agent).await);
        assert_eq!(space.member_count().await, 0);
    }

    #[tokio::test]
    async fn participants_is_a_snapshot() {
        let space = Space::new(SpaceId::new(), ContextId::new());
        let first = AgentId::new();
        let second = AgentId::new();
        space.join(first).await;

        let snapshot = space.participants().await;
        space.join(second).await;

        assert_eq!(snapshot, vec![first]);
        assert_eq!(space.member_count().await, 2);
    }
}
