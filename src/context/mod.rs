//! Contexts and the context/space service.
//!
//! A context groups one default space plus any number of child spaces; the
//! root context is a per-kernel singleton. Contexts are built through the
//! [`ContextFactory`] collaborator so embedders can substitute their own
//! context type wiring - the kernel only ever calls `new_instance`.
//!
//! Everything here is id-keyed: contexts hold space ids, spaces hold agent
//! ids, and lookups go through the service registries. No object graph, no
//! reference cycles.

mod space;

pub use space::Space;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::types::{AgentId, ContextId, Error, Result, SpaceId};

/// A scope grouping spaces and the agents that may join them.
#[derive(Debug)]
pub struct Context {
    id: ContextId,
    is_root: bool,
    default_space: SpaceId,
    spaces: RwLock<HashSet<SpaceId>>,
}

impl Context {
    /// Build a context record. Exposed for [`ContextFactory`] implementors;
    /// agents and the kernel obtain contexts through the service.
    pub fn new(id: ContextId, default_space: SpaceId, is_root: bool) -> Self {
        let mut spaces = HashSet::new();
        spaces.insert(default_space);
        Self {
            id,
            is_root,
            default_space,
            spaces: RwLock::new(spaces),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn default_space(&self) -> SpaceId {
        self.default_space
    }

    /// Snapshot of every space id in this context, default space included.
    pub async fn space_ids(&self) -> Vec<SpaceId> {
        self.spaces.read().await.iter().copied().collect()
    }

    async fn add_space(&self, space: SpaceId) {
        self.spaces.write().await.insert(space);
    }
}

/// Wiring collaborator constructing context instances.
///
/// The kernel never constructs contexts directly; tests substitute fakes
/// here instead of mocking an injector.
pub trait ContextFactory: Send + Sync + fmt::Debug {
    fn new_instance(&self, id: ContextId, default_space: SpaceId, is_root: bool) -> Context;
}

/// Factory producing plain [`Context`] records.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextFactory;

impl ContextFactory for DefaultContextFactory {
    fn new_instance(&self, id: ContextId, default_space: SpaceId, is_root: bool) -> Context {
        Context::new(id, default_space, is_root)
    }
}

/// Context and space registries plus membership rules.
///
/// Root uniqueness is enforced here: the second root creation fails with
/// `AlreadyExists` while the first stays retrievable for the kernel's whole
/// life.
pub struct ContextService {
    factory: Arc<dyn ContextFactory>,
    contexts: RwLock<HashMap<ContextId, Arc<Context>>>,
    spaces: RwLock<HashMap<SpaceId, Arc<Space>>>,
    // Mutex rather than a flag: root check-and-create must be atomic.
    root: Mutex<Option<ContextId>>,
}

impl ContextService {
    pub fn new(factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            factory,
            contexts: RwLock::new(HashMap::new()),
            spaces: RwLock::new(HashMap::new()),
            root: Mutex::new(None),
        }
    }

    /// Create a context with a fresh default space.
    ///
    /// `is_root = true` fails with `AlreadyExists` if a root context exists
    /// already; so does reusing a context id.
    pub async fn create_context(&self, id: ContextId, is_root: bool) -> Result<Arc<Context>> {
        let mut root = self.root.lock().await;
        if is_root {
            if let Some(existing) = *root {
                return Err(Error::already_exists(format!(
                    "root context {} already exists",
                    existing
                )));
            }
        }

        {
            let contexts = self.contexts.read().await;
            if contexts.contains_key(&id) {
                return Err(Error::already_exists(format!("context {} already exists", id)));
            }
        }

        let default_space_id = SpaceId::new();
        let context = Arc::new(self.factory.new_instance(id, default_space_id, is_root));
        let default_space = Arc::new(Space::new(default_space_id, id));

        self.spaces
            .write()
            .await
            .insert(default_space_id, default_space);
        self.contexts.write().await.insert(id, Arc::clone(&context));

        if is_root {
            *root = Some(id);
        }

        tracing::debug!(
            "created context {} (root={}) with default space {}",
            id,
            is_root,
            default_space_id
        );
        Ok(context)
    }

    /// The root context, if one has been created.
    pub async fn root_context(&self) -> Option<Arc<Context>> {
        let root = *self.root.lock().await;
        match root {
            Some(id) => self.context(&id).await,
            None => None,
        }
    }

    pub async fn context(&self, id: &ContextId) -> Option<Arc<Context>> {
        self.contexts.read().await.get(id).cloned()
    }

    /// Create an additional space inside `context`.
    pub async fn create_space(&self, context: &ContextId) -> Result<Arc<Space>> {
        let ctx = self
            .context(context)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown context: {}", context)))?;

        let space = Arc::new(Space::new(SpaceId::new(), *context));
        self.spaces.write().await.insert(space.id(), Arc::clone(&space));
        ctx.add_space(space.id()).await;

        tracing::debug!("created space {} in context {}", space.id(), context);
        Ok(space)
    }

    pub async fn space(&self, id: &SpaceId) -> Option<Arc<Space>> {
        self.spaces.read().await.get(id).cloned()
    }

    /// Every space of `context`, default space included.
    pub async fn spaces_of(&self, context: &ContextId) -> Vec<Arc<Space>> {
        let ids = match self.context(context).await {
            Some(ctx) => ctx.space_ids().await,
            None => return Vec::new(),
        };
        let spaces = self.spaces.read().await;
        ids.iter().filter_map(|id| spaces.get(id).cloned()).collect()
    }

    /// Join `agent` to a space.
    ///
    /// Enforces the scoping invariant: an agent may only join spaces of its
    /// own context.
    pub async fn join(
        &self,
        space: &SpaceId,
        agent: AgentId,
        agent_context: &ContextId,
    ) -> Result<bool> {
        let space = self
            .space(space)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown space: {}", space)))?;

        if space.context() != *agent_context {
            return Err(Error::validation(format!(
                "agent {} belongs to context {}, not to space {}'s context {}",
                agent,
                agent_context,
                space.id(),
                space.context()
            )));
        }

        Ok(space.join(agent).await)
    }

    /// Remove `agent` from a space.
    pub async fn leave(&self, space: &SpaceId, agent: &AgentId) -> Result<bool> {
        let space = self
            .space(space)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown space: {}", space)))?;
        Ok(space.leave(agent).await)
    }

    /// Remove `agent` from every space of `context` - one atomic batch per
    /// space. Called by the kernel when an agent reaches Destroyed.
    pub async fn remove_agent_everywhere(&self, context: &ContextId, agent: &AgentId) {
        for space in self.spaces_of(context).await {
            space.leave(agent).await;
        }
    }

    pub async fn context_count(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn space_count(&self) -> usize {
        self.spaces.read().await.len()
    }
}

impl fmt::Debug for ContextService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextService")
            .field("factory", &self.factory)
            .finish()
    }
}
