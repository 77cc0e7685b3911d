//! Kernel - the top-level orchestrator.
//!
//! The Kernel composes the plain-struct subsystems and exposes the public
//! runtime API:
//! ```text
//!                  ┌──────────────────────────────────┐
//!   spawn/kill  →  │              Kernel              │
//!   submit      →  │  ┌─────────┐  ┌──────────────┐   │
//!                  │  │Lifecycle│  │  Dispatcher  │   │
//!                  │  │ Manager │  │              │   │
//!                  │  └─────────┘  └──────────────┘   │
//!                  │  ┌─────────┐  ┌──────────────┐   │
//!                  │  │ Context │  │   Service    │   │
//!                  │  │ Service │  │   Registry   │   │
//!                  │  └─────────┘  └──────────────┘   │
//!                  └──────────────────────────────────┘
//! ```
//! Subsystems are owned by the Kernel and shared behind one `Arc`; agents
//! reach back in through [`AgentHandle`], which holds only an id and a weak
//! kernel reference - no ownership cycles.

pub mod lifecycle;
pub mod recovery;
pub mod services;
pub mod types;

pub use lifecycle::LifecycleManager;
pub use recovery::with_recovery;
pub use services::{KernelService, ServiceRegistry, ServiceState};
pub use types::{Agent, AgentState};

use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::behavior::AgentDefinition;
use crate::context::{ContextFactory, ContextService, DefaultContextFactory};
use crate::dispatch::Dispatcher;
use crate::events::Event;
use crate::observability::{LoggingService, TracingLogger};
use crate::types::{AgentId, Config, ContextId, Error, Result, SpaceId};

/// Builder for [`Kernel`].
///
/// Collaborators are plain trait objects handed in here - no container
/// wiring. Omitted collaborators fall back to the defaults.
#[derive(Debug)]
pub struct KernelBuilder {
    config: Config,
    factory: Arc<dyn ContextFactory>,
    logger: Arc<dyn LoggingService>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            factory: Arc::new(DefaultContextFactory),
            logger: Arc::new(TracingLogger),
        }
    }
}

impl KernelBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn context_factory(mut self, factory: Arc<dyn ContextFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn LoggingService>) -> Self {
        self.logger = logger;
        self
    }

    /// Build the kernel and create its root context.
    pub async fn build(self) -> Result<Kernel> {
        let contexts = ContextService::new(Arc::clone(&self.factory));
        let root = contexts.create_context(ContextId::new(), true).await?;

        let inner = Arc::new(KernelInner {
            root_context: root.id(),
            root_space: root.default_space(),
            dispatcher: Dispatcher::new(Arc::clone(&self.logger)),
            logger: self.logger,
            services: Mutex::new(ServiceRegistry::new(self.config.services.clone())),
            config: self.config,
            contexts,
            lifecycle: LifecycleManager::new(),
            shutdown: CancellationToken::new(),
        });

        tracing::info!("kernel ready; root context {}", root.id());
        Ok(Kernel { inner })
    }
}

#[derive(Debug)]
struct KernelInner {
    config: Config,
    logger: Arc<dyn LoggingService>,
    contexts: ContextService,
    lifecycle: LifecycleManager,
    dispatcher: Dispatcher,
    services: Mutex<ServiceRegistry>,
    root_context: ContextId,
    root_space: SpaceId,
    shutdown: CancellationToken,
}

impl KernelInner {
    /// Fan an event out to a snapshot of a space's membership.
    async fn emit(
        &self,
        space_id: &SpaceId,
        event: Arc<Event>,
        scope: Option<&(dyn Fn(&AgentId) -> bool + Sync)>,
    ) -> Result<usize> {
        let space = self
            .contexts
            .space(space_id)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown space: {}", space_id)))?;

        let snapshot = space.participants().await;
        let mut delivered = 0;
        for member in snapshot {
            if let Some(filter) = scope {
                if !filter(&member) {
                    continue;
                }
            }
            if let Some(agent) = self.lifecycle.get(&member).await {
                self.dispatcher.dispatch(&agent, Arc::clone(&event));
                delivered += 1;
            }
        }

        tracing::debug!(
            "emitted {} to space {}: {} recipient(s)",
            event.kind,
            space_id,
            delivered
        );
        Ok(delivered)
    }

    /// The destruction protocol.
    ///
    /// `try_begin_destruction` is the atomic test-and-set: exactly one caller
    /// per agent gets past it. The winner dispatches Destroy (full dispatch =
    /// all matched units scheduled), completes the state machine, then scrubs
    /// the agent from every space of its context.
    async fn destroy_agent(&self, id: &AgentId) -> Result<()> {
        let Some(agent) = self.lifecycle.try_begin_destruction(id).await? else {
            // Destruction already requested: silently absorbed.
            return Ok(());
        };

        let destroy = Arc::new(Event::destroy(*id));
        self.dispatcher.dispatch(&agent, destroy);

        self.lifecycle.complete_destruction(id).await?;
        self.contexts
            .remove_agent_everywhere(&agent.context(), id)
            .await;

        // The subject is already out of the membership sets, so this cannot
        // reach the destroyed agent.
        if let Some(ctx) = self.contexts.context(&agent.context()).await {
            let killed = Arc::new(Event::agent_killed(*id));
            self.emit(&ctx.default_space(), killed, None).await?;
        }

        tracing::info!("agent {} destroyed", id);
        Ok(())
    }
}

/// Handle given to an agent's compiled behaviors.
///
/// Identifier-based: holds the agent id plus a weak kernel reference, so
/// closures capturing it never keep the kernel (or the agent) alive.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    id: AgentId,
    kernel: Weak<KernelInner>,
}

impl AgentHandle {
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Request self-destruction.
    ///
    /// Idempotent by construction: the first accepted call triggers exactly
    /// one Destroy delivery; every later call - concurrent, reentrant, or
    /// from inside the Initialize behavior - is silently absorbed. Calling
    /// through a handle that outlived its kernel is a no-op.
    pub async fn kill_me(&self) {
        let Some(kernel) = self.kernel.upgrade() else {
            return;
        };
        match kernel.destroy_agent(&self.id).await {
            Ok(()) => {}
            // Already destroyed and dropped from the table.
            Err(Error::NotFound(_)) => {}
            Err(err) => kernel.logger.log(
                Level::WARN,
                &format!("kill_me for agent {} failed: {}", self.id, err),
            ),
        }
    }

    /// Emit an event into a space of this agent's context.
    pub async fn emit(&self, space: &SpaceId, event: Event) -> Result<usize> {
        let Some(kernel) = self.kernel.upgrade() else {
            return Err(Error::cancelled("kernel has shut down"));
        };
        kernel.emit(space, Arc::new(event), None).await
    }

    /// Default space of this agent's context, while the agent is alive.
    pub async fn default_space(&self) -> Option<SpaceId> {
        let kernel = self.kernel.upgrade()?;
        let agent = kernel.lifecycle.get(&self.id).await?;
        let ctx = kernel.contexts.context(&agent.context()).await?;
        Some(ctx.default_space())
    }
}

/// The runtime kernel. Cheap to clone; all clones share one state.
#[derive(Debug, Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn root_context_id(&self) -> ContextId {
        self.inner.root_context
    }

    pub fn root_space_id(&self) -> SpaceId {
        self.inner.root_space
    }

    /// Context and space registries (child contexts, extra spaces,
    /// join/leave).
    pub fn contexts(&self) -> &ContextService {
        &self.inner.contexts
    }

    // =========================================================================
    // Agent lifecycle
    // =========================================================================

    /// Spawn an agent into the root context.
    pub async fn spawn_agent(
        &self,
        definition: &dyn AgentDefinition,
        parent: Option<AgentId>,
    ) -> Result<AgentId> {
        self.spawn_agent_in(definition, parent, self.inner.root_context)
            .await
    }

    /// Spawn an agent into a specific context: allocate the id, build the
    /// behavior registry from the compiled definition, join the context's
    /// default space, announce the newcomer, then drive Initialize.
    pub async fn spawn_agent_in(
        &self,
        definition: &dyn AgentDefinition,
        parent: Option<AgentId>,
        context: ContextId,
    ) -> Result<AgentId> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::cancelled("kernel is shutting down"));
        }
        let ctx = self
            .inner
            .contexts
            .context(&context)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown context: {}", context)))?;

        let id = AgentId::new();
        let handle = AgentHandle {
            id,
            kernel: Arc::downgrade(&self.inner),
        };
        let registry = definition.behaviors(handle);
        let agent = Arc::new(Agent::new(id, parent, context, registry));
        self.inner.lifecycle.insert(Arc::clone(&agent)).await?;

        self.inner
            .contexts
            .join(&ctx.default_space(), id, &context)
            .await?;

        // Existing members learn about the newcomer; the newcomer itself
        // receives Initialize instead.
        let spawned = Arc::new(Event::agent_spawned(id));
        self.inner
            .emit(
                &ctx.default_space(),
                spawned,
                Some(&|member: &AgentId| *member != id),
            )
            .await?;

        match self.inner.lifecycle.begin_initialize(&id).await {
            Ok(agent) => {
                let init = Arc::new(Event::initialize(id));
                self.inner.dispatcher.dispatch(&agent, init);
                self.inner.lifecycle.mark_alive(&id).await;
            }
            Err(err) => {
                // Losing this race legitimately requires the destruction
                // flag to be set already; anything else is a real error.
                if !agent.destruction_requested() {
                    return Err(err);
                }
            }
        }

        tracing::info!("spawned agent {} in context {}", id, context);
        Ok(id)
    }

    /// Destroy an agent on behalf of the kernel or a parent.
    ///
    /// Repeated calls while destruction is in flight are silently absorbed;
    /// an id the kernel no longer knows is `NotFound`.
    pub async fn kill_agent(&self, id: &AgentId) -> Result<()> {
        self.inner.destroy_agent(id).await
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Emit an event to every current member of a space.
    pub async fn submit_event(&self, event: Event, space: &SpaceId) -> Result<usize> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::cancelled("kernel is shutting down"));
        }
        self.inner.emit(space, Arc::new(event), None).await
    }

    /// Emit an event to the members of a space selected by `scope`.
    pub async fn submit_event_scoped<F>(
        &self,
        event: Event,
        space: &SpaceId,
        scope: F,
    ) -> Result<usize>
    where
        F: Fn(&AgentId) -> bool + Sync,
    {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::cancelled("kernel is shutting down"));
        }
        self.inner.emit(space, Arc::new(event), Some(&scope)).await
    }

    // =========================================================================
    // Kernel services
    // =========================================================================

    pub async fn register_service(
        &self,
        service: Arc<dyn KernelService>,
        strong_deps: Vec<String>,
        weak_deps: Vec<String>,
    ) -> Result<()> {
        self.inner
            .services
            .lock()
            .await
            .register(service, strong_deps, weak_deps)
    }

    /// Start all registered services in dependency order. Fatal errors
    /// (cycles, missing dependencies) surface here and nothing starts.
    pub async fn start_services(&self) -> Result<()> {
        self.inner.services.lock().await.start_all().await
    }

    /// Stop all running services in reverse start order.
    pub async fn stop_services(&self) {
        self.inner.services.lock().await.stop_all().await
    }

    /// Report a running service as failed, cascading shutdown to its strong
    /// dependents. Returns the stopped names in stop order.
    pub async fn notify_service_failed(&self, name: &str) -> Result<Vec<String>> {
        self.inner.services.lock().await.notify_failed(name).await
    }

    pub async fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.inner.services.lock().await.state(name)
    }

    // =========================================================================
    // Shutdown & introspection
    // =========================================================================

    /// Tear the kernel down: reject new work, destroy every remaining agent
    /// through the normal destruction protocol, then stop all services.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        tracing::info!("kernel shutdown requested");

        for agent in self.inner.lifecycle.live_agents().await {
            match self.inner.destroy_agent(&agent.id()).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!("agent {} teardown failed: {}", agent.id(), err);
                }
            }
        }

        self.stop_services().await;
        tracing::info!("kernel shutdown complete");
    }

    pub async fn agent_count(&self) -> usize {
        self.inner.lifecycle.count().await
    }

    pub async fn agent_state(&self, id: &AgentId) -> Option<AgentState> {
        self.inner
            .lifecycle
            .get(id)
            .await
            .map(|agent| agent.state())
    }

    pub async fn list_agents(&self) -> Vec<AgentId> {
        self.inner.lifecycle.list().await
    }

    pub async fn space_participants(&self, space: &SpaceId) -> Result<Vec<AgentId>> {
        let space = self
            .inner
            .contexts
            .space(space)
            .await
            .ok_or_else(|| Error::not_found(format!("unknown space: {}", space)))?;
        Ok(space.participants().await)
    }
}
