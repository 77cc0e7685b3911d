//! Service registry - dependency-ordered startup and shutdown of kernel
//! services.
//!
//! Features:
//!   - Registration with strong and weak dependency sets
//!   - Topological startup over strong dependencies, wave-concurrent where
//!     the graph permits
//!   - Weak dependencies as tie-breakers only (never a hard requirement,
//!     never a failure when absent)
//!   - Reverse-start-order shutdown
//!   - Cascading shutdown of dependents when a running service fails
//!
//! A cycle among strong dependencies or a missing strong dependency is fatal
//! at startup: the error names the offender and no service is started.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::types::{Error, Result, ServiceConfig};
use crate::validation::validate_non_empty;

/// A kernel-internal service with a managed lifecycle.
#[async_trait]
pub trait KernelService: Send + Sync {
    /// Unique service name; also the key other services use to depend on it.
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Lifecycle state of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ServiceState {
    pub fn is_running(self) -> bool {
        self == ServiceState::Running
    }
}

struct ServiceEntry {
    service: Arc<dyn KernelService>,
    state: ServiceState,
    strong_deps: Vec<String>,
    weak_deps: Vec<String>,
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.service.name())
            .field("state", &self.state)
            .field("strong_deps", &self.strong_deps)
            .field("weak_deps", &self.weak_deps)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// ServiceRegistry owns every kernel service for the process lifetime and
/// orders their start/stop transitions.
///
/// NOT a separate actor - the Kernel holds it behind a registry-wide mutex
/// taken during start/stop transitions only.
#[derive(Debug)]
pub struct ServiceRegistry {
    config: ServiceConfig,
    entries: HashMap<String, ServiceEntry>,
    /// Registration order; the deterministic tie-break of last resort.
    order: Vec<String>,
    /// Order in which services reached Running; shutdown walks it backwards.
    started_order: Vec<String>,
}

impl ServiceRegistry {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: Vec::new(),
            started_order: Vec::new(),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a service with its strong and weak dependency names.
    pub fn register(
        &mut self,
        service: Arc<dyn KernelService>,
        strong_deps: Vec<String>,
        weak_deps: Vec<String>,
    ) -> Result<()> {
        let name = service.name().to_string();
        validate_non_empty(&name, "service name")?;
        if self.entries.contains_key(&name) {
            return Err(Error::already_exists(format!(
                "service '{}' already registered",
                name
            )));
        }

        self.entries.insert(
            name.clone(),
            ServiceEntry {
                service,
                state: ServiceState::Stopped,
                strong_deps,
                weak_deps,
            },
        );
        self.order.push(name.clone());
        tracing::debug!("registered service {}", name);
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.entries.get(name).map(|entry| entry.state)
    }

    /// Service names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Order in which services reached Running.
    pub fn started_order(&self) -> &[String] {
        &self.started_order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state.is_running())
            .count()
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    /// Compute the startup waves.
    ///
    /// Each wave holds services whose strong dependencies are satisfied by
    /// earlier waves; members of one wave are mutually independent and start
    /// concurrently. A service whose registered weak dependency has not yet
    /// been placed is deferred to a later wave - unless deferring everyone
    /// would stall (a weak-only cycle), in which case registration order
    /// wins.
    ///
    /// Fails with `MissingDependency` or `CyclicDependency` before anything
    /// is started.
    pub fn startup_order(&self) -> Result<Vec<Vec<String>>> {
        for name in &self.order {
            if let Some(entry) = self.entries.get(name) {
                for dep in &entry.strong_deps {
                    if !self.entries.contains_key(dep) {
                        return Err(Error::missing_dependency(name.clone(), dep.clone()));
                    }
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(Error::cyclic_dependency(cycle));
        }

        let mut placed: HashSet<&str> = HashSet::new();
        let mut waves: Vec<Vec<String>> = Vec::new();
        while placed.len() < self.order.len() {
            let ready: Vec<&String> = self
                .order
                .iter()
                .filter(|name| !placed.contains(name.as_str()))
                .filter(|name| {
                    self.entries[name.as_str()]
                        .strong_deps
                        .iter()
                        .all(|dep| placed.contains(dep.as_str()))
                })
                .collect();

            if ready.is_empty() {
                // Unreachable after the cycle check; guard against stalls
                // instead of looping forever.
                return Err(Error::internal(
                    "service dependency resolution stalled".to_string(),
                ));
            }

            let preferred: Vec<&String> = ready
                .iter()
                .copied()
                .filter(|name| {
                    self.entries[name.as_str()].weak_deps.iter().all(|weak| {
                        !self.entries.contains_key(weak) || placed.contains(weak.as_str())
                    })
                })
                .collect();

            let wave = if preferred.is_empty() { ready } else { preferred };
            for name in &wave {
                placed.insert(name.as_str());
            }
            waves.push(wave.into_iter().cloned().collect());
        }

        Ok(waves)
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in &self.order {
            if let Some(cycle) = self.visit(name, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return None,
            Mark::InProgress => {
                let from = stack.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[from..].iter().map(|n| (*n).to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            Mark::Unvisited => {}
        }

        marks.insert(name, Mark::InProgress);
        stack.push(name);
        if let Some(entry) = self.entries.get(name) {
            for dep in &entry.strong_deps {
                if let Some(cycle) = self.visit(dep, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    // =========================================================================
    // Startup / shutdown
    // =========================================================================

    /// Start every registered service in dependency order.
    ///
    /// Services within one wave start concurrently. A start error marks the
    /// service Failed and aborts the remaining waves.
    pub async fn start_all(&mut self) -> Result<()> {
        let waves = self.startup_order()?;
        tracing::info!(
            "starting {} service(s) in {} wave(s)",
            self.entries.len(),
            waves.len()
        );

        for wave in waves {
            for name in &wave {
                if let Some(entry) = self.entries.get_mut(name) {
                    entry.state = ServiceState::Starting;
                }
            }

            let starts: Vec<_> = wave
                .iter()
                .filter_map(|name| {
                    let service = Arc::clone(&self.entries.get(name)?.service);
                    let name = name.clone();
                    Some(async move { (name, service.start().await) })
                })
                .collect();

            for (name, outcome) in futures::future::join_all(starts).await {
                match outcome {
                    Ok(()) => {
                        if let Some(entry) = self.entries.get_mut(&name) {
                            entry.state = ServiceState::Running;
                        }
                        self.started_order.push(name.clone());
                        tracing::info!("service {} running", name);
                    }
                    Err(err) => {
                        if let Some(entry) = self.entries.get_mut(&name) {
                            entry.state = ServiceState::Failed;
                        }
                        tracing::error!("service {} failed to start: {}", name, err);
                        return Err(Error::internal(format!(
                            "service '{}' failed to start: {}",
                            name, err
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Stop every running service, in exact reverse of the order services
    /// reached Running. Stop errors are logged and do not halt the walk.
    pub async fn stop_all(&mut self) {
        let order: Vec<String> = self.started_order.iter().rev().cloned().collect();
        for name in order {
            self.stop_one(&name).await;
        }
        self.started_order.clear();
    }

    /// Mark `name` Failed and stop every running service whose strong
    /// dependency closure includes it, in reverse start order.
    ///
    /// Returns the names that were stopped, in stop order.
    pub async fn notify_failed(&mut self, name: &str) -> Result<Vec<String>> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("unknown service: {}", name)))?;
        entry.state = ServiceState::Failed;
        tracing::error!("service {} failed; stopping dependent services", name);

        let closure = self.dependent_closure(name);
        let cascade: Vec<String> = self
            .started_order
            .iter()
            .rev()
            .filter(|candidate| closure.contains(candidate.as_str()))
            .cloned()
            .collect();

        for dependent in &cascade {
            self.stop_one(dependent).await;
        }
        self.started_order
            .retain(|n| n != name && !closure.contains(n.as_str()));
        Ok(cascade)
    }

    async fn stop_one(&mut self, name: &str) {
        let service = match self.entries.get_mut(name) {
            Some(entry) if entry.state.is_running() => {
                entry.state = ServiceState::Stopping;
                Arc::clone(&entry.service)
            }
            _ => return,
        };

        let grace = self.config.stop_grace;
        let begun = Instant::now();
        let outcome = service.stop().await;
        let elapsed = begun.elapsed();
        if elapsed > grace {
            tracing::warn!(
                "service {} took {:?} to stop (grace period {:?})",
                name,
                elapsed,
                grace
            );
        }

        if let Some(entry) = self.entries.get_mut(name) {
            match outcome {
                Ok(()) => {
                    entry.state = ServiceState::Stopped;
                    tracing::info!("service {} stopped", name);
                }
                Err(err) => {
                    entry.state = ServiceState::Failed;
                    tracing::error!("service {} failed to stop: {}", name, err);
                }
            }
        }
    }

    /// Services whose strong-dependency closure includes `name`.
    fn dependent_closure(&self, name: &str) -> HashSet<String> {
        let mut closure: HashSet<String> = HashSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for (candidate, entry) in &self.entries {
                if entry.strong_deps.iter().any(|dep| dep == &current)
                    && closure.insert(candidate.clone())
                {
                    frontier.push(candidate.clone());
                }
            }
        }
        closure
    }
}
