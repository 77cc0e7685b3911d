//! Core types for the Hive kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (AgentId, ContextId, SpaceId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the kernel and its services

mod config;
mod errors;
mod ids;

pub use config::{Config, ObservabilityConfig, ServiceConfig};
pub use errors::{Error, Result};
pub use ids::{AgentId, ContextId, SpaceId};
