//! # Hive Core - Multi-Agent Runtime Kernel
//!
//! Rust implementation of the Hive kernel providing:
//! - Agent lifecycle management with an idempotent destruction protocol
//! - Guarded event dispatch (guard evaluators select deferred behavior units)
//! - Hierarchical contexts and spaces scoping event visibility
//! - Dependency-ordered startup/shutdown of kernel services
//!
//! ## Architecture
//!
//! The kernel owns all mutable state; agents interact with it through
//! identifier-based handles:
//! ```text
//!   spawn_agent ─→ Kernel ─→ LifecycleManager (state machine)
//!                     │
//!   submit_event ─────┼────→ ContextService (spaces, membership)
//!                     │             │ snapshot
//!                     └────→ Dispatcher ─→ guard evaluators ─→ behavior
//!                                            (synchronous)      units
//!                                                            (worker pool)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod behavior;
pub mod context;
pub mod dispatch;
pub mod events;
pub mod kernel;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use kernel::{AgentHandle, Kernel, KernelBuilder};
pub use types::{Config, Error, Result};
