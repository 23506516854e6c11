//! Reconciliation core for Ytsaurus clusters
//!
//! Every cluster role is a [`Component`] built from a [`RoleDescriptor`] and
//! driven by one generic engine. The [`Orchestrator`] evaluates components in
//! dependency order once per tick and advances the cluster state machine.

#![deny(missing_docs)]

pub mod balancer;
pub mod component;
pub mod graph;
pub mod orchestrator;
pub mod platform;
pub mod roles;
pub mod server;

#[cfg(test)]
mod testing;

pub use component::{ClusterView, Component, ComponentId, ServerComponent, SyncStatus};
pub use graph::ComponentGraph;
pub use orchestrator::{ClusterProgress, Orchestrator, StatusReport, TickOutcome};
pub use platform::{KubePlatform, PlatformClient};
pub use roles::{build_components, descriptors, RoleDescriptor, UpdateScope};
