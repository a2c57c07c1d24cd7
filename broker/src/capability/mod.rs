//! Capabilities over broker connections
//!
//! Everything needed to move a [`Capability`](silta_core::Capability) across
//! the process boundary:
//!
//! - [`serve_capability`] wraps a capability as a freshly served connection
//!   exposing its base-info service plus the type-specific executable
//!   service.
//! - [`TriggerCapabilityClient`] / [`CallbackCapabilityClient`] implement
//!   the capability traits against such a connection.
//! - [`LocalRegistry`] is the host-side in-memory directory;
//!   [`RegistryServer`] fronts any registry over gRPC and
//!   [`RegistryClient`] consumes one.

mod client;
mod local;
mod registry;
mod server;
mod trigger;

pub use client::{CallbackCapabilityClient, TriggerCapabilityClient};
pub use local::LocalRegistry;
pub use registry::{RegistryClient, RegistryServer};
pub use server::{serve_capability, CallbackExecutableService, TriggerExecutableService};
