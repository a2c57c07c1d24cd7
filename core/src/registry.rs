//! The capabilities registry contract
//!
//! A registry is a typed directory of capabilities. Hosts implement it over
//! local state; plugins see the same trait implemented over gRPC, so the
//! process boundary is invisible to consumers.

use crate::capability::{Capability, CallbackCapability, TriggerCapability};
use crate::error::CapabilityError;
use async_trait::async_trait;
use std::sync::Arc;

/// Typed directory of capabilities, keyed by capability id.
///
/// The type-specific getters re-validate the stored capability's declared
/// type: asking for an action by the id of a target is an error, never a
/// silent coercion.
#[async_trait]
pub trait CapabilitiesRegistry: Send + Sync {
    /// Look up a capability of any type.
    async fn get(&self, id: &str) -> Result<Capability, CapabilityError>;

    /// Look up a trigger capability.
    async fn get_trigger(&self, id: &str) -> Result<Arc<dyn TriggerCapability>, CapabilityError>;

    /// Look up an action capability.
    async fn get_action(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, CapabilityError>;

    /// Look up a consensus capability.
    async fn get_consensus(&self, id: &str)
        -> Result<Arc<dyn CallbackCapability>, CapabilityError>;

    /// Look up a target capability.
    async fn get_target(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, CapabilityError>;

    /// All registered capabilities.
    async fn list(&self) -> Result<Vec<Capability>, CapabilityError>;

    /// Register a capability. The declared `CapabilityInfo.capability_type`
    /// must match the executable API the value implements; a mismatch is a
    /// hard error and nothing is registered.
    async fn add(&self, capability: Capability) -> Result<(), CapabilityError>;
}
