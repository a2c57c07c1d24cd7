//! Capability traits and the tagged capability value
//!
//! A capability is a named, versioned, typed remote object. Triggers push
//! events to their registrants over a channel; actions, consensus and target
//! capabilities all execute through the request/response callback API.
//!
//! Run-time type conformance is modelled as a tagged union: a value enters
//! the system as either [`Capability::Trigger`] or [`Capability::Callback`],
//! and registries check that tag against the type declared in the value's
//! own [`CapabilityInfo`] before anything is registered or handed out.

use crate::error::CapabilityError;
use crate::proto::{
    CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType, ExecuteApiType,
    TriggerRegistrationRequest, TriggerResponse,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the per-registration trigger event channel.
///
/// Rendezvous-sized: the producing side blocks until the consumer takes the
/// previous event, giving per-event backpressure end to end.
pub const TRIGGER_CHANNEL_CAPACITY: usize = 1;

/// Identity surface every capability implements.
#[async_trait]
pub trait BaseCapability: Send + Sync {
    /// The capability's declared identity.
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError>;
}

/// A capability that pushes events to registrants.
#[async_trait]
pub trait TriggerCapability: BaseCapability {
    /// Register interest in this trigger. Events arrive on the returned
    /// channel until [`unregister_trigger`](Self::unregister_trigger) is
    /// called or the trigger closes the channel itself.
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError>;

    /// Cancel a previous registration. The registration's channel is closed.
    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError>;
}

/// A capability executed through the request/response callback API
/// (actions, consensus and targets).
#[async_trait]
pub trait CallbackCapability: BaseCapability {
    /// Execute one request against this capability.
    async fn execute(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError>;
}

/// A capability value, tagged by the executable API it implements.
#[derive(Clone)]
pub enum Capability {
    /// A trigger: registers interest, pushes events.
    Trigger(Arc<dyn TriggerCapability>),
    /// An action, consensus or target: executes request/response calls.
    Callback(Arc<dyn CallbackCapability>),
}

impl Capability {
    /// The capability's declared identity.
    pub async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        match self {
            Capability::Trigger(t) => t.info().await,
            Capability::Callback(c) => c.info().await,
        }
    }

    /// The coarse executable API this value implements.
    pub fn execute_api_type(&self) -> ExecuteApiType {
        match self {
            Capability::Trigger(_) => ExecuteApiType::Trigger,
            Capability::Callback(_) => ExecuteApiType::Callback,
        }
    }

    /// Whether this value implements the executable API implied by the
    /// declared capability type. Trigger capabilities must be the trigger
    /// variant; action/consensus/target must be the callback variant.
    pub fn conforms_to(&self, declared: CapabilityType) -> bool {
        matches!(
            (self, declared),
            (Capability::Trigger(_), CapabilityType::Trigger)
                | (
                    Capability::Callback(_),
                    CapabilityType::Action | CapabilityType::Consensus | CapabilityType::Target,
                )
        )
    }

    /// Human-readable name of the API this value implements, for error
    /// messages.
    pub fn implemented_api(&self) -> &'static str {
        match self {
            Capability::Trigger(_) => "trigger-executable",
            Capability::Callback(_) => "callback-executable",
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Trigger(_) => f.write_str("Capability::Trigger"),
            Capability::Callback(_) => f.write_str("Capability::Callback"),
        }
    }
}

impl std::fmt::Debug for dyn TriggerCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TriggerCapability")
    }
}

impl std::fmt::Debug for dyn CallbackCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn CallbackCapability")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticInfo {
        info: CapabilityInfo,
    }

    #[async_trait]
    impl BaseCapability for StaticInfo {
        async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
            Ok(self.info.clone())
        }
    }

    #[async_trait]
    impl CallbackCapability for StaticInfo {
        async fn execute(
            &self,
            request: CapabilityRequest,
        ) -> Result<CapabilityResponse, CapabilityError> {
            Ok(CapabilityResponse {
                payload: request.payload,
                error: String::new(),
            })
        }
    }

    fn make_info(capability_type: CapabilityType) -> CapabilityInfo {
        CapabilityInfo {
            id: "test@1.0.0".to_string(),
            capability_type: capability_type as i32,
            description: "test capability".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn test_callback_conforms_to_action_consensus_target() {
        let cap = Capability::Callback(Arc::new(StaticInfo {
            info: make_info(CapabilityType::Action),
        }));

        assert!(cap.conforms_to(CapabilityType::Action));
        assert!(cap.conforms_to(CapabilityType::Consensus));
        assert!(cap.conforms_to(CapabilityType::Target));
        assert!(!cap.conforms_to(CapabilityType::Trigger));
        assert!(!cap.conforms_to(CapabilityType::Unspecified));
    }

    #[test]
    fn test_callback_execute_api_type() {
        let cap = Capability::Callback(Arc::new(StaticInfo {
            info: make_info(CapabilityType::Target),
        }));
        assert_eq!(cap.execute_api_type(), ExecuteApiType::Callback);
    }

    #[tokio::test]
    async fn test_capability_info_dispatch() {
        let cap = Capability::Callback(Arc::new(StaticInfo {
            info: make_info(CapabilityType::Consensus),
        }));

        let info = cap.info().await.expect("info should succeed");
        assert_eq!(info.id, "test@1.0.0");
        assert_eq!(info.capability_type(), CapabilityType::Consensus);
    }

    #[test]
    fn test_capability_type_accessor_rejects_out_of_range() {
        let info = CapabilityInfo {
            id: "weird".to_string(),
            capability_type: 99,
            description: String::new(),
            version: String::new(),
        };
        assert_eq!(info.capability_type(), CapabilityType::Unspecified);
    }
}
