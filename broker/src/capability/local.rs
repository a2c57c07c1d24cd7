//! The host-side in-memory capability directory

use async_trait::async_trait;
use parking_lot::RwLock;
use silta_core::{
    CapabilitiesRegistry, Capability, CapabilityError, CapabilityInfo, CapabilityType,
    CallbackCapability, TriggerCapability,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

struct Registered {
    capability: Capability,
    info: CapabilityInfo,
}

/// In-memory [`CapabilitiesRegistry`], keyed by capability id.
///
/// Typically populated at startup (or by a [`RegistryServer`](super::RegistryServer)
/// receiving remote adds) and then read-mostly.
pub struct LocalRegistry {
    capabilities: RwLock<HashMap<String, Registered>>,
}

impl LocalRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Number of registered capabilities.
    pub fn capability_count(&self) -> usize {
        self.capabilities.read().len()
    }

    /// Whether a capability with this id is registered.
    pub fn has_capability(&self, id: &str) -> bool {
        self.capabilities.read().contains_key(id)
    }

    fn lookup(&self, id: &str) -> Result<(Capability, CapabilityInfo), CapabilityError> {
        let capabilities = self.capabilities.read();
        let registered = capabilities.get(id).ok_or_else(|| CapabilityError::NotFound {
            id: id.to_string(),
        })?;
        Ok((registered.capability.clone(), registered.info.clone()))
    }

    /// Look up a callback capability, re-validating its declared kind.
    fn callback_of_kind(
        &self,
        id: &str,
        kind: CapabilityType,
    ) -> Result<Arc<dyn CallbackCapability>, CapabilityError> {
        let (capability, info) = self.lookup(id)?;
        if info.capability_type() != kind {
            return Err(CapabilityError::WrongType {
                id: id.to_string(),
                requested: kind.as_str_name().to_string(),
                actual: info.capability_type().as_str_name().to_string(),
            });
        }
        match capability {
            Capability::Callback(callback) => Ok(callback),
            Capability::Trigger(_) => Err(CapabilityError::WrongType {
                id: id.to_string(),
                requested: kind.as_str_name().to_string(),
                actual: CapabilityType::Trigger.as_str_name().to_string(),
            }),
        }
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilitiesRegistry for LocalRegistry {
    async fn get(&self, id: &str) -> Result<Capability, CapabilityError> {
        self.lookup(id).map(|(capability, _)| capability)
    }

    async fn get_trigger(&self, id: &str) -> Result<Arc<dyn TriggerCapability>, CapabilityError> {
        let (capability, info) = self.lookup(id)?;
        match capability {
            Capability::Trigger(trigger) if info.capability_type() == CapabilityType::Trigger => {
                Ok(trigger)
            }
            _ => Err(CapabilityError::WrongType {
                id: id.to_string(),
                requested: CapabilityType::Trigger.as_str_name().to_string(),
                actual: info.capability_type().as_str_name().to_string(),
            }),
        }
    }

    async fn get_action(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, CapabilityError> {
        self.callback_of_kind(id, CapabilityType::Action)
    }

    async fn get_consensus(
        &self,
        id: &str,
    ) -> Result<Arc<dyn CallbackCapability>, CapabilityError> {
        self.callback_of_kind(id, CapabilityType::Consensus)
    }

    async fn get_target(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, CapabilityError> {
        self.callback_of_kind(id, CapabilityType::Target)
    }

    async fn list(&self) -> Result<Vec<Capability>, CapabilityError> {
        Ok(self
            .capabilities
            .read()
            .values()
            .map(|registered| registered.capability.clone())
            .collect())
    }

    async fn add(&self, capability: Capability) -> Result<(), CapabilityError> {
        let info = capability.info().await?;
        if info.id.is_empty() {
            return Err(CapabilityError::InvalidInfo(
                "capability id is required".to_string(),
            ));
        }
        let declared = info.capability_type();
        if declared == CapabilityType::Unspecified {
            return Err(CapabilityError::InvalidType(info.capability_type));
        }
        // The declared type must match the executable API the value
        // actually implements; a mismatch registers nothing.
        if !capability.conforms_to(declared) {
            return Err(CapabilityError::TypeMismatch {
                id: info.id,
                declared: declared.as_str_name().to_string(),
                implemented: capability.implemented_api().to_string(),
            });
        }

        let mut capabilities = self.capabilities.write();
        if capabilities.contains_key(&info.id) {
            return Err(CapabilityError::AlreadyExists { id: info.id });
        }
        info!(
            id = %info.id,
            capability_type = declared.as_str_name(),
            version = %info.version,
            "registered capability"
        );
        capabilities.insert(info.id.clone(), Registered { capability, info });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use silta_core::{CapabilityRequest, CapabilityResponse};

    /// A callback capability with a scriptable declared type.
    struct FakeCallback {
        info: CapabilityInfo,
    }

    #[async_trait]
    impl silta_core::BaseCapability for FakeCallback {
        async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
            Ok(self.info.clone())
        }
    }

    #[async_trait]
    impl CallbackCapability for FakeCallback {
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

    fn callback(id: &str, capability_type: CapabilityType) -> Capability {
        Capability::Callback(Arc::new(FakeCallback {
            info: CapabilityInfo {
                id: id.to_string(),
                capability_type: capability_type as i32,
                description: "fake".to_string(),
                version: "1.0.0".to_string(),
            },
        }))
    }

    #[tokio::test]
    async fn test_add_and_get_round_trip() {
        let registry = LocalRegistry::new();
        registry.add(callback("write@1.0.0", CapabilityType::Target)).await.unwrap();

        assert!(registry.has_capability("write@1.0.0"));
        assert_eq!(registry.capability_count(), 1);

        let capability = registry.get("write@1.0.0").await.unwrap();
        let info = capability.info().await.unwrap();
        assert_eq!(info.capability_type(), CapabilityType::Target);
    }

    #[tokio::test]
    async fn test_add_rejects_declared_trigger_with_callback_api() {
        // The capability claims to be a trigger but only implements the
        // callback API: hard error, nothing registered.
        let registry = LocalRegistry::new();
        let err = registry
            .add(callback("liar@1.0.0", CapabilityType::Trigger))
            .await
            .unwrap_err();

        assert!(matches!(err, CapabilityError::TypeMismatch { .. }));
        assert!(!registry.has_capability("liar@1.0.0"));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_unspecified_type() {
        let registry = LocalRegistry::new();
        let err = registry
            .add(callback("vague@1.0.0", CapabilityType::Unspecified))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidType(_)));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_id() {
        let registry = LocalRegistry::new();
        registry.add(callback("dup@1.0.0", CapabilityType::Action)).await.unwrap();

        let err = registry
            .add(callback("dup@1.0.0", CapabilityType::Action))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::AlreadyExists { .. }));
        assert_eq!(registry.capability_count(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_empty_id() {
        let registry = LocalRegistry::new();
        let err = registry
            .add(callback("", CapabilityType::Action))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidInfo(_)));
    }

    #[tokio::test]
    async fn test_typed_getters_revalidate_kind() {
        let registry = LocalRegistry::new();
        registry.add(callback("act@1.0.0", CapabilityType::Action)).await.unwrap();

        assert!(registry.get_action("act@1.0.0").await.is_ok());

        // Same id through the wrong getters is an error, never a coercion.
        assert!(matches!(
            registry.get_consensus("act@1.0.0").await.unwrap_err(),
            CapabilityError::WrongType { .. }
        ));
        assert!(matches!(
            registry.get_target("act@1.0.0").await.unwrap_err(),
            CapabilityError::WrongType { .. }
        ));
        assert!(matches!(
            registry.get_trigger("act@1.0.0").await.unwrap_err(),
            CapabilityError::WrongType { .. }
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let registry = LocalRegistry::new();
        assert!(matches!(
            registry.get("ghost@0.0.0").await.unwrap_err(),
            CapabilityError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_list_returns_everything() {
        let registry = LocalRegistry::new();
        registry.add(callback("a@1.0.0", CapabilityType::Action)).await.unwrap();
        registry.add(callback("b@1.0.0", CapabilityType::Target)).await.unwrap();

        assert_eq!(registry.list().await.unwrap().len(), 2);
    }
}
