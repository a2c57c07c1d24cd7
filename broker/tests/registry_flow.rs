//! Integration tests for the capability registry flow
//!
//! Exercises the full add/get/execute/trigger path between a "host" side
//! (local registry fronted by a registry server) and a "plugin" side
//! (registry client), multiplexed over one shared broker.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use silta_broker::{
    BrokerExt, LocalRegistry, RegistryClient, RegistryServer, Resources, Stopper, TcpBroker,
};
use silta_core::{
    BaseCapability, CapabilitiesRegistry, Capability, CapabilityError, CapabilityInfo,
    CapabilityRequest, CapabilityResponse, CapabilityType, CallbackCapability, TriggerCapability,
    TriggerEvent, TriggerRegistrationRequest, TriggerResponse, TRIGGER_CHANNEL_CAPACITY,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Test capabilities
// =============================================================================

/// Action capability that echoes the request payload back.
struct EchoAction {
    info: CapabilityInfo,
}

impl EchoAction {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            info: CapabilityInfo {
                id: "echo@1.0.0".to_string(),
                capability_type: CapabilityType::Action as i32,
                description: "echoes request payloads".to_string(),
                version: "1.0.0".to_string(),
            },
        })
    }
}

#[async_trait]
impl BaseCapability for EchoAction {
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(self.info.clone())
    }
}

#[async_trait]
impl CallbackCapability for EchoAction {
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

/// A capability that lies about its type: declares Trigger, implements the
/// callback API.
struct MislabeledCapability;

#[async_trait]
impl BaseCapability for MislabeledCapability {
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(CapabilityInfo {
            id: "liar@1.0.0".to_string(),
            capability_type: CapabilityType::Trigger as i32,
            description: "declares trigger, implements callback".to_string(),
            version: "1.0.0".to_string(),
        })
    }
}

#[async_trait]
impl CallbackCapability for MislabeledCapability {
    async fn execute(
        &self,
        _request: CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        Ok(CapabilityResponse::default())
    }
}

/// Trigger capability that fires a fixed number of events per registration.
struct TickTrigger {
    info: CapabilityInfo,
    fires: u32,
    active: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl TickTrigger {
    fn new(fires: u32) -> Arc<Self> {
        Arc::new(Self {
            info: CapabilityInfo {
                id: "tick@1.0.0".to_string(),
                capability_type: CapabilityType::Trigger as i32,
                description: "fires on an interval".to_string(),
                version: "1.0.0".to_string(),
            },
            fires,
            active: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl BaseCapability for TickTrigger {
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(self.info.clone())
    }
}

#[async_trait]
impl TriggerCapability for TickTrigger {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError> {
        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        self.active.lock().insert(request.trigger_id.clone(), stop_tx);

        let fires = self.fires;
        tokio::spawn(async move {
            for n in 0..fires {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                }
                let response = TriggerResponse {
                    event: Some(TriggerEvent {
                        event_id: format!("fire-{n}"),
                        payload: vec![n as u8],
                    }),
                    error: String::new(),
                };
                if tx.send(response).await.is_err() {
                    return;
                }
            }
            // Dropping tx closes the registration's channel.
        });
        Ok(rx)
    }

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        if let Some(stop) = self.active.lock().remove(&request.trigger_id) {
            let _ = stop.send(());
        }
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    stopper: Stopper,
    host_registry: Arc<LocalRegistry>,
    plugin_registry: RegistryClient,
}

/// Stand up a host-side registry server and a plugin-side registry client
/// over one shared in-process broker.
async fn harness() -> Harness {
    let stopper = Stopper::new();
    let broker: Arc<dyn silta_broker::Broker> =
        Arc::new(TcpBroker::with_dial_timeout(Duration::from_secs(2)));

    let host = BrokerExt::new(Arc::clone(&broker), stopper.subscribe(), "host");
    let plugin = BrokerExt::new(broker, stopper.subscribe(), "plugin");

    let host_registry = Arc::new(LocalRegistry::new());
    let server = RegistryServer::new(
        Arc::clone(&host_registry) as Arc<dyn CapabilitiesRegistry>,
        host.clone(),
    );

    let (registry_id, _resource) = host
        .serve_new(
            "registry",
            move |mut s| s.add_service(server.into_server()),
            Resources::new(),
        )
        .await
        .unwrap();

    let channel = plugin.dial(registry_id, "registry").await.unwrap();
    let plugin_registry = RegistryClient::new(plugin, channel);

    Harness {
        stopper,
        host_registry,
        plugin_registry,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_add_then_get_round_trips_info() {
    let h = harness().await;

    h.plugin_registry
        .add(Capability::Callback(EchoAction::new()))
        .await
        .unwrap();

    // The host sees the capability under its id...
    assert!(h.host_registry.has_capability("echo@1.0.0"));

    // ...and its info survives the two wire hops field-for-field.
    let capability = h.host_registry.get("echo@1.0.0").await.unwrap();
    let info = capability.info().await.unwrap();
    assert_eq!(info.id, "echo@1.0.0");
    assert_eq!(info.capability_type(), CapabilityType::Action);
    assert_eq!(info.description, "echoes request payloads");
    assert_eq!(info.version, "1.0.0");
}

#[tokio::test]
async fn test_execute_crosses_the_broker() {
    let h = harness().await;

    h.plugin_registry
        .add(Capability::Callback(EchoAction::new()))
        .await
        .unwrap();

    let action = h.host_registry.get_action("echo@1.0.0").await.unwrap();
    let response = action
        .execute(CapabilityRequest {
            metadata: HashMap::new(),
            payload: b"deadbeef".to_vec(),
        })
        .await
        .unwrap();

    assert_eq!(response.payload, b"deadbeef");
    assert!(response.error.is_empty());
}

#[tokio::test]
async fn test_mislabeled_capability_is_rejected_before_the_wire() {
    let h = harness().await;

    let err = h
        .plugin_registry
        .add(Capability::Callback(Arc::new(MislabeledCapability)))
        .await
        .unwrap_err();

    assert!(matches!(err, CapabilityError::TypeMismatch { .. }));
    // Nothing was registered anywhere.
    assert!(!h.host_registry.has_capability("liar@1.0.0"));
    assert!(h.host_registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_get_of_unknown_id_fails() {
    let h = harness().await;

    let err = h.plugin_registry.get("ghost@0.0.0").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_list_returns_every_capability_freshly_served() {
    let h = harness().await;

    h.plugin_registry
        .add(Capability::Callback(EchoAction::new()))
        .await
        .unwrap();
    h.plugin_registry
        .add(Capability::Trigger(TickTrigger::new(1)))
        .await
        .unwrap();

    let listed = h.plugin_registry.list().await.unwrap();
    assert_eq!(listed.len(), 2);

    let mut ids = Vec::new();
    for capability in &listed {
        ids.push(capability.info().await.unwrap().id);
    }
    ids.sort();
    assert_eq!(ids, vec!["echo@1.0.0", "tick@1.0.0"]);
}

#[tokio::test]
async fn test_trigger_events_flow_to_the_registrant() {
    let h = harness().await;

    h.plugin_registry
        .add(Capability::Trigger(TickTrigger::new(3)))
        .await
        .unwrap();

    let trigger = h.host_registry.get_trigger("tick@1.0.0").await.unwrap();
    let mut events = trigger
        .register_trigger(TriggerRegistrationRequest {
            trigger_id: "reg-1".to_string(),
            request: None,
        })
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Some(response) = events.recv().await {
        let event = response.event.unwrap();
        received.push(event.event_id);
    }

    // All three fires arrived, then the channel was observed closed.
    assert_eq!(received, vec!["fire-0", "fire-1", "fire-2"]);
}

#[tokio::test]
async fn test_unregister_closes_the_event_channel() {
    let h = harness().await;

    // Effectively endless trigger; only unregistration can end it.
    h.plugin_registry
        .add(Capability::Trigger(TickTrigger::new(u32::MAX)))
        .await
        .unwrap();

    let trigger = h.host_registry.get_trigger("tick@1.0.0").await.unwrap();
    let registration = TriggerRegistrationRequest {
        trigger_id: "reg-2".to_string(),
        request: None,
    };
    let mut events = trigger.register_trigger(registration.clone()).await.unwrap();

    // Receive at least one event, then cancel.
    let first = events.recv().await;
    assert!(first.is_some());

    trigger.unregister_trigger(registration).await.unwrap();

    // The channel drains and closes; this must not hang.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "channel should close after unregistration");
}

#[tokio::test]
async fn test_duplicate_trigger_registration_is_rejected() {
    let h = harness().await;

    h.plugin_registry
        .add(Capability::Trigger(TickTrigger::new(u32::MAX)))
        .await
        .unwrap();

    let trigger = h.host_registry.get_trigger("tick@1.0.0").await.unwrap();
    let registration = TriggerRegistrationRequest {
        trigger_id: "reg-dup".to_string(),
        request: None,
    };

    let _events = trigger.register_trigger(registration.clone()).await.unwrap();
    let err = trigger.register_trigger(registration).await.unwrap_err();
    assert!(matches!(err, CapabilityError::Registration(_)));
}

#[tokio::test]
async fn test_stop_signal_tears_down_served_capabilities() {
    let h = harness().await;

    h.plugin_registry
        .add(Capability::Callback(EchoAction::new()))
        .await
        .unwrap();
    let action = h.host_registry.get_action("echo@1.0.0").await.unwrap();

    h.stopper.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = action
        .execute(CapabilityRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CapabilityError::Remote(_)));
}
