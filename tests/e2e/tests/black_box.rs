//! Black-box E2E tests for the silta broker
//!
//! These tests run a host and a plugin as two peer-brokered endpoints over
//! real loopback TCP and verify behavior from the outside.

#![allow(clippy::unwrap_used)]

use silta_core::{
    CapabilitiesRegistry, CapabilityRequest, CapabilityType, CallbackCapability,
    TriggerCapability, TriggerRegistrationRequest,
};
use silta_e2e::TestCluster;
use std::collections::HashMap;
use std::time::Duration;

/// Plugin registration → host directory
#[tokio::test]
async fn test_plugin_capabilities_appear_in_host_registry() {
    let cluster = TestCluster::start().await.expect("cluster should start");

    assert!(cluster.host_registry.has_capability("interval-trigger@1.0.0"));
    assert!(cluster.host_registry.has_capability("echo-action@1.0.0"));
    assert_eq!(cluster.host_registry.capability_count(), 2);

    // Info survives the wire hop field-for-field.
    let info = cluster
        .host_registry
        .get("interval-trigger@1.0.0")
        .await
        .unwrap()
        .info()
        .await
        .unwrap();
    assert_eq!(info.capability_type(), CapabilityType::Trigger);
    assert_eq!(info.version, "1.0.0");
}

/// Host executes a plugin action across the broker
#[tokio::test]
async fn test_action_round_trip() {
    let cluster = TestCluster::start().await.expect("cluster should start");

    let action = cluster
        .host_registry
        .get_action("echo-action@1.0.0")
        .await
        .unwrap();

    let response = action
        .execute(CapabilityRequest {
            metadata: HashMap::new(),
            payload: b"cross-process payload".to_vec(),
        })
        .await
        .unwrap();

    assert_eq!(response.payload, b"cross-process payload");
    assert_eq!(cluster.action.executed(), 1);
}

/// Trigger events stream from the plugin to the host registrant
#[tokio::test]
async fn test_trigger_events_stream_to_host() {
    let cluster = TestCluster::start().await.expect("cluster should start");

    let trigger = cluster
        .host_registry
        .get_trigger("interval-trigger@1.0.0")
        .await
        .unwrap();

    let registration = TriggerRegistrationRequest {
        trigger_id: "e2e-reg".to_string(),
        request: None,
    };
    let mut events = trigger.register_trigger(registration.clone()).await.unwrap();

    // Three events must arrive within a generous deadline.
    for n in 0..3u64 {
        let response = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event should arrive in time")
            .expect("channel should stay open while registered");
        let event = response.event.unwrap();
        assert_eq!(event.payload, n.to_be_bytes().to_vec());
    }
    assert!(cluster.trigger.fired() >= 3);

    // Unregistering closes the channel on the host side.
    trigger.unregister_trigger(registration).await.unwrap();
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "event channel should close after unregister");
    assert_eq!(cluster.trigger.active_registrations(), 0);
}

/// The plugin can read the host's directory back
#[tokio::test]
async fn test_plugin_lists_host_registry() {
    let cluster = TestCluster::start().await.expect("cluster should start");

    let listed = cluster.registry_client.list().await.unwrap();
    assert_eq!(listed.len(), 2);

    let mut ids = Vec::new();
    for capability in &listed {
        ids.push(capability.info().await.unwrap().id);
    }
    ids.sort();
    assert_eq!(ids, vec!["echo-action@1.0.0", "interval-trigger@1.0.0"]);
}

/// Stop tears down every dynamically served connection
#[tokio::test]
async fn test_stop_tears_down_dynamic_connections() {
    let cluster = TestCluster::start().await.expect("cluster should start");

    let action = cluster
        .host_registry
        .get_action("echo-action@1.0.0")
        .await
        .unwrap();
    assert!(action.execute(CapabilityRequest::default()).await.is_ok());

    cluster.stopper.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = action.execute(CapabilityRequest::default()).await;
    assert!(err.is_err(), "served capability should be gone after stop");
}
