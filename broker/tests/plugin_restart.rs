//! Integration test: hot-swapping the plugin connection after a relaunch
//!
//! A plugin process dies and is relaunched with a brand-new broker and base
//! channel. `PluginClient::refresh` swaps the pair in place; higher-level
//! clients keep reading through the atomic cells and find the new
//! generation on their next call.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use silta_broker::{
    BrokerExt, PluginClient, Resource, Resources, ServiceClient, ServiceServer, Stopper, TcpBroker,
};
use silta_core::{HealthReport, Service, ServiceError};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;

/// A service that reports one healthy component named after its generation.
struct GenerationService {
    generation: &'static str,
}

#[async_trait]
impl Service for GenerationService {
    fn name(&self) -> &str {
        self.generation
    }

    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn ready(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn health_report(&self) -> HealthReport {
        HealthReport::from([(self.generation.to_string(), None)])
    }
}

/// Stand up one "plugin process": its own broker, stop signal and a served
/// lifecycle service reachable over the returned channel.
async fn launch(generation: &'static str) -> (Stopper, BrokerExt, Channel, Resource) {
    let stopper = Stopper::new();
    let broker = BrokerExt::new(
        Arc::new(TcpBroker::with_dial_timeout(Duration::from_secs(2))),
        stopper.subscribe(),
        generation,
    );

    let service: Arc<dyn Service> = Arc::new(GenerationService { generation });
    let (id, resource) = broker
        .serve_new(
            "lifecycle",
            move |mut server| server.add_service(ServiceServer::new(service).into_server()),
            Resources::new(),
        )
        .await
        .unwrap();
    let channel = broker.dial(id, "lifecycle").await.unwrap();

    (stopper, broker, channel, resource)
}

#[tokio::test]
async fn test_refresh_survives_plugin_relaunch() {
    let (_stop_a, broker_a, channel_a, resource_a) = launch("gen-a").await;
    let plugin = PluginClient::new("median", broker_a, channel_a);

    // A higher-level client built through the atomic cells works.
    let client = ServiceClient::new(&plugin.broker(), "median", plugin.channel());
    client.ready().await.unwrap();
    let report = client.health_report().await;
    assert_eq!(report.get("gen-a"), Some(&None));

    // The plugin process dies: its served connection goes away.
    resource_a.close().await.unwrap();
    let stale = ServiceClient::new(&plugin.broker(), "median", plugin.channel());
    assert!(stale.ready().await.is_err(), "dead backend must not look ready");

    // Relaunch: brand-new broker and base channel, swapped in place.
    let (_stop_b, broker_b, channel_b, _resource_b) = launch("gen-b").await;
    plugin.refresh(broker_b, channel_b);

    // Clients reading through the plugin handle observe the new generation.
    let client = ServiceClient::new(&plugin.broker(), "median", plugin.channel());
    client.ready().await.unwrap();
    let report = client.health_report().await;
    assert_eq!(report.get("gen-b"), Some(&None));
    assert_eq!(report.get("median"), Some(&None));
}
