//! Test cluster setup: one host and one plugin over real TCP
//!
//! The host serves its broker sync service and the capabilities registry on
//! a single base server, exactly as a launcher-provided base connection
//! would look. The plugin runs in the same test process but every byte
//! between the two sides crosses real loopback sockets through a pair of
//! peer brokers.

use anyhow::Context as _;
use silta_broker::proto::broker_sync_server::BrokerSyncServer;
use silta_broker::{BrokerExt, LocalRegistry, PeerBroker, RegistryClient, RegistryServer, Stopper};
use silta_core::CapabilitiesRegistry;
use silta_test_trigger::{register_capabilities, EchoAction, IntervalTrigger};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::info;

/// A running host/plugin pair.
pub struct TestCluster {
    /// Fires the process-wide stop signal for both sides.
    pub stopper: Stopper,
    /// The host's local capability directory.
    pub host_registry: Arc<LocalRegistry>,
    /// The plugin's view of the host registry; owns the plugin-served
    /// capability connections.
    pub registry_client: RegistryClient,
    /// The plugin's trigger implementation, for assertions.
    pub trigger: Arc<IntervalTrigger>,
    /// The plugin's action implementation, for assertions.
    pub action: Arc<EchoAction>,
    /// URL of the host's base server.
    pub host_addr: String,
}

impl TestCluster {
    /// Stand up the pair and register the plugin's capabilities.
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with_trigger_period(Duration::from_millis(20)).await
    }

    /// Like [`start`](Self::start) with a custom trigger interval.
    pub async fn start_with_trigger_period(period: Duration) -> anyhow::Result<Self> {
        let stopper = Stopper::new();

        // Bind both base listeners first so each side knows the other's
        // address, as a real launcher would via configuration.
        let host_listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind host listener")?;
        let plugin_listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind plugin listener")?;
        let host_addr = format!("http://{}", host_listener.local_addr()?);
        let plugin_addr = format!("http://{}", plugin_listener.local_addr()?);

        // Host side: peer broker, local registry, base server.
        let host_peer = PeerBroker::host(plugin_addr.clone());
        let host_sync = host_peer.sync_service();
        let host_broker = BrokerExt::new(Arc::new(host_peer), stopper.subscribe(), "host");

        let host_registry = Arc::new(LocalRegistry::new());
        let registry_server = RegistryServer::new(
            Arc::clone(&host_registry) as Arc<dyn CapabilitiesRegistry>,
            host_broker.clone(),
        );

        let mut host_stop = stopper.subscribe();
        tokio::spawn(async move {
            let _ = tonic::transport::Server::builder()
                .add_service(BrokerSyncServer::new(host_sync))
                .add_service(registry_server.into_server())
                .serve_with_incoming_shutdown(TcpListenerStream::new(host_listener), async move {
                    let _ = host_stop.changed().await;
                })
                .await;
        });

        // Plugin side: peer broker, sync server, capability registration.
        let plugin_peer = PeerBroker::plugin(host_addr.clone());
        let plugin_sync = plugin_peer.sync_service();
        let plugin_broker = BrokerExt::new(Arc::new(plugin_peer), stopper.subscribe(), "plugin");

        let mut plugin_stop = stopper.subscribe();
        tokio::spawn(async move {
            let _ = tonic::transport::Server::builder()
                .add_service(BrokerSyncServer::new(plugin_sync))
                .serve_with_incoming_shutdown(
                    TcpListenerStream::new(plugin_listener),
                    async move {
                        let _ = plugin_stop.changed().await;
                    },
                )
                .await;
        });

        // Give both base servers a moment to start accepting.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let channel = tonic::transport::Endpoint::from_shared(host_addr.clone())?
            .connect()
            .await
            .context("connect to host base server")?;

        let trigger = IntervalTrigger::new(period);
        let action = EchoAction::new();
        let registry_client = register_capabilities(
            plugin_broker,
            channel,
            Arc::clone(&trigger),
            Arc::clone(&action),
        )
        .await
        .context("register plugin capabilities")?;

        info!(host = %host_addr, "test cluster up");
        Ok(Self {
            stopper,
            host_registry,
            registry_client,
            trigger,
            action,
            host_addr,
        })
    }
}
