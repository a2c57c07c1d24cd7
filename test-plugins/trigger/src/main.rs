//! Test capability plugin binary
//!
//! Connects to a host's broker sync service, serves its own sync service,
//! and registers an interval trigger plus an echo action with the host's
//! capabilities registry. Runs until killed.
//!
//! Configuration (environment):
//! - `SILTA_HOST_ADDR`    - URL of the host's base server (sync + registry),
//!   e.g. "http://127.0.0.1:9100"
//! - `SILTA_PLUGIN_ADDR`  - address to bind this plugin's sync service on
//!   (default "0.0.0.0:9101")
//! - `SILTA_TRIGGER_PERIOD_MS` - interval between trigger events (default 1000)

use silta_broker::proto::broker_sync_server::BrokerSyncServer;
use silta_broker::{BrokerExt, PeerBroker, Stopper};
use silta_test_trigger::{register_capabilities, EchoAction, IntervalTrigger};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let host_addr =
        std::env::var("SILTA_HOST_ADDR").unwrap_or_else(|_| "http://127.0.0.1:9100".to_string());
    let plugin_addr: SocketAddr = std::env::var("SILTA_PLUGIN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9101".to_string())
        .parse()?;
    let period_ms: u64 = std::env::var("SILTA_TRIGGER_PERIOD_MS")
        .unwrap_or_else(|_| "1000".to_string())
        .parse()?;

    let stopper = Stopper::new();
    let peer = PeerBroker::plugin(host_addr.clone());
    let sync_service = peer.sync_service();
    let broker = BrokerExt::new(Arc::new(peer), stopper.subscribe(), "plugin");

    // Register capabilities once the sync service is up.
    {
        let broker = broker.clone();
        let host_addr = host_addr.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let channel = match tonic::transport::Endpoint::from_shared(host_addr) {
                Ok(endpoint) => match endpoint.connect().await {
                    Ok(channel) => channel,
                    Err(err) => {
                        error!(error = %err, "failed to connect to host");
                        return;
                    }
                },
                Err(err) => {
                    error!(error = %err, "invalid host address");
                    return;
                }
            };

            let trigger = IntervalTrigger::new(Duration::from_millis(period_ms));
            let action = EchoAction::new();
            match register_capabilities(broker, channel, trigger, action).await {
                Ok(registry) => {
                    // The registry client owns the served capability
                    // connections; hold it for the process lifetime.
                    let _registry = registry;
                    std::future::pending::<()>().await
                }
                Err(err) => error!(error = %err, "failed to register capabilities"),
            }
        });
    }

    info!(%plugin_addr, host = %host_addr, "starting test trigger plugin");

    tonic::transport::Server::builder()
        .add_service(BrokerSyncServer::new(sync_service))
        .serve(plugin_addr)
        .await?;

    Ok(())
}
