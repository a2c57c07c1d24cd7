//! The service lifecycle bridged over gRPC
//!
//! [`ServiceServer`] exposes a local [`Service`] implementation's
//! close/ready/health surface as the `Lifecycle` RPC service;
//! [`ServiceClient`] implements [`Service`] by calling a remote one. Every
//! higher-level remote object embeds this pair, so callers manage remote
//! services exactly like local ones.

use crate::ext::BrokerExt;
use crate::proto::lifecycle_client::LifecycleClient;
use crate::proto::lifecycle_server::{Lifecycle, LifecycleServer};
use crate::proto::HealthReportReply;
use async_trait::async_trait;
use silta_core::{HealthReport, Service, ServiceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::debug;

/// Fixed timeout for the ready and health-report RPCs, layered on top of
/// the shared stop signal.
pub const LIFECYCLE_RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// Serves a local [`Service`] implementation's lifecycle over gRPC.
pub struct ServiceServer {
    inner: Arc<dyn Service>,
}

impl ServiceServer {
    /// Wrap a service implementation.
    pub fn new(inner: Arc<dyn Service>) -> Self {
        Self { inner }
    }

    /// Convert into the tonic service for registration with a router.
    pub fn into_server(self) -> LifecycleServer<Self> {
        LifecycleServer::new(self)
    }
}

#[tonic::async_trait]
impl Lifecycle for ServiceServer {
    async fn close(&self, _: Request<()>) -> Result<Response<()>, Status> {
        debug!(service = self.inner.name(), "remote close requested");
        self.inner
            .close()
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(()))
    }

    async fn ready(&self, _: Request<()>) -> Result<Response<()>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::failed_precondition(e.to_string()))?;
        Ok(Response::new(()))
    }

    async fn health_report(&self, _: Request<()>) -> Result<Response<HealthReportReply>, Status> {
        let report = self
            .inner
            .health_report()
            .await
            .into_iter()
            // Empty string is the healthy sentinel on the wire.
            .map(|(name, health)| (name, health.unwrap_or_default()))
            .collect();
        Ok(Response::new(HealthReportReply { report }))
    }
}

/// Implements [`Service`] against a remote lifecycle service.
pub struct ServiceClient {
    name: String,
    channel: Channel,
    stop: watch::Receiver<bool>,
}

impl ServiceClient {
    /// Wrap the lifecycle of whatever is served on `channel`.
    pub fn new(broker: &BrokerExt, name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            channel,
            stop: broker.stop_signal(),
        }
    }

    fn rpc(&self) -> LifecycleClient<Channel> {
        LifecycleClient::new(self.channel.clone())
    }
}

#[async_trait]
impl Service for ServiceClient {
    fn name(&self) -> &str {
        &self.name
    }

    /// No-op: the remote side is already running by construction.
    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.rpc()
            .close(())
            .await
            .map(|_| ())
            .map_err(|status| ServiceError::Close(status.message().to_string()))
    }

    async fn ready(&self) -> Result<(), ServiceError> {
        if *self.stop.borrow() {
            return Err(ServiceError::NotReady("shutting down".to_string()));
        }
        let mut stop = self.stop.clone();
        let mut client = self.rpc();
        tokio::select! {
            _ = stop.changed() => Err(ServiceError::NotReady("shutting down".to_string())),
            result = tokio::time::timeout(LIFECYCLE_RPC_TIMEOUT, client.ready(())) => {
                match result {
                    Err(_) => Err(ServiceError::NotReady(format!(
                        "'{}' ready check timed out",
                        self.name
                    ))),
                    Ok(Err(status)) => {
                        Err(ServiceError::NotReady(status.message().to_string()))
                    }
                    Ok(Ok(_)) => Ok(()),
                }
            }
        }
    }

    async fn health_report(&self) -> HealthReport {
        let mut client = self.rpc();
        match tokio::time::timeout(LIFECYCLE_RPC_TIMEOUT, client.health_report(())).await {
            Ok(Ok(response)) => {
                let mut report: HealthReport = response
                    .into_inner()
                    .report
                    .into_iter()
                    .map(|(name, message)| {
                        let health = if message.is_empty() { None } else { Some(message) };
                        (name, health)
                    })
                    .collect();
                // The wrapper itself is healthy whenever the RPC succeeds.
                report.insert(self.name.clone(), None);
                report
            }
            Ok(Err(status)) => HealthReport::from([(
                self.name.clone(),
                Some(status.message().to_string()),
            )]),
            Err(_) => HealthReport::from([(
                self.name.clone(),
                Some("health report timed out".to_string()),
            )]),
        }
    }
}
