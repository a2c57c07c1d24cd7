//! Broker plumbing shared by everything above the raw [`Broker`]
//!
//! [`BrokerExt`] composes a broker, the process-wide stop signal and a
//! component name, and offers the two primitives the rest of the system is
//! built from:
//!
//! - [`serve`](BrokerExt::serve) / [`serve_new`](BrokerExt::serve_new) -
//!   allocate an id, accept a listener, run a gRPC server whose lifetime is
//!   tied to *both* an explicit close signal and the stop signal, and hand
//!   back a [`Resource`].
//! - [`dial`](BrokerExt::dial) - turn an id into a usable channel.

use crate::broker::{Broker, ConnId};
use crate::error::BrokerError;
use crate::resource::{Resource, Resources};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tonic::transport::server::Router;
use tonic::transport::{Channel, Server};
use tracing::{debug, error, info};

/// Owner of the process-wide stop signal.
///
/// Every dynamically served server watches a receiver of this channel;
/// calling [`stop`](Stopper::stop) (or dropping the stopper) tears all of
/// them down.
pub struct Stopper {
    tx: watch::Sender<bool>,
}

impl Stopper {
    /// Create a new stop signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A receiver observing the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Fire the stop signal. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}

/// A broker, the stop signal, and a component name.
///
/// Cheap to clone; every clone shares the broker and observes the same stop
/// signal.
#[derive(Clone)]
pub struct BrokerExt {
    broker: Arc<dyn Broker>,
    stop: watch::Receiver<bool>,
    name: String,
}

impl BrokerExt {
    /// Compose a broker with a stop signal under a component name.
    pub fn new(
        broker: Arc<dyn Broker>,
        stop: watch::Receiver<bool>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            stop,
            name: name.into(),
        }
    }

    /// The component name used as a prefix for dynamic service names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A copy of this extension with `suffix` appended to the name, for
    /// sub-components.
    pub fn with_name(&self, suffix: &str) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            stop: self.stop.clone(),
            name: format!("{}.{}", self.name, suffix),
        }
    }

    /// The underlying broker.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// A receiver observing the process-wide stop signal.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.clone()
    }

    /// Whether the stop signal has fired.
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Allocate an id, accept its listener and run `router` on it.
    ///
    /// The server stops on *either* signal: closing the returned
    /// [`Resource`], or the process-wide stop. When the server exits -
    /// normally or not - `deps` are closed, so teardown cascades through
    /// everything this service was built on. If `accept` fails, `deps` are
    /// closed before returning: no partial leak.
    ///
    /// A serve-loop failure after startup is logged, not retried; callers
    /// detect it through RPC failures on the dialed connection.
    pub async fn serve(
        &self,
        name: &str,
        router: Router,
        deps: Resources,
    ) -> Result<(ConnId, Resource), BrokerError> {
        if self.is_stopped() {
            deps.close_all().await;
            return Err(BrokerError::Stopped);
        }

        let id = self.broker.next_id();
        let listener = match self.broker.accept(id, name).await {
            Ok(listener) => listener,
            Err(err) => {
                deps.close_all().await;
                return Err(err);
            }
        };

        let service = format!("{}.{}", self.name, name);
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let mut stop = self.stop.clone();

        let task_service = service.clone();
        let done = tokio::spawn(async move {
            let shutdown = async move {
                // A dropped (never closed) Resource must not stop the
                // server; only an explicit close or the stop signal may.
                let explicit_close = async move {
                    if close_rx.await.is_err() {
                        std::future::pending::<()>().await;
                    }
                };
                tokio::select! {
                    _ = explicit_close => {
                        debug!(service = %task_service, "dynamic service closed");
                    }
                    _ = stop.changed() => {
                        debug!(service = %task_service, "stop signal received");
                    }
                }
            };

            if let Err(err) = router
                .serve_with_incoming_shutdown(listener.into_incoming(), shutdown)
                .await
            {
                error!(error = %err, "dynamic service terminated");
            }
            deps.close_all().await;
        });

        info!(service = %service, id, "serving dynamic service");
        Ok((id, Resource::server(service, close_tx, done)))
    }

    /// Like [`serve`](Self::serve), building the router from a fresh server
    /// builder.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (id, resource) = broker
    ///     .serve_new("provider", |mut server| server.add_service(svc), deps)
    ///     .await?;
    /// ```
    pub async fn serve_new<F>(
        &self,
        name: &str,
        register: F,
        deps: Resources,
    ) -> Result<(ConnId, Resource), BrokerError>
    where
        F: FnOnce(Server) -> Router,
    {
        self.serve(name, register(Server::builder()), deps).await
    }

    /// Turn a broker-assigned id into a usable channel.
    pub async fn dial(&self, id: ConnId, name: &str) -> Result<Channel, BrokerError> {
        self.broker.dial(id, name).await
    }
}

impl std::fmt::Debug for BrokerExt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerExt").field("name", &self.name).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::{BrokerListener, TcpBroker};
    use crate::proto::lifecycle_client::LifecycleClient;
    use crate::proto::lifecycle_server::{Lifecycle, LifecycleServer};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tonic::{Request, Response, Status};

    /// Minimal lifecycle service for exercising serve/dial.
    #[derive(Default)]
    struct NopLifecycle;

    #[tonic::async_trait]
    impl Lifecycle for NopLifecycle {
        async fn close(&self, _: Request<()>) -> Result<Response<()>, Status> {
            Ok(Response::new(()))
        }

        async fn ready(&self, _: Request<()>) -> Result<Response<()>, Status> {
            Ok(Response::new(()))
        }

        async fn health_report(
            &self,
            _: Request<()>,
        ) -> Result<Response<crate::proto::HealthReportReply>, Status> {
            Ok(Response::new(crate::proto::HealthReportReply::default()))
        }
    }

    fn test_broker() -> (Stopper, BrokerExt) {
        let stopper = Stopper::new();
        let ext = BrokerExt::new(
            Arc::new(TcpBroker::with_dial_timeout(Duration::from_millis(500))),
            stopper.subscribe(),
            "test",
        );
        (stopper, ext)
    }

    #[tokio::test]
    async fn test_serve_then_dial_round_trip() {
        let (_stopper, broker) = test_broker();

        let (id, resource) = broker
            .serve_new(
                "nop",
                |mut server| server.add_service(LifecycleServer::new(NopLifecycle)),
                Resources::new(),
            )
            .await
            .unwrap();

        let channel = broker.dial(id, "nop").await.unwrap();
        let mut client = LifecycleClient::new(channel);
        assert!(client.ready(()).await.is_ok());

        resource.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_close_stops_the_server() {
        let (_stopper, broker) = test_broker();

        let (id, resource) = broker
            .serve_new(
                "nop",
                |mut server| server.add_service(LifecycleServer::new(NopLifecycle)),
                Resources::new(),
            )
            .await
            .unwrap();

        let channel = broker.dial(id, "nop").await.unwrap();
        resource.close().await.unwrap();

        // The server is gone; calls on the old channel now fail.
        let mut client = LifecycleClient::new(channel);
        let err = client.ready(()).await.unwrap_err();
        assert!(crate::error::is_terminal(err.code()), "got {err:?}");
    }

    #[tokio::test]
    async fn test_stop_signal_stops_the_server() {
        let (stopper, broker) = test_broker();

        let (id, _resource) = broker
            .serve_new(
                "nop",
                |mut server| server.add_service(LifecycleServer::new(NopLifecycle)),
                Resources::new(),
            )
            .await
            .unwrap();

        let channel = broker.dial(id, "nop").await.unwrap();
        let mut client = LifecycleClient::new(channel);
        assert!(client.ready(()).await.is_ok());

        stopper.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = client.ready(()).await.unwrap_err();
        assert!(crate::error::is_terminal(err.code()), "got {err:?}");
    }

    #[tokio::test]
    async fn test_serve_after_stop_is_rejected_and_closes_deps() {
        let (stopper, broker) = test_broker();
        stopper.stop();

        let closed = Arc::new(AtomicU32::new(0));
        let mut deps = Resources::new();
        {
            let closed = Arc::clone(&closed);
            deps.add(Resource::custom("dep", move || {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let err = broker
            .serve_new(
                "nop",
                |mut server| server.add_service(LifecycleServer::new(NopLifecycle)),
                deps,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::Stopped));
        assert_eq!(closed.load(Ordering::SeqCst), 1, "deps must be rolled back");
    }

    /// Broker whose accept always fails, for exercising rollback.
    struct FailingAccept(TcpBroker);

    #[async_trait]
    impl Broker for FailingAccept {
        fn next_id(&self) -> ConnId {
            self.0.next_id()
        }

        async fn accept(&self, id: ConnId, name: &str) -> Result<BrokerListener, BrokerError> {
            Err(BrokerError::ConnAccept {
                name: name.to_string(),
                id,
                source: "accept always fails".into(),
            })
        }

        async fn dial(&self, id: ConnId, name: &str) -> Result<Channel, BrokerError> {
            self.0.dial(id, name).await
        }
    }

    #[tokio::test]
    async fn test_accept_failure_closes_deps() {
        let stopper = Stopper::new();
        let broker = BrokerExt::new(
            Arc::new(FailingAccept(TcpBroker::new())),
            stopper.subscribe(),
            "test",
        );

        let closed = Arc::new(AtomicU32::new(0));
        let mut deps = Resources::new();
        for i in 0..3 {
            let closed = Arc::clone(&closed);
            deps.add(Resource::custom(format!("dep-{i}"), move || {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let err = broker
            .serve_new(
                "nop",
                |mut server| server.add_service(LifecycleServer::new(NopLifecycle)),
                deps,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::ConnAccept { .. }));
        assert_eq!(closed.load(Ordering::SeqCst), 3, "all deps must be rolled back");
    }

    #[tokio::test]
    async fn test_close_cascades_into_deps() {
        let (_stopper, broker) = test_broker();

        let closed = Arc::new(AtomicU32::new(0));
        let mut deps = Resources::new();
        {
            let closed = Arc::clone(&closed);
            deps.add(Resource::custom("dep", move || {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let (_id, resource) = broker
            .serve_new(
                "nop",
                |mut server| server.add_service(LifecycleServer::new(NopLifecycle)),
                deps,
            )
            .await
            .unwrap();

        assert_eq!(closed.load(Ordering::SeqCst), 0);
        resource.close().await.unwrap();
        assert_eq!(
            closed.load(Ordering::SeqCst),
            1,
            "closing the server must close its deps"
        );
    }

    #[tokio::test]
    async fn test_with_name_prefixes_sub_components() {
        let (_stopper, broker) = test_broker();
        let sub = broker.with_name("median");
        assert_eq!(sub.name(), "test.median");
    }
}
