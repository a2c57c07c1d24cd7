//! Self-healing client connection
//!
//! A [`ClientConn`] wraps a channel that can be transparently rebuilt when
//! the remote side becomes unreachable. The injected [`NewClientFn`] knows
//! how to re-provision the remote object and its dependencies (usually by
//! calling a "new-xyz" RPC that returns a fresh connection id); the conn
//! dials whatever id it produces.
//!
//! There is no terminal state: the conn heals indefinitely. Cancellation is
//! the caller dropping the future (or using
//! [`invoke_deadline`](ClientConn::invoke_deadline)); every await point is
//! cancel-safe and the internal lock releases on drop.

use crate::backoff::BackoffConfig;
use crate::broker::ConnId;
use crate::error::{is_terminal, BrokerError};
use crate::ext::BrokerExt;
use crate::resource::Resources;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, info, warn};

/// Future returned by a [`NewClientFn`].
pub type NewClientFuture = BoxFuture<'static, Result<(ConnId, Resources), BrokerError>>;

/// Re-provisions the remote object this connection fronts.
///
/// Performs whatever remote RPCs are needed to recreate server-side state
/// and returns the connection id to dial plus the resources backing it. On
/// failure the callback must have closed anything it partially built; the
/// conn only rolls back the resources it is handed on success.
pub type NewClientFn = Box<dyn Fn(BrokerExt) -> NewClientFuture + Send + Sync>;

struct Generation {
    channel: Channel,
    deps: Resources,
    number: u64,
}

/// A channel that rebuilds itself after terminal transport errors.
pub struct ClientConn {
    name: String,
    broker: BrokerExt,
    new_client: NewClientFn,
    backoff: BackoffConfig,
    state: RwLock<Option<Generation>>,
    generations: AtomicU64,
}

impl ClientConn {
    /// Create an unconnected conn; the first call builds the connection.
    pub fn new(broker: BrokerExt, name: impl Into<String>, new_client: NewClientFn) -> Self {
        Self {
            name: name.into(),
            broker,
            new_client,
            backoff: BackoffConfig::default(),
            state: RwLock::new(None),
            generations: AtomicU64::new(0),
        }
    }

    /// Override the rebuild backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// The connection's name, used in logs and dial errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current channel, building one first if none exists.
    pub async fn channel(&self) -> Result<Channel, BrokerError> {
        self.current_or_refresh().await.map(|(channel, _)| channel)
    }

    /// Run `op` against the current channel, transparently rebuilding the
    /// connection and retrying after terminal errors.
    ///
    /// `op` is called with a clone of the channel and may run more than
    /// once; build the request inside the closure. Non-terminal errors
    /// (anything but `Unavailable`/`Cancelled`) are returned unchanged - a
    /// business-logic error never triggers a reconnect.
    pub async fn invoke<T, F, Fut>(&self, op: F) -> Result<T, Status>
    where
        F: Fn(Channel) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        loop {
            let (channel, number) = self.current_or_refresh().await.map_err(Status::from)?;
            match op(channel).await {
                Ok(value) => return Ok(value),
                Err(status) if is_terminal(status.code()) => {
                    warn!(
                        name = %self.name,
                        code = ?status.code(),
                        "terminal error; refreshing connection"
                    );
                    self.refresh(Some(number)).await.map_err(Status::from)?;
                }
                Err(status) => return Err(status),
            }
        }
    }

    /// [`invoke`](Self::invoke) bounded by a deadline. Elapsing the deadline
    /// aborts any in-flight rebuild or backoff wait promptly.
    pub async fn invoke_deadline<T, F, Fut>(&self, deadline: Duration, op: F) -> Result<T, Status>
    where
        F: Fn(Channel) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        match tokio::time::timeout(deadline, self.invoke(op)).await {
            Ok(result) => result,
            Err(_) => Err(Status::deadline_exceeded(format!(
                "'{}' deadline of {deadline:?} exceeded",
                self.name
            ))),
        }
    }

    /// Tear down the current connection and its dependencies. The next call
    /// rebuilds from scratch.
    pub async fn close(&self) {
        let mut guard = self.state.write().await;
        if let Some(generation) = guard.take() {
            debug!(name = %self.name, generation = generation.number, "closing connection");
            generation.deps.close_all().await;
        }
    }

    async fn current_or_refresh(&self) -> Result<(Channel, u64), BrokerError> {
        {
            let guard = self.state.read().await;
            if let Some(generation) = guard.as_ref() {
                return Ok((generation.channel.clone(), generation.number));
            }
        }
        self.refresh(None).await
    }

    /// Rebuild the connection, single-flight.
    ///
    /// `stale` is the generation the caller observed failing (`None` when it
    /// observed no connection at all). If the stored generation differs,
    /// another caller already rebuilt - return its connection immediately.
    async fn refresh(&self, stale: Option<u64>) -> Result<(Channel, u64), BrokerError> {
        let mut guard = self.state.write().await;

        if let Some(generation) = guard.as_ref() {
            if stale != Some(generation.number) {
                return Ok((generation.channel.clone(), generation.number));
            }
        }

        if let Some(old) = guard.take() {
            debug!(name = %self.name, generation = old.number, "discarding stale connection");
            old.deps.close_all().await;
        }

        let mut stop = self.broker.stop_signal();
        let mut attempt: u32 = 0;
        loop {
            if self.broker.is_stopped() {
                return Err(BrokerError::Stopped);
            }
            match self.try_build().await {
                Ok((channel, deps)) => {
                    let number = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(name = %self.name, generation = number, "connection established");
                    *guard = Some(Generation {
                        channel: channel.clone(),
                        deps,
                        number,
                    });
                    return Ok((channel, number));
                }
                Err(err) => {
                    attempt += 1;
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        name = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "failed to rebuild connection; backing off"
                    );
                    tokio::select! {
                        _ = stop.changed() => return Err(BrokerError::Stopped),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn try_build(&self) -> Result<(Channel, Resources), BrokerError> {
        let (id, deps) = (self.new_client)(self.broker.clone()).await?;
        match self.broker.dial(id, &self.name).await {
            Ok(channel) => Ok((channel, deps)),
            Err(err) => {
                deps.close_all().await;
                Err(err)
            }
        }
    }
}

impl BrokerExt {
    /// A self-healing connection built from this broker.
    pub fn client_conn(&self, name: &str, new_client: NewClientFn) -> ClientConn {
        ClientConn::new(self.clone(), name, new_client)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::TcpBroker;
    use crate::ext::Stopper;
    use crate::proto::lifecycle_client::LifecycleClient;
    use crate::proto::lifecycle_server::{Lifecycle, LifecycleServer};
    use crate::resource::Resource;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use tonic::{Request, Response, Status};

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

    /// Lifecycle whose ready always fails with a business-logic error.
    struct RejectingLifecycle;

    #[tonic::async_trait]
    impl Lifecycle for RejectingLifecycle {
        async fn close(&self, _: Request<()>) -> Result<Response<()>, Status> {
            Ok(Response::new(()))
        }

        async fn ready(&self, _: Request<()>) -> Result<Response<()>, Status> {
            Err(Status::invalid_argument("bad config digest"))
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
            Arc::new(TcpBroker::with_dial_timeout(Duration::from_secs(2))),
            stopper.subscribe(),
            "test",
        );
        (stopper, ext)
    }

    /// A new_client that serves a fresh lifecycle backend per build,
    /// counting builds and parking each server's resource where the test
    /// can kill it.
    fn counting_new_client(
        builds: Arc<AtomicU32>,
        servers: Arc<parking_lot::Mutex<Vec<Resource>>>,
    ) -> NewClientFn {
        Box::new(move |broker: BrokerExt| {
            let builds = Arc::clone(&builds);
            let servers = Arc::clone(&servers);
            Box::pin(async move {
                builds.fetch_add(1, Ordering::SeqCst);
                let (id, resource) = broker
                    .serve_new(
                        "backend",
                        |mut server| server.add_service(LifecycleServer::new(NopLifecycle)),
                        Resources::new(),
                    )
                    .await?;
                servers.lock().push(resource);
                Ok((id, Resources::new()))
            })
        })
    }

    async fn ready(channel: Channel) -> Result<(), Status> {
        LifecycleClient::new(channel).ready(()).await.map(|_| ())
    }

    #[tokio::test]
    async fn test_first_invoke_builds_lazily() {
        let (_stopper, broker) = test_broker();
        let builds = Arc::new(AtomicU32::new(0));
        let servers = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let conn = broker.client_conn(
            "median",
            counting_new_client(Arc::clone(&builds), Arc::clone(&servers)),
        );
        assert_eq!(builds.load(Ordering::SeqCst), 0, "construction must not connect");

        conn.invoke(ready).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // A healthy connection is reused.
        conn.invoke(ready).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_error_rebuilds_connection() {
        let (_stopper, broker) = test_broker();
        let builds = Arc::new(AtomicU32::new(0));
        let servers = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let conn = broker.client_conn(
            "median",
            counting_new_client(Arc::clone(&builds), Arc::clone(&servers)),
        );
        conn.invoke(ready).await.unwrap();

        // Kill the backend out from under the conn.
        let server = servers.lock().pop().unwrap();
        server.close().await.unwrap();

        // The next invoke sees Unavailable, rebuilds and succeeds.
        conn.invoke(ready).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_invokes_refresh_single_flight() {
        let (_stopper, broker) = test_broker();
        let builds = Arc::new(AtomicU32::new(0));
        let servers = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let conn = Arc::new(broker.client_conn(
            "median",
            counting_new_client(Arc::clone(&builds), Arc::clone(&servers)),
        ));
        conn.invoke(ready).await.unwrap();

        let server = servers.lock().pop().unwrap();
        server.close().await.unwrap();

        // Many callers observe the same stale generation; exactly one
        // rebuild happens and every caller lands on the new connection.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let conn = Arc::clone(&conn);
            handles.push(tokio::spawn(async move { conn.invoke(ready).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            builds.load(Ordering::SeqCst),
            2,
            "one initial build plus exactly one rebuild"
        );
    }

    #[tokio::test]
    async fn test_non_terminal_errors_pass_through_without_rebuild() {
        let (_stopper, broker) = test_broker();
        let builds = Arc::new(AtomicU32::new(0));

        let conn = {
            let builds = Arc::clone(&builds);
            broker.client_conn(
                "rejecting",
                Box::new(move |broker: BrokerExt| {
                    let builds = Arc::clone(&builds);
                    Box::pin(async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        let mut deps = Resources::new();
                        let (id, resource) = broker
                            .serve_new(
                                "backend",
                                |mut server| {
                                    server.add_service(LifecycleServer::new(RejectingLifecycle))
                                },
                                Resources::new(),
                            )
                            .await?;
                        deps.add(resource);
                        Ok((id, deps))
                    })
                }),
            )
        };

        let err = conn.invoke(ready).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert_eq!(err.message(), "bad config digest");
        assert_eq!(
            builds.load(Ordering::SeqCst),
            1,
            "a business-logic error must not trigger a rebuild"
        );
    }

    #[tokio::test]
    async fn test_invoke_deadline_returns_promptly_without_backend() {
        let (_stopper, broker) = test_broker();

        // The callback hands back an id nobody will ever accept, so the
        // dial inside the rebuild blocks until its own (long) timeout.
        let conn = broker.client_conn(
            "orphan",
            Box::new(|_broker: BrokerExt| {
                Box::pin(async move { Ok((9999, Resources::new())) })
            }),
        );

        let started = std::time::Instant::now();
        let err = conn
            .invoke_deadline(Duration::from_millis(200), ready)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.code(), tonic::Code::DeadlineExceeded);
        assert!(
            elapsed < Duration::from_secs(1),
            "must respect the deadline, took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_stop_signal_aborts_rebuild() {
        let (stopper, broker) = test_broker();

        let conn = Arc::new(broker.client_conn(
            "orphan",
            Box::new(|_broker: BrokerExt| {
                Box::pin(async move { Ok((9999, Resources::new())) })
            }),
        ));

        let invoking = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.invoke(ready).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.stop();

        let err = invoking.await.unwrap().unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_close_then_invoke_rebuilds() {
        let (_stopper, broker) = test_broker();
        let builds = Arc::new(AtomicU32::new(0));
        let servers = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let conn = broker.client_conn(
            "median",
            counting_new_client(Arc::clone(&builds), Arc::clone(&servers)),
        );
        conn.invoke(ready).await.unwrap();

        conn.close().await;
        conn.invoke(ready).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
