//! Cross-process broker id agreement
//!
//! When host and plugin run in different processes they cannot share a
//! [`TcpBroker`](crate::broker::TcpBroker). Instead each side runs a
//! [`PeerBroker`]: `accept` binds a loopback listener and announces the
//! `(id, address)` pair to the other side over the `BrokerSync` service;
//! `dial` waits for the peer's announcement.
//!
//! The two allocators never collide because they use opposite id parity:
//! the host side hands out even ids, the plugin side odd ids.

use crate::broker::{
    connect_endpoint, allocate_id, Broker, BrokerListener, ConnId, EndpointTable,
    DEFAULT_DIAL_TIMEOUT,
};
use crate::error::BrokerError;
use crate::proto::broker_sync_client::BrokerSyncClient;
use crate::proto::broker_sync_server::BrokerSync;
use crate::proto::ConnInfo;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

/// Which end of the host/plugin pair this broker is, fixing its id parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerSide {
    /// The host process; allocates even connection ids.
    Host,
    /// The plugin process; allocates odd connection ids.
    Plugin,
}

/// Receives the peer's announcements and records them for local dialers.
///
/// Each process adds this service to the server hosting its end of the base
/// connection.
pub struct BrokerSyncService {
    table: Arc<EndpointTable>,
}

#[tonic::async_trait]
impl BrokerSync for BrokerSyncService {
    async fn announce(&self, request: Request<ConnInfo>) -> Result<Response<()>, Status> {
        let info = request.into_inner();
        if info.connection_id == 0 {
            return Err(Status::invalid_argument("connection id 0 is reserved"));
        }
        let addr: SocketAddr = info.address.parse().map_err(|e| {
            Status::invalid_argument(format!("invalid address '{}': {e}", info.address))
        })?;
        debug!(id = info.connection_id, addr = %addr, "peer announced connection");
        self.table.insert(info.connection_id, addr);
        Ok(Response::new(()))
    }
}

/// One end of a cross-process broker pair.
///
/// Both ends hold the same contract as any other [`Broker`]; the only wire
/// traffic is the unary announcement when a listener is accepted.
pub struct PeerBroker {
    next_id: AtomicU32,
    table: Arc<EndpointTable>,
    peer_endpoint: String,
    client: tokio::sync::Mutex<Option<BrokerSyncClient<Channel>>>,
    dial_timeout: Duration,
}

impl PeerBroker {
    /// Create the host end. `peer_endpoint` is the URL of the plugin's
    /// sync service, e.g. `http://127.0.0.1:9101`.
    pub fn host(peer_endpoint: impl Into<String>) -> Self {
        Self::new(BrokerSide::Host, peer_endpoint)
    }

    /// Create the plugin end. `peer_endpoint` is the URL of the host's
    /// sync service.
    pub fn plugin(peer_endpoint: impl Into<String>) -> Self {
        Self::new(BrokerSide::Plugin, peer_endpoint)
    }

    /// Create a broker for the given side of the pair.
    pub fn new(side: BrokerSide, peer_endpoint: impl Into<String>) -> Self {
        // Host: 2, 4, 6, ...; plugin: 1, 3, 5, ... Id 0 stays reserved so a
        // zero in a message always means "unset".
        let first = match side {
            BrokerSide::Host => 2,
            BrokerSide::Plugin => 1,
        };
        Self {
            next_id: AtomicU32::new(first),
            table: Arc::new(EndpointTable::default()),
            peer_endpoint: peer_endpoint.into(),
            client: tokio::sync::Mutex::new(None),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Override how long a dial waits for the peer's announcement.
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// The sync service the peer announces into. Add it to the server
    /// hosting this side's base connection.
    pub fn sync_service(&self) -> BrokerSyncService {
        BrokerSyncService {
            table: Arc::clone(&self.table),
        }
    }

    /// Get or lazily connect the announcement client.
    async fn sync_client(&self) -> Result<BrokerSyncClient<Channel>, tonic::transport::Error> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let channel = tonic::transport::Endpoint::from_shared(self.peer_endpoint.clone())?
            .connect()
            .await?;
        let client = BrokerSyncClient::new(channel);
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Drop the cached announcement client so the next accept reconnects.
    async fn clear_sync_client(&self) {
        *self.client.lock().await = None;
    }
}

#[async_trait]
impl Broker for PeerBroker {
    fn next_id(&self) -> ConnId {
        allocate_id(&self.next_id, 2)
    }

    async fn accept(&self, id: ConnId, name: &str) -> Result<BrokerListener, BrokerError> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            BrokerError::ConnAccept {
                name: name.to_string(),
                id,
                source: Box::new(e),
            }
        })?;
        let addr = listener.local_addr().map_err(|e| BrokerError::ConnAccept {
            name: name.to_string(),
            id,
            source: Box::new(e),
        })?;

        let mut client = self.sync_client().await.map_err(|e| BrokerError::ConnAccept {
            name: name.to_string(),
            id,
            source: Box::new(e),
        })?;
        if let Err(status) = client
            .announce(ConnInfo {
                connection_id: id,
                address: addr.to_string(),
            })
            .await
        {
            // The cached client might be stale; make the next accept redial.
            self.clear_sync_client().await;
            warn!(id, name, error = %status, "failed to announce connection to peer");
            return Err(BrokerError::ConnAccept {
                name: name.to_string(),
                id,
                source: Box::new(status),
            });
        }

        debug!(id, addr = %addr, name, "accepted and announced listener");
        Ok(BrokerListener { listener, addr })
    }

    async fn dial(&self, id: ConnId, name: &str) -> Result<Channel, BrokerError> {
        let addr = self.table.wait_for(id, self.dial_timeout).await.ok_or_else(|| {
            BrokerError::ConnDial {
                name: name.to_string(),
                id,
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "peer never announced this connection id",
                )),
            }
        })?;
        connect_endpoint(addr).map_err(|e| BrokerError::ConnDial {
            name: name.to_string(),
            id,
            source: Box::new(e),
        })
    }
}
