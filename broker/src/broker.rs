//! The connection-multiplexing broker
//!
//! A [`Broker`] turns one transport relationship into many independent
//! logical gRPC connections, identified by small integers. `next_id`
//! allocates an id; `accept` binds a listener for it (server intent);
//! `dial` connects to whatever is hosted at it (client intent). The two
//! ends agree on the id out-of-band, carried inside another RPC's payload.
//!
//! No ordering is guaranteed between `accept` and `dial`: dialing an id
//! that has not been accepted yet blocks until the announcement arrives,
//! bounded by the broker's dial timeout.

use crate::error::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Identifier of one multiplexed logical connection.
///
/// Process-unique for the lifetime of one broker: allocated monotonically,
/// consumed exactly once by a matching `accept`/`dial` pair, never recycled.
pub type ConnId = u32;

/// Default time to wait for a dialed id to be announced and reachable.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for the underlying channel (10 seconds).
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// A bound listener for a broker-assigned connection id.
#[derive(Debug)]
pub struct BrokerListener {
    pub(crate) listener: TcpListener,
    pub(crate) addr: SocketAddr,
}

impl BrokerListener {
    /// The local address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Consume the listener into an incoming-connection stream suitable for
    /// `serve_with_incoming_shutdown`.
    pub fn into_incoming(self) -> TcpListenerStream {
        TcpListenerStream::new(self.listener)
    }
}

/// The multiplexing primitive: allocate ids, turn an id into either a
/// listener or a dialed connection.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Allocate the next connection id. Pure allocation, no network traffic.
    fn next_id(&self) -> ConnId;

    /// Declare "I will host a server at `id`" and bind its listener.
    async fn accept(&self, id: ConnId, name: &str) -> Result<BrokerListener, BrokerError>;

    /// Connect to whatever is hosted at `id`, waiting for the other end to
    /// accept first if necessary.
    async fn dial(&self, id: ConnId, name: &str) -> Result<Channel, BrokerError>;
}

/// Table mapping announced connection ids to socket addresses, with a
/// rendezvous for dialers that arrive before the announcement.
#[derive(Default)]
pub(crate) struct EndpointTable {
    endpoints: Mutex<HashMap<ConnId, SocketAddr>>,
    announced: Notify,
}

impl EndpointTable {
    pub(crate) fn insert(&self, id: ConnId, addr: SocketAddr) {
        self.endpoints.lock().insert(id, addr);
        self.announced.notify_waiters();
    }

    pub(crate) fn get(&self, id: ConnId) -> Option<SocketAddr> {
        self.endpoints.lock().get(&id).copied()
    }

    /// Wait until `id` is announced, up to `timeout`.
    pub(crate) async fn wait_for(&self, id: ConnId, timeout: Duration) -> Option<SocketAddr> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so an announcement landing
            // between the check and the wait is not missed.
            let notified = self.announced.notified();
            if let Some(addr) = self.get(id) {
                return Some(addr);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get(id);
            }
        }
    }
}

/// Build a channel to a loopback address.
///
/// Connection establishment is lazy, matching the dial contract: a dialed
/// id is usable immediately and every RPC revalidates the transport, so a
/// backend that is still starting (or restarting) surfaces as a terminal
/// RPC error rather than a dial failure.
pub(crate) fn connect_endpoint(addr: SocketAddr) -> Result<Channel, tonic::transport::Error> {
    Ok(Endpoint::from_shared(format!("http://{addr}"))?
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .connect_lazy())
}

/// Allocate an id from a counter, asserting the id space has not wrapped.
///
/// Ids are never recycled within a session; exhausting 2^32 of them means a
/// connection leak, not a condition to recover from.
pub(crate) fn allocate_id(counter: &AtomicU32, step: u32) -> ConnId {
    let id = counter.fetch_add(step, Ordering::Relaxed);
    assert!(id <= ConnId::MAX - step, "connection id space exhausted");
    id
}

/// In-process broker: both halves share one instance.
///
/// Listeners are bound on the loopback interface; dialers rendezvous on the
/// shared announcement table. This is the broker used whenever host and
/// capabilities live in one process (and by nearly every test). For two
/// cooperating processes, see [`PeerBroker`](crate::sync::PeerBroker).
pub struct TcpBroker {
    next_id: AtomicU32,
    table: EndpointTable,
    dial_timeout: Duration,
}

impl TcpBroker {
    /// Create a broker with the default dial timeout.
    pub fn new() -> Self {
        Self::with_dial_timeout(DEFAULT_DIAL_TIMEOUT)
    }

    /// Create a broker that waits at most `dial_timeout` for an id to be
    /// accepted before failing the dial.
    pub fn with_dial_timeout(dial_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            table: EndpointTable::default(),
            dial_timeout,
        }
    }
}

impl Default for TcpBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for TcpBroker {
    fn next_id(&self) -> ConnId {
        allocate_id(&self.next_id, 1)
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
        self.table.insert(id, addr);
        debug!(id, addr = %addr, name, "accepted listener for connection");
        Ok(BrokerListener { listener, addr })
    }

    async fn dial(&self, id: ConnId, name: &str) -> Result<Channel, BrokerError> {
        let addr = self.table.wait_for(id, self.dial_timeout).await.ok_or_else(|| {
            BrokerError::ConnDial {
                name: name.to_string(),
                id,
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection id was never accepted",
                )),
            }
        })?;
        debug!(id, addr = %addr, name, "dialing connection");
        connect_endpoint(addr).map_err(|e| BrokerError::ConnDial {
            name: name.to_string(),
            id,
            source: Box::new(e),
        })
    }
}
