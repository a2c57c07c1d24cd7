//! SILTA - broker-mediated dynamic gRPC binding
//!
//! Infrastructure for hosting pluggable components as separate OS processes
//! while presenting them to callers as ordinary typed Rust values. One
//! transport relationship is multiplexed into an open-ended set of gRPC
//! services, with new bindings created at runtime: every "new-xyz" RPC
//! returns a freshly allocated connection id, which the caller dials and
//! wraps in a typed client.
//!
//! # Architecture
//!
//! ```text
//! Broker ──► BrokerExt (serve/dial) ──► ClientConn (self-healing)
//!                   │                         │
//!                   ▼                         ▼
//!            Resource/Resources        PluginClient (hot swap)
//!                   │
//!                   ▼
//!        ServiceClient/ServiceServer ──► CapabilitiesRegistry
//! ```
//!
//! The broker allocates connection ids and turns them into listeners
//! (`accept`) or channels (`dial`). Everything above it follows one
//! pattern: serve dependencies, call an id-returning RPC, dial the id,
//! wrap the channel - rolling back every already-built resource when a
//! later step fails.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod backoff;
pub mod broker;
pub mod capability;
pub mod conn;
pub mod error;
pub mod ext;
pub mod lifecycle;
pub mod plugin;
pub mod resource;
pub mod sync;

// Proto types generated from silta/v1/broker.proto
pub mod proto {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::derive_partial_eq_without_eq)]

    include!("proto/silta.v1.rs");
}

pub use backoff::BackoffConfig;
pub use broker::{Broker, BrokerListener, ConnId, TcpBroker, DEFAULT_DIAL_TIMEOUT};
pub use capability::{
    serve_capability, CallbackCapabilityClient, LocalRegistry, RegistryClient, RegistryServer,
    TriggerCapabilityClient,
};
pub use conn::{ClientConn, NewClientFn, NewClientFuture};
pub use error::{is_terminal, BrokerError, Result};
pub use ext::{BrokerExt, Stopper};
pub use lifecycle::{ServiceClient, ServiceServer, LIFECYCLE_RPC_TIMEOUT};
pub use plugin::{AtomicBroker, AtomicChannel, PluginClient};
pub use resource::{Resource, Resources};
pub use sync::{BrokerSide, BrokerSyncService, PeerBroker};
