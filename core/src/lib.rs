//! silta-core - Core types for the silta dynamic-binding broker
//!
//! This crate provides the foundational types that are shared between
//! the silta broker host and out-of-process capability plugins:
//!
//! - [`Service`] - the minimal lifecycle contract every remote object exposes
//! - [`Capability`] and the capability traits - typed remote objects
//! - [`CapabilitiesRegistry`] - the typed capability directory contract
//! - [`CapabilityError`] / [`ServiceError`] - error types for plugin operations
//! - proto message types ([`CapabilityInfo`], [`CapabilityRequest`], ...) -
//!   the wire format, used directly as domain types
//!
//! # Why this crate exists
//!
//! Capability plugins need to implement the capability traits and speak the
//! shared message types. Without `silta-core`, they would depend on
//! `silta-broker`, but the broker also needs to wrap plugin-implemented
//! capabilities, creating a cyclic dependency.
//!
//! By extracting the shared contract here, we break the cycle:
//!
//! ```text
//! silta-core ◄── silta-broker
//!     ▲
//!     └────────── capability plugins
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

/// Capability traits and the tagged capability value
pub mod capability;
mod error;
/// The capabilities registry contract
pub mod registry;
/// The service lifecycle contract
pub mod service;

// Proto types generated from silta/capability/v1/capability.proto
pub mod proto {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::derive_partial_eq_without_eq)]
    #![allow(missing_docs)]

    include!("proto/silta.capability.v1.rs");
}

pub use capability::{
    BaseCapability, Capability, CallbackCapability, TriggerCapability, TRIGGER_CHANNEL_CAPACITY,
};
pub use error::{CapabilityError, ServiceError};
pub use registry::CapabilitiesRegistry;
pub use service::{HealthReport, Service};

// Re-export the wire types for convenience
pub use proto::{
    CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType, ExecuteApiType,
    TriggerEvent, TriggerRegistrationRequest, TriggerResponse,
};
