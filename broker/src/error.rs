//! Error types for the silta broker
//!
//! Connection-establishment errors carry the connection id, the
//! human-readable service name, and the underlying cause, so diagnostics can
//! point at *which* dynamic service failed without correlating logs from two
//! processes.

use crate::broker::ConnId;
use thiserror::Error;

// Re-export the shared plugin-facing errors from silta-core
pub use silta_core::{CapabilityError, ServiceError};

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Main error type for broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Accepting a listener for a broker-assigned connection id failed.
    /// Fatal for this one dynamic service, never for the whole process.
    #[error("failed to accept connection {id} for '{name}': {source}")]
    ConnAccept {
        /// Human-readable name of the dynamic service.
        name: String,
        /// The broker-assigned connection id.
        id: ConnId,
        /// The underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Dialing a broker-assigned connection id failed.
    #[error("failed to dial connection {id} for '{name}': {source}")]
    ConnDial {
        /// Human-readable name of the dynamic service.
        name: String,
        /// The broker-assigned connection id.
        id: ConnId,
        /// The underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The process-wide stop signal fired; no new connections are served.
    #[error("shutdown requested")]
    Stopped,

    /// Capability-level error, passed through unchanged.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// gRPC status from a remote call.
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),
}

impl From<BrokerError> for tonic::Status {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::ConnAccept { .. } | BrokerError::ConnDial { .. } => {
                tonic::Status::unavailable(err.to_string())
            }
            BrokerError::Stopped => tonic::Status::unavailable("shutting down"),
            BrokerError::Capability(e) => capability_status(e),
            BrokerError::Grpc(status) => status,
        }
    }
}

/// Map a capability error onto the gRPC status taxonomy.
///
/// Validation failures become `InvalidArgument`/`NotFound`/`AlreadyExists` so
/// remote callers never confuse them with the terminal transport codes.
pub(crate) fn capability_status(err: CapabilityError) -> tonic::Status {
    let message = err.to_string();
    match err {
        CapabilityError::NotFound { .. } => tonic::Status::not_found(message),
        CapabilityError::AlreadyExists { .. } => tonic::Status::already_exists(message),
        CapabilityError::TypeMismatch { .. }
        | CapabilityError::WrongType { .. }
        | CapabilityError::InvalidType(_)
        | CapabilityError::InvalidInfo(_) => tonic::Status::invalid_argument(message),
        CapabilityError::Registration(_)
        | CapabilityError::Execute(_)
        | CapabilityError::Remote(_) => tonic::Status::internal(message),
    }
}

/// Map a gRPC status from a remote capability call back onto the shared
/// error type. The remote message is preserved verbatim.
pub(crate) fn capability_error(status: &tonic::Status) -> CapabilityError {
    CapabilityError::Remote(format!("{:?}: {}", status.code(), status.message()))
}

/// Whether a gRPC status code implies the remote endpoint is unreachable and
/// the connection should be rebuilt.
///
/// Only `Unavailable` and `Cancelled` are terminal: the remote plugin is
/// presumed gone or restarting. Every other code (including `NotFound`,
/// `InvalidArgument`, `Internal`, ...) is returned to the caller unchanged;
/// a business-logic error must never trigger a reconnect storm.
pub fn is_terminal(code: tonic::Code) -> bool {
    matches!(code, tonic::Code::Unavailable | tonic::Code::Cancelled)
}
