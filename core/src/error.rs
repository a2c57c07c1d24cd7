//! Error types shared between the broker host and capability plugins

use thiserror::Error;

/// Error type for capability operations
///
/// This is the standard error type used by capability implementations and by
/// the typed clients that wrap remote capabilities. Variants are structured
/// so callers can distinguish validation failures (never retried) from
/// remote-call failures.
///
/// # Example
///
/// ```
/// use silta_core::CapabilityError;
///
/// fn lookup(id: &str) -> Result<(), CapabilityError> {
///     Err(CapabilityError::NotFound { id: id.to_string() })
/// }
///
/// match lookup("streams-trigger@1.0.0") {
///     Err(CapabilityError::NotFound { id }) => println!("missing: {}", id),
///     other => println!("{:?}", other),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// No capability with the given id is registered.
    #[error("capability '{id}' not found")]
    NotFound {
        /// The capability id that was looked up.
        id: String,
    },

    /// A capability's declared type does not match the executable API it
    /// actually implements. Registries reject the capability outright;
    /// nothing is registered.
    #[error("capability '{id}' declares {declared} but implements the {implemented} API")]
    TypeMismatch {
        /// The capability id.
        id: String,
        /// The type declared in `CapabilityInfo`.
        declared: String,
        /// The executable API the value actually implements.
        implemented: String,
    },

    /// A registered capability is not of the requested kind, e.g. asking
    /// for an action by the id of a target.
    #[error("capability '{id}' is {actual}, not {requested}")]
    WrongType {
        /// The capability id.
        id: String,
        /// The kind the caller asked for.
        requested: String,
        /// The kind actually registered.
        actual: String,
    },

    /// A numeric capability or API type field was out of range.
    #[error("invalid capability type {0}")]
    InvalidType(i32),

    /// A capability's declared identity was malformed.
    #[error("invalid capability info: {0}")]
    InvalidInfo(String),

    /// A capability with this id is already registered.
    #[error("capability '{id}' already registered")]
    AlreadyExists {
        /// The duplicate capability id.
        id: String,
    },

    /// Trigger registration or unregistration failed.
    #[error("trigger registration failed: {0}")]
    Registration(String),

    /// Capability execution failed.
    #[error("execution failed: {0}")]
    Execute(String),

    /// A remote capability call failed at the transport or RPC layer.
    #[error("remote capability error: {0}")]
    Remote(String),
}

/// Error type for service lifecycle operations
///
/// Returned by [`Service`](crate::Service) implementations, both local ones
/// and the gRPC-bridged clients that front a remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service failed to start.
    #[error("start failed: {0}")]
    Start(String),

    /// The service is not (yet) ready to handle requests.
    #[error("service not ready: {0}")]
    NotReady(String),

    /// Graceful close failed.
    #[error("close failed: {0}")]
    Close(String),

    /// A lifecycle RPC to the remote side failed.
    #[error("remote lifecycle call failed: {0}")]
    Remote(String),
}
