//! The minimal lifecycle contract every remote object exposes
//!
//! A [`Service`] is anything with a start/close lifecycle and a health
//! surface. The broker bridges this trait over gRPC: the server side wraps a
//! local implementation, the client side implements the same trait by
//! calling the remote one, so callers never see the process boundary.

use crate::error::ServiceError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Per-component health, keyed by component name.
///
/// `None` means healthy; `Some(message)` carries the failure description.
/// On the wire this is encoded as a `map<string, string>` where the empty
/// string is the healthy sentinel.
pub type HealthReport = HashMap<String, Option<String>>;

/// Lifecycle contract for long-lived components
///
/// Implementations must be cheap to call concurrently; `ready` and
/// `health_report` are polled by supervisors.
#[async_trait]
pub trait Service: Send + Sync {
    /// Stable name of this service, used as its key in health reports.
    fn name(&self) -> &str;

    /// Start the service. For gRPC-bridged clients this is a local no-op:
    /// the remote side is already running by construction.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Gracefully stop the service, releasing any resources it owns.
    async fn close(&self) -> Result<(), ServiceError>;

    /// Returns `Ok(())` once the service can handle requests.
    async fn ready(&self) -> Result<(), ServiceError>;

    /// Health of this service and everything it wraps.
    async fn health_report(&self) -> HealthReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysReady;

    #[async_trait]
    impl Service for AlwaysReady {
        fn name(&self) -> &str {
            "always-ready"
        }

        async fn start(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn ready(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn health_report(&self) -> HealthReport {
            HealthReport::from([(self.name().to_string(), None)])
        }
    }

    #[tokio::test]
    async fn test_service_is_object_safe() {
        let svc: std::sync::Arc<dyn Service> = std::sync::Arc::new(AlwaysReady);

        assert_eq!(svc.name(), "always-ready");
        assert!(svc.start().await.is_ok());
        assert!(svc.ready().await.is_ok());

        let report = svc.health_report().await;
        assert_eq!(report.get("always-ready"), Some(&None));

        assert!(svc.close().await.is_ok());
    }
}
