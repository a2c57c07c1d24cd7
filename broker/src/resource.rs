//! Named closers for dynamically created servers and connections
//!
//! Every server or connection the broker causes to exist is handed back as a
//! [`Resource`]. Multi-step remote constructions register each step's
//! resource before running the next, so a failure partway rolls back
//! everything built so far via [`Resources::close_all`]; no half-registered
//! dynamic service is ever left reachable.

use crate::error::BrokerError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

enum Closer {
    /// A dynamically served gRPC server: signal its shutdown future, then
    /// wait for the serve task (which cascades into its dependencies).
    Server {
        shutdown: oneshot::Sender<()>,
        done: JoinHandle<()>,
    },
    /// Caller-supplied teardown.
    Custom(Box<dyn FnOnce() -> Result<(), BrokerError> + Send + Sync>),
}

/// A named, closeable handle to something the broker caused to exist.
///
/// Closed exactly once: `close` consumes the resource. Dropping a resource
/// without closing it leaves the underlying server running until the
/// process-wide stop signal fires.
pub struct Resource {
    name: String,
    closer: Closer,
}

impl Resource {
    pub(crate) fn server(
        name: impl Into<String>,
        shutdown: oneshot::Sender<()>,
        done: JoinHandle<()>,
    ) -> Self {
        Self {
            name: name.into(),
            closer: Closer::Server { shutdown, done },
        }
    }

    /// A resource with caller-supplied teardown.
    pub fn custom(
        name: impl Into<String>,
        close: impl FnOnce() -> Result<(), BrokerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            closer: Closer::Custom(Box::new(close)),
        }
    }

    /// The resource's name, used in teardown logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the underlying server or connection. For served resources this
    /// waits until the server has fully stopped and its dependencies are
    /// closed.
    pub async fn close(self) -> Result<(), BrokerError> {
        match self.closer {
            Closer::Server { shutdown, done } => {
                // The receiver is gone when the server already stopped
                // (global shutdown); that is not an error here.
                let _ = shutdown.send(());
                let _ = done.await;
                Ok(())
            }
            Closer::Custom(close) => close(),
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").field("name", &self.name).finish()
    }
}

/// Ordered, append-only collection of resources.
///
/// The rollback primitive: when a multi-step construction fails partway,
/// `close_all` tears down every step that already succeeded.
#[derive(Debug, Default)]
pub struct Resources(Vec<Resource>);

impl Resources {
    /// An empty collection.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Register a resource. Ownership of closing it moves to the collection.
    pub fn add(&mut self, resource: Resource) {
        self.0.push(resource);
    }

    /// Move every resource from `other` into this collection.
    pub fn append(&mut self, other: Resources) {
        self.0.extend(other.0);
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Close every resource, most recently built first. Teardown is
    /// best-effort: individual errors are logged and the remaining
    /// resources are still closed.
    pub async fn close_all(self) {
        for resource in self.0.into_iter().rev() {
            let name = resource.name().to_string();
            match resource.close().await {
                Ok(()) => debug!(resource = %name, "closed resource"),
                Err(err) => error!(resource = %name, error = %err, "failed to close resource"),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting(name: &str, closed: &Arc<AtomicU32>) -> Resource {
        let closed = Arc::clone(closed);
        Resource::custom(name, move || {
            closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing(name: &str, closed: &Arc<AtomicU32>) -> Resource {
        let closed = Arc::clone(closed);
        Resource::custom(name, move || {
            closed.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Stopped)
        })
    }

    #[tokio::test]
    async fn test_close_all_closes_each_exactly_once() {
        let closed = Arc::new(AtomicU32::new(0));

        let mut resources = Resources::new();
        for i in 0..5 {
            resources.add(counting(&format!("resource-{i}"), &closed));
        }
        assert_eq!(resources.len(), 5);

        resources.close_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_close_all_continues_past_errors() {
        // Rollback completeness: a failing closer in the middle must not
        // stop the remaining resources from being closed.
        let closed = Arc::new(AtomicU32::new(0));

        let mut resources = Resources::new();
        resources.add(counting("first", &closed));
        resources.add(failing("failing", &closed));
        resources.add(counting("last", &closed));

        resources.close_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_partial_construction_rollback() {
        // Simulate "k of N steps succeeded": only the k built resources are
        // registered, and exactly those are closed.
        let closed = Arc::new(AtomicU32::new(0));
        let built = 3;

        let mut resources = Resources::new();
        for i in 0..built {
            resources.add(counting(&format!("step-{i}"), &closed));
        }
        // Step 4 fails before producing a resource; roll back.
        resources.close_all().await;

        assert_eq!(closed.load(Ordering::SeqCst), built);
    }

    #[tokio::test]
    async fn test_append_moves_ownership() {
        let closed = Arc::new(AtomicU32::new(0));

        let mut batch = Resources::new();
        batch.add(counting("a", &closed));
        batch.add(counting("b", &closed));

        let mut all = Resources::new();
        all.append(batch);
        assert_eq!(all.len(), 2);

        all.close_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_close_all_is_a_noop() {
        Resources::new().close_all().await;
    }
}
