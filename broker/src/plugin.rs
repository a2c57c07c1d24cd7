//! Hot-swappable handle to one plugin process
//!
//! A [`PluginClient`] is the top-level `(broker, channel)` pair for one
//! out-of-process plugin. When the plugin is relaunched, `refresh` swaps in
//! the new pair in place: higher-level clients keep reading through the
//! atomic cells and never hold a stale reference.
//!
//! The two stores are each atomic but not transactional with respect to one
//! another; callers tolerate a short window where broker and channel come
//! from different generations because every RPC revalidates the channel it
//! uses.

use crate::ext::BrokerExt;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tonic::transport::Channel;
use tracing::info;

/// Atomically swappable broker handle.
pub struct AtomicBroker {
    inner: ArcSwap<BrokerExt>,
}

impl AtomicBroker {
    /// Wrap an initial broker.
    pub fn new(broker: BrokerExt) -> Self {
        Self {
            inner: ArcSwap::from_pointee(broker),
        }
    }

    /// The current broker. Never blocks on writers.
    pub fn load(&self) -> Arc<BrokerExt> {
        self.inner.load_full()
    }

    /// Replace the broker.
    pub fn store(&self, broker: BrokerExt) {
        self.inner.store(Arc::new(broker));
    }
}

/// Atomically swappable channel.
pub struct AtomicChannel {
    inner: ArcSwap<Channel>,
}

impl AtomicChannel {
    /// Wrap an initial channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: ArcSwap::from_pointee(channel),
        }
    }

    /// A clone of the current channel. Never blocks on writers.
    pub fn load(&self) -> Channel {
        self.inner.load().as_ref().clone()
    }

    /// Replace the channel.
    pub fn store(&self, channel: Channel) {
        self.inner.store(Arc::new(channel));
    }
}

/// The top-level connection to one plugin process.
pub struct PluginClient {
    name: String,
    broker: AtomicBroker,
    channel: AtomicChannel,
}

impl PluginClient {
    /// Wrap the initial broker/channel pair handed over by the plugin
    /// launcher.
    pub fn new(name: impl Into<String>, broker: BrokerExt, channel: Channel) -> Self {
        Self {
            name: name.into(),
            broker: AtomicBroker::new(broker),
            channel: AtomicChannel::new(channel),
        }
    }

    /// The plugin's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current broker.
    pub fn broker(&self) -> Arc<BrokerExt> {
        self.broker.load()
    }

    /// A clone of the current base channel.
    pub fn channel(&self) -> Channel {
        self.channel.load()
    }

    /// Swap in a brand-new broker/channel pair after the plugin process was
    /// relaunched. References already held by higher-level clients stay
    /// valid; they observe the new pair on their next read.
    pub fn refresh(&self, broker: BrokerExt, channel: Channel) {
        self.broker.store(broker);
        self.channel.store(channel);
        info!(plugin = %self.name, "refreshed plugin connection");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::TcpBroker;
    use crate::ext::Stopper;
    use std::time::Duration;

    fn broker_ext(name: &str) -> (Stopper, BrokerExt) {
        let stopper = Stopper::new();
        let ext = BrokerExt::new(
            Arc::new(TcpBroker::new()),
            stopper.subscribe(),
            name.to_string(),
        );
        (stopper, ext)
    }

    async fn loopback_channel() -> (Channel, tokio::net::TcpListener) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect_timeout(Duration::from_secs(1))
            .connect_lazy();
        (channel, listener)
    }

    #[tokio::test]
    async fn test_refresh_swaps_both_cells() {
        let (_s1, first_broker) = broker_ext("gen-1");
        let (_s2, second_broker) = broker_ext("gen-2");
        let (first_channel, _l1) = loopback_channel().await;
        let (second_channel, _l2) = loopback_channel().await;

        let plugin = PluginClient::new("median", first_broker, first_channel);
        assert_eq!(plugin.broker().name(), "gen-1");

        plugin.refresh(second_broker, second_channel);
        assert_eq!(plugin.broker().name(), "gen-2");
    }

    #[tokio::test]
    async fn test_concurrent_readers_never_block() {
        let (_stopper, broker) = broker_ext("gen-1");
        let (channel, _listener) = loopback_channel().await;
        let plugin = Arc::new(PluginClient::new("median", broker, channel));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let plugin = Arc::clone(&plugin);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let _ = plugin.channel();
                    let _ = plugin.broker();
                }
            }));
        }

        // Swap repeatedly while readers spin.
        for i in 0..20 {
            let (_s, broker) = broker_ext(&format!("gen-{i}"));
            let (channel, _l) = loopback_channel().await;
            plugin.refresh(broker, channel);
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
