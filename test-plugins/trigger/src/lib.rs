//! Test capability plugin
//!
//! A trigger that fires on an interval and an action that echoes request
//! payloads, with a helper that registers both into a host's registry over
//! a peer broker. Used for black-box testing of the silta broker.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

use async_trait::async_trait;
use parking_lot::Mutex;
use silta_broker::{BrokerExt, RegistryClient};
use silta_core::{
    BaseCapability, CapabilitiesRegistry, Capability, CapabilityError, CapabilityInfo,
    CapabilityRequest, CapabilityResponse, CapabilityType, CallbackCapability, TriggerCapability,
    TriggerEvent, TriggerRegistrationRequest, TriggerResponse, TRIGGER_CHANNEL_CAPACITY,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Trigger capability that fires an event on a fixed interval for every
/// registration until it is unregistered.
pub struct IntervalTrigger {
    period: Duration,
    fired: Arc<AtomicU64>,
    active: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl IntervalTrigger {
    /// A trigger firing every `period`.
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self {
            period,
            fired: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Total events fired across all registrations.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    /// Number of live registrations.
    pub fn active_registrations(&self) -> usize {
        self.active.lock().len()
    }
}

#[async_trait]
impl BaseCapability for IntervalTrigger {
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(CapabilityInfo {
            id: "interval-trigger@1.0.0".to_string(),
            capability_type: CapabilityType::Trigger as i32,
            description: "fires an event on a fixed interval".to_string(),
            version: "1.0.0".to_string(),
        })
    }
}

#[async_trait]
impl TriggerCapability for IntervalTrigger {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError> {
        if request.trigger_id.is_empty() {
            return Err(CapabilityError::Registration(
                "trigger id is required".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        self.active.lock().insert(request.trigger_id.clone(), stop_tx);

        let period = self.period;
        let trigger_id = request.trigger_id;
        let fired = Arc::clone(&self.fired);

        info!(trigger_id = %trigger_id, period_ms = period.as_millis() as u64, "registration started");
        tokio::spawn(async move {
            let mut n: u64 = 0;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!(trigger_id = %trigger_id, "registration stopped");
                        return;
                    }
                    _ = tokio::time::sleep(period) => {}
                }
                let response = TriggerResponse {
                    event: Some(TriggerEvent {
                        event_id: format!("{trigger_id}-{n}"),
                        payload: n.to_be_bytes().to_vec(),
                    }),
                    error: String::new(),
                };
                if tx.send(response).await.is_err() {
                    debug!(trigger_id = %trigger_id, "registrant went away");
                    return;
                }
                fired.fetch_add(1, Ordering::SeqCst);
                n += 1;
            }
        });
        Ok(rx)
    }

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        match self.active.lock().remove(&request.trigger_id) {
            Some(stop) => {
                let _ = stop.send(());
                Ok(())
            }
            None => Err(CapabilityError::Registration(format!(
                "trigger '{}' is not registered",
                request.trigger_id
            ))),
        }
    }
}

/// Action capability that echoes the request payload back.
pub struct EchoAction {
    executed: AtomicU64,
}

impl EchoAction {
    /// A fresh echo action.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executed: AtomicU64::new(0),
        })
    }

    /// Number of executed requests.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseCapability for EchoAction {
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        Ok(CapabilityInfo {
            id: "echo-action@1.0.0".to_string(),
            capability_type: CapabilityType::Action as i32,
            description: "echoes request payloads".to_string(),
            version: "1.0.0".to_string(),
        })
    }
}

#[async_trait]
impl CallbackCapability for EchoAction {
    async fn execute(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(CapabilityResponse {
            payload: request.payload,
            error: String::new(),
        })
    }
}

/// Register the plugin's capabilities with the host registry reached over
/// `channel`.
pub async fn register_capabilities(
    broker: BrokerExt,
    channel: tonic::transport::Channel,
    trigger: Arc<IntervalTrigger>,
    action: Arc<EchoAction>,
) -> Result<RegistryClient, CapabilityError> {
    let registry = RegistryClient::new(broker, channel);
    registry.add(Capability::Trigger(trigger)).await?;
    registry.add(Capability::Callback(action)).await?;
    info!("capabilities registered with host");
    Ok(registry)
}
