//! Typed clients for capabilities served on broker connections

use super::trigger::CallbackSink;
use crate::error::capability_error;
use crate::ext::BrokerExt;
use crate::proto::base_info_client::BaseInfoClient;
use crate::proto::callback_executable_client::CallbackExecutableClient;
use crate::proto::callback_server::CallbackServer;
use crate::proto::trigger_executable_client::TriggerExecutableClient;
use crate::proto::{RegisterTriggerRequest, UnregisterTriggerRequest};
use crate::resource::{Resource, Resources};
use async_trait::async_trait;
use parking_lot::Mutex;
use silta_core::{
    BaseCapability, CallbackCapability, CapabilityError, CapabilityInfo, CapabilityRequest,
    CapabilityResponse, TriggerCapability, TriggerRegistrationRequest, TriggerResponse,
    TRIGGER_CHANNEL_CAPACITY,
};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tonic::transport::Channel;
use tracing::debug;

pub(crate) async fn remote_info(channel: &Channel) -> Result<CapabilityInfo, CapabilityError> {
    BaseInfoClient::new(channel.clone())
        .info(())
        .await
        .map(|response| response.into_inner())
        .map_err(|status| capability_error(&status))
}

/// A remote trigger capability, reached over a broker connection.
///
/// `register_trigger` serves a per-registration callback service through the
/// broker and hands its connection id to the remote side, which dials back
/// and forwards events.
pub struct TriggerCapabilityClient {
    broker: BrokerExt,
    channel: Channel,
    registrations: Mutex<HashMap<String, Resource>>,
}

impl TriggerCapabilityClient {
    /// Wrap the trigger capability served on `channel`.
    pub fn new(broker: BrokerExt, channel: Channel) -> Self {
        Self {
            broker,
            channel,
            registrations: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BaseCapability for TriggerCapabilityClient {
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        remote_info(&self.channel).await
    }
}

#[async_trait]
impl TriggerCapability for TriggerCapabilityClient {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>, CapabilityError> {
        let trigger_id = request.trigger_id.clone();
        if trigger_id.is_empty() {
            return Err(CapabilityError::Registration(
                "trigger id is required".to_string(),
            ));
        }
        if self.registrations.lock().contains_key(&trigger_id) {
            return Err(CapabilityError::Registration(format!(
                "trigger '{trigger_id}' already registered"
            )));
        }

        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let sink = CallbackSink::new(tx);
        let (callback_id, resource) = self
            .broker
            .serve_new(
                &format!("callback.{trigger_id}"),
                move |mut server| server.add_service(CallbackServer::new(sink)),
                Resources::new(),
            )
            .await
            .map_err(|e| CapabilityError::Registration(e.to_string()))?;

        let mut client = TriggerExecutableClient::new(self.channel.clone());
        match client
            .register_trigger(RegisterTriggerRequest {
                callback_id,
                request: Some(request),
            })
            .await
        {
            Ok(_) => {
                self.registrations.lock().insert(trigger_id, resource);
                Ok(rx)
            }
            Err(status) => {
                // Roll back the callback service; nothing was registered.
                if let Err(err) = resource.close().await {
                    debug!(error = %err, "failed to roll back callback service");
                }
                Err(capability_error(&status))
            }
        }
    }

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        let resource = self.registrations.lock().remove(&request.trigger_id);

        let mut client = TriggerExecutableClient::new(self.channel.clone());
        let result = client
            .unregister_trigger(UnregisterTriggerRequest {
                request: Some(request),
            })
            .await;

        // Close the callback service whether or not the remote call worked;
        // the registration is gone either way.
        if let Some(resource) = resource {
            if let Err(err) = resource.close().await {
                debug!(error = %err, "failed to close callback service");
            }
        }

        result
            .map(|_| ())
            .map_err(|status| capability_error(&status))
    }
}

/// A remote action/consensus/target capability, reached over a broker
/// connection.
pub struct CallbackCapabilityClient {
    channel: Channel,
}

impl CallbackCapabilityClient {
    /// Wrap the callback capability served on `channel`.
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl BaseCapability for CallbackCapabilityClient {
    async fn info(&self) -> Result<CapabilityInfo, CapabilityError> {
        remote_info(&self.channel).await
    }
}

#[async_trait]
impl CallbackCapability for CallbackCapabilityClient {
    async fn execute(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        CallbackExecutableClient::new(self.channel.clone())
            .execute(request)
            .await
            .map(|response| response.into_inner())
            .map_err(|status| capability_error(&status))
    }
}
