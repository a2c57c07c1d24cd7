//! Serving a capability as its own broker connection

use super::trigger::forward_trigger_events;
use crate::broker::ConnId;
use crate::error::{capability_status, BrokerError};
use crate::ext::BrokerExt;
use crate::proto::base_info_server::{BaseInfo, BaseInfoServer};
use crate::proto::callback_executable_server::{CallbackExecutable, CallbackExecutableServer};
use crate::proto::trigger_executable_server::{TriggerExecutable, TriggerExecutableServer};
use crate::proto::{RegisterTriggerRequest, UnregisterTriggerRequest};
use crate::resource::{Resource, Resources};
use parking_lot::Mutex;
use silta_core::{
    Capability, CallbackCapability, CapabilityInfo, CapabilityRequest, CapabilityResponse,
    TriggerCapability,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

/// Serves a capability's declared identity.
struct InfoService {
    capability: Capability,
}

#[tonic::async_trait]
impl BaseInfo for InfoService {
    async fn info(&self, _: Request<()>) -> Result<Response<CapabilityInfo>, Status> {
        self.capability
            .info()
            .await
            .map(Response::new)
            .map_err(capability_status)
    }
}

/// Serves a callback capability's executable API.
pub struct CallbackExecutableService {
    inner: Arc<dyn CallbackCapability>,
}

impl CallbackExecutableService {
    /// Wrap a callback capability implementation.
    pub fn new(inner: Arc<dyn CallbackCapability>) -> Self {
        Self { inner }
    }
}

#[tonic::async_trait]
impl CallbackExecutable for CallbackExecutableService {
    async fn execute(
        &self,
        request: Request<CapabilityRequest>,
    ) -> Result<Response<CapabilityResponse>, Status> {
        self.inner
            .execute(request.into_inner())
            .await
            .map(Response::new)
            .map_err(capability_status)
    }
}

struct RegistrationHandle {
    cancel: oneshot::Sender<()>,
}

/// Serves a trigger capability's executable API, forwarding each
/// registration's events to the registrant's callback service.
pub struct TriggerExecutableService {
    inner: Arc<dyn TriggerCapability>,
    broker: BrokerExt,
    registrations: Mutex<HashMap<String, RegistrationHandle>>,
}

impl TriggerExecutableService {
    /// Wrap a trigger capability implementation.
    pub fn new(inner: Arc<dyn TriggerCapability>, broker: BrokerExt) -> Self {
        Self {
            inner,
            broker,
            registrations: Mutex::new(HashMap::new()),
        }
    }
}

#[tonic::async_trait]
impl TriggerExecutable for TriggerExecutableService {
    async fn register_trigger(
        &self,
        request: Request<RegisterTriggerRequest>,
    ) -> Result<Response<()>, Status> {
        let req = request.into_inner();
        let registration = req
            .request
            .ok_or_else(|| Status::invalid_argument("registration request is required"))?;
        let trigger_id = registration.trigger_id.clone();
        if trigger_id.is_empty() {
            return Err(Status::invalid_argument("trigger id is required"));
        }
        if self.registrations.lock().contains_key(&trigger_id) {
            return Err(Status::already_exists(format!(
                "trigger '{trigger_id}' already registered"
            )));
        }

        // Dial the registrant's callback first: if its service is
        // unreachable, nothing gets registered on the implementation.
        let channel = self
            .broker
            .dial(req.callback_id, "trigger.callback")
            .await
            .map_err(Status::from)?;
        let events = self
            .inner
            .register_trigger(registration)
            .await
            .map_err(capability_status)?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(forward_trigger_events(
            trigger_id.clone(),
            events,
            channel,
            cancel_rx,
        ));
        self.registrations
            .lock()
            .insert(trigger_id.clone(), RegistrationHandle { cancel: cancel_tx });

        debug!(trigger_id = %trigger_id, callback_id = req.callback_id, "trigger registered");
        Ok(Response::new(()))
    }

    async fn unregister_trigger(
        &self,
        request: Request<UnregisterTriggerRequest>,
    ) -> Result<Response<()>, Status> {
        let registration = request
            .into_inner()
            .request
            .ok_or_else(|| Status::invalid_argument("registration request is required"))?;

        match self.registrations.lock().remove(&registration.trigger_id) {
            Some(handle) => {
                let _ = handle.cancel.send(());
            }
            None => {
                warn!(trigger_id = %registration.trigger_id, "unregister for unknown trigger");
            }
        }

        self.inner
            .unregister_trigger(registration)
            .await
            .map_err(capability_status)?;
        Ok(Response::new(()))
    }
}

/// Wrap a capability as a freshly served connection exposing both its
/// base-info service and the type-specific executable service.
///
/// The returned resource owns the served connection; its lifetime is
/// independently trackable and closeable.
pub async fn serve_capability(
    broker: &BrokerExt,
    capability: Capability,
    name: &str,
) -> Result<(ConnId, Resource), BrokerError> {
    let info = BaseInfoServer::new(InfoService {
        capability: capability.clone(),
    });
    match capability {
        Capability::Trigger(trigger) => {
            let executable = TriggerExecutableServer::new(TriggerExecutableService::new(
                trigger,
                broker.clone(),
            ));
            broker
                .serve_new(
                    name,
                    move |mut server| server.add_service(info).add_service(executable),
                    Resources::new(),
                )
                .await
        }
        Capability::Callback(callback) => {
            let executable =
                CallbackExecutableServer::new(CallbackExecutableService::new(callback));
            broker
                .serve_new(
                    name,
                    move |mut server| server.add_service(info).add_service(executable),
                    Resources::new(),
                )
                .await
        }
    }
}
