//! The capabilities registry bridged over gRPC
//!
//! [`RegistryServer`] fronts any [`CapabilitiesRegistry`] implementation:
//! every capability it hands out is first wrapped as a freshly served
//! connection, so the reply is always a connection id. [`RegistryClient`]
//! implements the same trait against such a server, wrapping returned ids
//! in the correctly-typed capability clients.

use super::client::{remote_info, CallbackCapabilityClient, TriggerCapabilityClient};
use super::server::serve_capability;
use crate::error::{capability_error, capability_status, BrokerError};
use crate::ext::BrokerExt;
use crate::proto::capabilities_registry_client::CapabilitiesRegistryClient;
use crate::proto::capabilities_registry_server::{
    CapabilitiesRegistry as CapabilitiesRegistryRpc, CapabilitiesRegistryServer,
};
use crate::proto::{AddRequest, GetReply, GetRequest, ListReply};
use crate::resource::Resources;
use async_trait::async_trait;
use parking_lot::Mutex;
use silta_core::{
    CapabilitiesRegistry, Capability, CapabilityError, CapabilityType, CallbackCapability,
    ExecuteApiType, TriggerCapability,
};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

/// Serves a local registry over gRPC.
pub struct RegistryServer {
    inner: Arc<dyn CapabilitiesRegistry>,
    broker: BrokerExt,
    /// Connections served out via get/list, kept alive until the server is
    /// closed or the stop signal fires.
    served: Mutex<Resources>,
}

impl RegistryServer {
    /// Front `inner` through the given broker.
    pub fn new(inner: Arc<dyn CapabilitiesRegistry>, broker: BrokerExt) -> Self {
        Self {
            inner,
            broker,
            served: Mutex::new(Resources::new()),
        }
    }

    /// Convert into the tonic service for registration with a router.
    pub fn into_server(self) -> CapabilitiesRegistryServer<Self> {
        CapabilitiesRegistryServer::new(self)
    }

    /// Close every connection this server has served out.
    pub async fn close_served(&self) {
        let served = std::mem::take(&mut *self.served.lock());
        served.close_all().await;
    }

    async fn serve_one(
        &self,
        capability: Capability,
        name: &str,
    ) -> Result<GetReply, BrokerError> {
        let api = capability.execute_api_type();
        let (connection_id, resource) = serve_capability(&self.broker, capability, name).await?;
        self.served.lock().add(resource);
        Ok(GetReply {
            connection_id,
            execute_api_type: api as i32,
        })
    }
}

#[tonic::async_trait]
impl CapabilitiesRegistryRpc for RegistryServer {
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetReply>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(Status::invalid_argument("capability id is required"));
        }
        let capability = self.inner.get(&req.id).await.map_err(capability_status)?;
        let reply = self
            .serve_one(capability, &format!("capability.{}", req.id))
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }

    async fn get_trigger(
        &self,
        request: Request<GetRequest>,
    ) -> Result<Response<GetReply>, Status> {
        let req = request.into_inner();
        let trigger = self
            .inner
            .get_trigger(&req.id)
            .await
            .map_err(capability_status)?;
        let reply = self
            .serve_one(
                Capability::Trigger(trigger),
                &format!("capability.{}", req.id),
            )
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }

    async fn get_action(
        &self,
        request: Request<GetRequest>,
    ) -> Result<Response<GetReply>, Status> {
        let req = request.into_inner();
        let action = self
            .inner
            .get_action(&req.id)
            .await
            .map_err(capability_status)?;
        let reply = self
            .serve_one(
                Capability::Callback(action),
                &format!("capability.{}", req.id),
            )
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }

    async fn get_consensus(
        &self,
        request: Request<GetRequest>,
    ) -> Result<Response<GetReply>, Status> {
        let req = request.into_inner();
        let consensus = self
            .inner
            .get_consensus(&req.id)
            .await
            .map_err(capability_status)?;
        let reply = self
            .serve_one(
                Capability::Callback(consensus),
                &format!("capability.{}", req.id),
            )
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }

    async fn get_target(
        &self,
        request: Request<GetRequest>,
    ) -> Result<Response<GetReply>, Status> {
        let req = request.into_inner();
        let target = self
            .inner
            .get_target(&req.id)
            .await
            .map_err(capability_status)?;
        let reply = self
            .serve_one(
                Capability::Callback(target),
                &format!("capability.{}", req.id),
            )
            .await
            .map_err(Status::from)?;
        Ok(Response::new(reply))
    }

    async fn list(&self, _: Request<()>) -> Result<Response<ListReply>, Status> {
        let capabilities = self.inner.list().await.map_err(capability_status)?;

        // Serve each capability; if one fails mid-iteration, roll back every
        // connection already served for this reply.
        let mut connection_ids = Vec::with_capacity(capabilities.len());
        let mut resources = Resources::new();
        for (index, capability) in capabilities.into_iter().enumerate() {
            match serve_capability(
                &self.broker,
                capability,
                &format!("capability.list.{index}"),
            )
            .await
            {
                Ok((connection_id, resource)) => {
                    connection_ids.push(connection_id);
                    resources.add(resource);
                }
                Err(err) => {
                    warn!(error = %err, "failed to serve capability during list; rolling back");
                    resources.close_all().await;
                    return Err(Status::from(err));
                }
            }
        }
        self.served.lock().append(resources);

        Ok(Response::new(ListReply { connection_ids }))
    }

    async fn add(&self, request: Request<AddRequest>) -> Result<Response<()>, Status> {
        let req = request.into_inner();
        let api = ExecuteApiType::try_from(req.execute_api_type)
            .map_err(|_| Status::invalid_argument("invalid execute api type"))?;

        let channel = self
            .broker
            .dial(req.connection_id, "capability.add")
            .await
            .map_err(Status::from)?;

        let capability = match api {
            ExecuteApiType::Trigger => Capability::Trigger(Arc::new(
                TriggerCapabilityClient::new(self.broker.clone(), channel),
            )),
            ExecuteApiType::Callback => {
                Capability::Callback(Arc::new(CallbackCapabilityClient::new(channel)))
            }
            ExecuteApiType::Unspecified => {
                return Err(Status::invalid_argument(
                    "execute api type must be TRIGGER or CALLBACK",
                ));
            }
        };

        // The inner registry re-fetches the capability's info over the wire
        // and re-validates type conformance before storing anything.
        self.inner.add(capability).await.map_err(capability_status)?;
        info!(connection_id = req.connection_id, "capability added from remote");
        Ok(Response::new(()))
    }
}

/// Consumes a remote registry, implementing [`CapabilitiesRegistry`] over
/// the wire.
pub struct RegistryClient {
    broker: BrokerExt,
    channel: Channel,
    /// Capabilities this client has served into the remote registry.
    served: Mutex<Resources>,
}

impl RegistryClient {
    /// Wrap the registry served on `channel`.
    pub fn new(broker: BrokerExt, channel: Channel) -> Self {
        Self {
            broker,
            channel,
            served: Mutex::new(Resources::new()),
        }
    }

    /// Close every capability connection this client has served.
    pub async fn close_served(&self) {
        let served = std::mem::take(&mut *self.served.lock());
        served.close_all().await;
    }

    fn rpc(&self) -> CapabilitiesRegistryClient<Channel> {
        CapabilitiesRegistryClient::new(self.channel.clone())
    }

    async fn dial(&self, connection_id: u32, name: &str) -> Result<Channel, CapabilityError> {
        self.broker
            .dial(connection_id, name)
            .await
            .map_err(|e| CapabilityError::Remote(e.to_string()))
    }

    fn wrap(&self, channel: Channel, api: ExecuteApiType) -> Result<Capability, CapabilityError> {
        match api {
            ExecuteApiType::Trigger => Ok(Capability::Trigger(Arc::new(
                TriggerCapabilityClient::new(self.broker.clone(), channel),
            ))),
            ExecuteApiType::Callback => Ok(Capability::Callback(Arc::new(
                CallbackCapabilityClient::new(channel),
            ))),
            ExecuteApiType::Unspecified => Err(CapabilityError::InvalidType(0)),
        }
    }
}

#[async_trait]
impl CapabilitiesRegistry for RegistryClient {
    async fn get(&self, id: &str) -> Result<Capability, CapabilityError> {
        let reply = self
            .rpc()
            .get(GetRequest { id: id.to_string() })
            .await
            .map_err(|status| capability_error(&status))?
            .into_inner();
        let channel = self.dial(reply.connection_id, &format!("capability.{id}")).await?;
        self.wrap(channel, reply.execute_api_type())
    }

    async fn get_trigger(&self, id: &str) -> Result<Arc<dyn TriggerCapability>, CapabilityError> {
        let reply = self
            .rpc()
            .get_trigger(GetRequest { id: id.to_string() })
            .await
            .map_err(|status| capability_error(&status))?
            .into_inner();
        let channel = self.dial(reply.connection_id, &format!("capability.{id}")).await?;
        Ok(Arc::new(TriggerCapabilityClient::new(
            self.broker.clone(),
            channel,
        )))
    }

    async fn get_action(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, CapabilityError> {
        let reply = self
            .rpc()
            .get_action(GetRequest { id: id.to_string() })
            .await
            .map_err(|status| capability_error(&status))?
            .into_inner();
        let channel = self.dial(reply.connection_id, &format!("capability.{id}")).await?;
        Ok(Arc::new(CallbackCapabilityClient::new(channel)))
    }

    async fn get_consensus(
        &self,
        id: &str,
    ) -> Result<Arc<dyn CallbackCapability>, CapabilityError> {
        let reply = self
            .rpc()
            .get_consensus(GetRequest { id: id.to_string() })
            .await
            .map_err(|status| capability_error(&status))?
            .into_inner();
        let channel = self.dial(reply.connection_id, &format!("capability.{id}")).await?;
        Ok(Arc::new(CallbackCapabilityClient::new(channel)))
    }

    async fn get_target(&self, id: &str) -> Result<Arc<dyn CallbackCapability>, CapabilityError> {
        let reply = self
            .rpc()
            .get_target(GetRequest { id: id.to_string() })
            .await
            .map_err(|status| capability_error(&status))?
            .into_inner();
        let channel = self.dial(reply.connection_id, &format!("capability.{id}")).await?;
        Ok(Arc::new(CallbackCapabilityClient::new(channel)))
    }

    async fn list(&self) -> Result<Vec<Capability>, CapabilityError> {
        let connection_ids = self
            .rpc()
            .list(())
            .await
            .map_err(|status| capability_error(&status))?
            .into_inner()
            .connection_ids;

        let mut capabilities = Vec::with_capacity(connection_ids.len());
        for connection_id in connection_ids {
            let channel = self.dial(connection_id, "capability.list").await?;
            // The reply carries bare ids; the capability's own info service
            // tells us which typed client to wrap it in.
            let info = remote_info(&channel).await?;
            let capability = match info.capability_type() {
                CapabilityType::Trigger => self.wrap(channel, ExecuteApiType::Trigger)?,
                CapabilityType::Action | CapabilityType::Consensus | CapabilityType::Target => {
                    self.wrap(channel, ExecuteApiType::Callback)?
                }
                CapabilityType::Unspecified => {
                    return Err(CapabilityError::InvalidType(info.capability_type));
                }
            };
            capabilities.push(capability);
        }
        Ok(capabilities)
    }

    async fn add(&self, capability: Capability) -> Result<(), CapabilityError> {
        // Validate the declared type against the implemented API before
        // anything is served or sent: a mismatch registers nothing anywhere.
        let info = capability.info().await?;
        let declared = info.capability_type();
        if declared == CapabilityType::Unspecified {
            return Err(CapabilityError::InvalidType(info.capability_type));
        }
        if !capability.conforms_to(declared) {
            return Err(CapabilityError::TypeMismatch {
                id: info.id,
                declared: declared.as_str_name().to_string(),
                implemented: capability.implemented_api().to_string(),
            });
        }

        let api = capability.execute_api_type();
        let (connection_id, resource) =
            serve_capability(&self.broker, capability, &format!("capability.{}", info.id))
                .await
                .map_err(|e| CapabilityError::Registration(e.to_string()))?;

        match self
            .rpc()
            .add(AddRequest {
                connection_id,
                execute_api_type: api as i32,
            })
            .await
        {
            Ok(_) => {
                info!(id = %info.id, connection_id, "capability registered with remote registry");
                self.served.lock().add(resource);
                Ok(())
            }
            Err(status) => {
                // Roll back the served connection; the remote side rejected
                // or never saw the capability.
                if let Err(err) = resource.close().await {
                    warn!(error = %err, "failed to roll back served capability");
                }
                Err(capability_error(&status))
            }
        }
    }
}
