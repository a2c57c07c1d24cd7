//! The trigger callback protocol
//!
//! A trigger registration spans two connections. The registrant serves a
//! per-registration `Callback` service ([`CallbackSink`]) and sends its
//! connection id with the registration; the trigger side dials back and runs
//! a forwarder ([`forward_trigger_events`]) that drains the implementation's
//! event channel into `SendResponse` RPCs until the channel closes (then
//! `CloseCallback`) or the registration is cancelled.

use crate::proto::callback_client::CallbackClient;
use crate::proto::callback_server::Callback;
use parking_lot::Mutex;
use silta_core::TriggerResponse;
use tokio::sync::{mpsc, oneshot};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

/// Receives forwarded trigger events and pushes them into the registrant's
/// channel. Closing drops the sender, which the registrant observes as a
/// closed channel.
pub(crate) struct CallbackSink {
    tx: Mutex<Option<mpsc::Sender<TriggerResponse>>>,
}

impl CallbackSink {
    pub(crate) fn new(tx: mpsc::Sender<TriggerResponse>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

#[tonic::async_trait]
impl Callback for CallbackSink {
    async fn send_response(
        &self,
        request: Request<TriggerResponse>,
    ) -> Result<Response<()>, Status> {
        // Clone the sender out so the lock is not held across the send.
        let sender = self.tx.lock().clone();
        let Some(sender) = sender else {
            return Err(Status::failed_precondition("callback already closed"));
        };
        sender
            .send(request.into_inner())
            .await
            .map_err(|_| Status::failed_precondition("callback receiver dropped"))?;
        Ok(Response::new(()))
    }

    async fn close_callback(&self, _: Request<()>) -> Result<Response<()>, Status> {
        self.tx.lock().take();
        Ok(Response::new(()))
    }
}

/// Drain `events` into the registrant's callback service.
///
/// Stops when the channel closes (signalling `CloseCallback`), when the
/// registration is cancelled, or when forwarding fails.
pub(crate) async fn forward_trigger_events(
    trigger_id: String,
    mut events: mpsc::Receiver<TriggerResponse>,
    channel: Channel,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut client = CallbackClient::new(channel);
    loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!(trigger_id = %trigger_id, "trigger registration cancelled");
                break;
            }
            next = events.recv() => match next {
                Some(response) => {
                    if let Err(status) = client.send_response(response).await {
                        warn!(
                            trigger_id = %trigger_id,
                            error = %status,
                            "failed to forward trigger event"
                        );
                        break;
                    }
                }
                None => {
                    debug!(trigger_id = %trigger_id, "trigger channel closed");
                    if let Err(status) = client.close_callback(()).await {
                        debug!(
                            trigger_id = %trigger_id,
                            error = %status,
                            "close callback failed"
                        );
                    }
                    break;
                }
            }
        }
    }
}
