// =============================================================================
// MESH CORE: network_logic.rs
// Request / response correlation and URI dispatch
// =============================================================================
//
// Every outstanding request is keyed by its messageId and settles exactly
// once: fulfilled by an "ok" response, rejected by an "error" (or unknown)
// response, or rejected by its timer. Settling removes the entry, so a late
// response with the same id is ignored.
//
// Income requests (uri longer than one character) go to the single handler
// registered for their uri. Handlers run in their own tasks; their result is
// handed back through `HandlerReply` and sent by the owner of this struct.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::time::{delay_queue, DelayQueue};

use crate::codec::NetworkMessage;
use crate::constants::{is_request_uri, SpecialUri, MAX_REQUEST_TIMEOUT_SECS};
use crate::error::{MeshError, Result};
use crate::peer_connections::PeerEvent;
use crate::router::Router;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<Bytes, BoxError>> + Send>>;
pub type UriHandler = Arc<dyn Fn(NetworkMessage) -> HandlerFuture + Send + Sync>;

/// Wrap an async fn into a [`UriHandler`].
pub fn uri_handler<F, Fut>(f: F) -> UriHandler
where
    F: Fn(NetworkMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, BoxError>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Response produced by a finished URI handler, waiting to be sent back.
#[derive(Debug)]
pub struct HandlerReply {
    pub to: String,
    pub status: SpecialUri,
    pub payload: Bytes,
    pub message_id: String,
}

struct PendingRequest {
    uri: String,
    reply: oneshot::Sender<Result<Bytes>>,
    timeout_key: delay_queue::Key,
}

pub struct NetworkLogic {
    router: Router,
    request_timeout: Duration,
    uri_handlers: HashMap<String, UriHandler>,
    pending: HashMap<String, PendingRequest>,
    timeouts: DelayQueue<String>,
    replies: mpsc::UnboundedSender<HandlerReply>,
}

impl NetworkLogic {
    pub fn new(
        router: Router,
        request_timeout: Duration,
        replies: mpsc::UnboundedSender<HandlerReply>,
    ) -> Self {
        NetworkLogic {
            router,
            request_timeout: request_timeout.min(Duration::from_secs(MAX_REQUEST_TIMEOUT_SECS)),
            uri_handlers: HashMap::new(),
            pending: HashMap::new(),
            timeouts: DelayQueue::new(),
            replies,
        }
    }

    /// Send a request. Routing failures come back right away; the returned
    /// receiver yields the response payload, the remote error, or a timeout.
    pub async fn request(
        &mut self,
        to_host_id: &str,
        uri: &str,
        payload: Bytes,
        ttl: Option<u8>,
    ) -> Result<oneshot::Receiver<Result<Bytes>>> {
        if !is_request_uri(uri) {
            return Err(MeshError::Validation(
                "Uri has to have length greater than 1. One byte is for status number".into(),
            ));
        }

        let mut message_id = Router::new_message_id();
        while self.pending.contains_key(&message_id) {
            message_id = Router::new_message_id();
        }

        self.router
            .send(to_host_id, uri, payload, &message_id, ttl)
            .await?;

        let (tx, rx) = oneshot::channel();
        let timeout_key = self.timeouts.insert(message_id.clone(), self.request_timeout);
        self.pending.insert(
            message_id,
            PendingRequest {
                uri: uri.to_string(),
                reply: tx,
                timeout_key,
            },
        );
        Ok(rx)
    }

    /// Only one handler per uri is allowed.
    pub fn start_listen_uri(&mut self, uri: &str, handler: UriHandler) -> Result<()> {
        if !is_request_uri(uri) {
            return Err(MeshError::Validation(format!(
                "Uri \"{}\" is reserved for responses",
                uri
            )));
        }
        if self.uri_handlers.contains_key(uri) {
            return Err(MeshError::DuplicateHandler(uri.to_string()));
        }
        self.uri_handlers.insert(uri.to_string(), handler);
        Ok(())
    }

    pub fn stop_listen_uri(&mut self, uri: &str) -> bool {
        self.uri_handlers.remove(uri).is_some()
    }

    /// Feed one raw transport event through the peer table and the router.
    pub async fn handle_link_event(&mut self, raw: PeerEvent) {
        match self.router.peers_mut().handle_link_event(raw) {
            Ok(events) => {
                for event in events {
                    self.handle_peer_event(event).await;
                }
            }
            Err(e) => log::error!("[{}] {}", self.router.my_id(), e),
        }
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        if let Some(message) = self.router.handle_peer_event(event).await {
            self.handle_income_message(message).await;
        }
    }

    async fn handle_income_message(&mut self, message: NetworkMessage) {
        // whatever carries the id of a pending request is its response
        if !is_request_uri(&message.uri) || self.pending.contains_key(&message.message_id) {
            self.settle(message);
            return;
        }
        let Some(originator) = message.originator().map(str::to_string) else {
            return;
        };

        match self.uri_handlers.get(&message.uri).cloned() {
            Some(handler) => self.spawn_handler(handler, message, originator),
            None => {
                let text = format!("No handler on uri \"{}\"", message.uri);
                log::warn!("[{}] {} (from {})", self.router.my_id(), text, originator);
                let res = self
                    .router
                    .send(
                        &originator,
                        SpecialUri::ResponseError.as_uri(),
                        Bytes::from(text),
                        &message.message_id,
                        None,
                    )
                    .await;
                if let Err(e) = res {
                    log::error!("[{}] can't send error back to {}: {}", self.router.my_id(), originator, e);
                }
            }
        }
    }

    fn spawn_handler(&self, handler: UriHandler, message: NetworkMessage, originator: String) {
        let replies = self.replies.clone();
        tokio::spawn(async move {
            let uri = message.uri.clone();
            let message_id = message.message_id.clone();

            // a panicking handler must still produce a response
            let (status, payload) = match tokio::spawn(handler(message)).await {
                Ok(Ok(payload)) => (SpecialUri::ResponseOk, payload),
                Ok(Err(e)) => (
                    SpecialUri::ResponseError,
                    Bytes::from(format!("Error while executing handler of uri \"{}\": {}", uri, e)),
                ),
                Err(e) => (
                    SpecialUri::ResponseError,
                    Bytes::from(format!("Error while executing handler of uri \"{}\": {}", uri, e)),
                ),
            };

            let _ = replies.send(HandlerReply {
                to: originator,
                status,
                payload,
                message_id,
            });
        });
    }

    /// Send back what a handler produced.
    pub async fn handle_reply(&mut self, reply: HandlerReply) {
        let res = self
            .router
            .send(
                &reply.to,
                reply.status.as_uri(),
                reply.payload,
                &reply.message_id,
                None,
            )
            .await;
        if let Err(e) = res {
            log::error!(
                "[{}] can't send response {} to {}: {}",
                self.router.my_id(),
                reply.message_id,
                reply.to,
                e
            );
        }
    }

    fn settle(&mut self, response: NetworkMessage) {
        let Some(pending) = self.pending.remove(&response.message_id) else {
            log::debug!(
                "[{}] ignoring response {} with no pending request",
                self.router.my_id(),
                response.message_id
            );
            return;
        };
        self.timeouts.remove(&pending.timeout_key);

        let result = match SpecialUri::from_uri(&response.uri) {
            Some(SpecialUri::ResponseOk) => Ok(response.payload),
            Some(SpecialUri::ResponseError) => Err(MeshError::RemoteHandler(
                String::from_utf8_lossy(&response.payload).into_owned(),
            )),
            _ => Err(MeshError::UnknownResponse(response.uri.clone())),
        };
        // the caller may have stopped waiting
        let _ = pending.reply.send(result);
    }

    /// Resolves with the messageId of the next request whose timer ran out.
    /// Resolves with `None` right away when no request is pending.
    pub async fn next_expired(&mut self) -> Option<String> {
        std::future::poll_fn(|cx| self.timeouts.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }

    pub fn expire(&mut self, message_id: &str) {
        if let Some(pending) = self.pending.remove(message_id) {
            log::warn!(
                "[{}] request {} to uri \"{}\" timed out",
                self.router.my_id(),
                message_id,
                pending.uri
            );
            let _ = pending.reply.send(Err(MeshError::RequestTimeout(pending.uri)));
        }
    }

    /// Reject everything still pending and detach from all connections.
    pub fn close(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(MeshError::HostClosed));
        }
        self.timeouts.clear();
        self.uri_handlers.clear();
        self.router.clear_listeners();
        self.router.peers_mut().destroy();
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn handler_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.uri_handlers.keys().cloned().collect();
        uris.sort();
        uris
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }
}
