// =============================================================================
// MESH CORE: host.rs
// One running mesh host: actor task and its handle
// =============================================================================
//
// All routing state (peer table, routes, pending requests, handlers) is owned
// by a single task. Transport callbacks, API calls, finished handlers and
// request timers reach it through channels, so the tables have exactly one
// writer. Raw transport events are drained before API commands in every
// iteration: a link brought up before a request is always seen first.
// =============================================================================

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::NetworkMessage;
use crate::config::HostConfig;
use crate::connection::Connection;
use crate::error::{MeshError, Result};
use crate::events::ListenerId;
use crate::network_logic::{uri_handler, BoxError, HandlerReply, NetworkLogic, UriHandler};
use crate::peer_connections::{PeerConnections, PeerEvent};
use crate::router::{IncomeMessageListener, Router, RouterStats};

// -----------------------------------------------------------------------------
// STATUS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub host_id: String,
    pub connections: Vec<String>,
    /// (peerId, connection name)
    pub active_peers: Vec<(String, String)>,
    /// (peerId, hostId) of directly reachable hosts
    pub closest_hosts: Vec<(String, String)>,
    /// destination → [next hop, ..., destination], sorted by destination
    pub routes: Vec<(String, Vec<String>)>,
    pub handler_uris: Vec<String>,
    pub pending_requests: usize,
    pub stats: RouterStats,
}

impl HostStatus {
    fn collect(logic: &NetworkLogic) -> Self {
        let router = logic.router();
        let mut routes: Vec<(String, Vec<String>)> = router
            .resolver()
            .routes()
            .map(|(to, route)| (to.clone(), route.clone()))
            .collect();
        routes.sort();

        HostStatus {
            host_id: router.my_id().to_string(),
            connections: router.peers().connection_names(),
            active_peers: router.peers().active_peers(),
            closest_hosts: router.resolver().active_peers().to_vec(),
            routes,
            handler_uris: logic.handler_uris(),
            pending_requests: logic.pending_requests(),
            stats: router.stats(),
        }
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f,
            "╔══════════════════════════════════════════════╗\n\
             ║  MESH HOST {:<33} ║\n\
             ╠══════════════════════════════════════════════╣\n\
             ║  Connections:     {:>6}                     ║\n\
             ║  Active peers:    {:>6}                     ║\n\
             ║  Routes:          {:>6}                     ║\n\
             ║  URI handlers:    {:>6}                     ║\n\
             ║  Pending req:     {:>6}                     ║\n\
             ║  Recv / deliv:    {:>6} / {:<6}            ║\n\
             ║  Forwarded:       {:>6}                     ║\n\
             ║  Dropped (ttl):   {:>6}                     ║\n\
             ║  Dropped (other): {:>6}                     ║\n\
             ╚══════════════════════════════════════════════╝",
            self.host_id,
            self.connections.len(),
            self.active_peers.len(),
            self.routes.len(),
            self.handler_uris.len(),
            self.pending_requests,
            self.stats.received, self.stats.delivered,
            self.stats.forwarded,
            self.stats.dropped_ttl,
            self.stats.dropped_malformed + self.stats.dropped_unroutable,
        )?;
        for (to, route) in &self.routes {
            write!(f, "\n  {} via {}", to, route.join(" → "))?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// COMMANDS
// -----------------------------------------------------------------------------

type PendingReply = oneshot::Receiver<Result<Bytes>>;

enum Command {
    Request {
        to: String,
        uri: String,
        payload: Bytes,
        ttl: Option<u8>,
        reply: oneshot::Sender<Result<PendingReply>>,
    },
    StartListen {
        uri: String,
        handler: UriHandler,
        reply: oneshot::Sender<Result<()>>,
    },
    StopListen {
        uri: String,
        reply: oneshot::Sender<bool>,
    },
    OnIncome {
        listener: Arc<IncomeMessageListener>,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveListener {
        id: ListenerId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<HostStatus>,
    },
}

// -----------------------------------------------------------------------------
// HOST
// -----------------------------------------------------------------------------

pub struct MeshHost {
    host_id: String,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MeshHost {
    /// Attach to `connections` and start serving. Must be called inside a
    /// tokio runtime.
    pub fn spawn(config: HostConfig, connections: Vec<(String, Arc<dyn Connection>)>) -> Result<Self> {
        config.validate()?;

        let mut peers = PeerConnections::new(connections)?;
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        peers.init(link_tx);

        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let logic = NetworkLogic::new(Router::new(&config, peers), config.request_timeout(), replies_tx);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(logic, link_rx, commands_rx, replies_rx, shutdown.clone()));

        log::info!(
            "[{}] mesh host started (timeout {}s, ttl {})",
            config.host_id,
            config.request_timeout_secs,
            config.default_ttl
        );
        Ok(MeshHost {
            host_id: config.host_id,
            commands,
            shutdown,
            task: Some(task),
        })
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Send a request to `to` and wait for its response payload.
    pub async fn request(
        &self,
        to: &str,
        uri: &str,
        payload: impl Into<Bytes>,
        ttl: Option<u8>,
    ) -> Result<Bytes> {
        let pending = self
            .call(|reply| Command::Request {
                to: to.to_string(),
                uri: uri.to_string(),
                payload: payload.into(),
                ttl,
                reply,
            })
            .await??;
        pending.await.map_err(|_| MeshError::HostClosed)?
    }

    pub async fn start_listen_uri<F, Fut>(&self, uri: &str, handler: F) -> Result<()>
    where
        F: Fn(NetworkMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Bytes, BoxError>> + Send + 'static,
    {
        let handler = uri_handler(handler);
        self.call(|reply| Command::StartListen {
            uri: uri.to_string(),
            handler,
            reply,
        })
        .await?
    }

    pub async fn stop_listen_uri(&self, uri: &str) -> Result<bool> {
        self.call(|reply| Command::StopListen {
            uri: uri.to_string(),
            reply,
        })
        .await
    }

    /// Observe every message delivered to this host, requests and responses.
    pub async fn on_income_message<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&NetworkMessage) + Send + Sync + 'static,
    {
        let listener: Arc<IncomeMessageListener> = Arc::new(listener);
        self.call(|reply| Command::OnIncome { listener, reply }).await
    }

    pub async fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        self.call(|reply| Command::RemoveListener { id, reply }).await
    }

    pub async fn status(&self) -> Result<HostStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Stop the host. Pending requests are rejected with `HostClosed`.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[{}] host task failed: {}", self.host_id, e);
            }
        }
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| MeshError::HostClosed)?;
        rx.await.map_err(|_| MeshError::HostClosed)
    }
}

impl Drop for MeshHost {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    mut logic: NetworkLogic,
    mut link_events: mpsc::UnboundedReceiver<PeerEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut replies: mpsc::UnboundedReceiver<HandlerReply>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(raw) = link_events.recv() => logic.handle_link_event(raw).await,
            Some(reply) = replies.recv() => logic.handle_reply(reply).await,
            Some(message_id) = logic.next_expired() => logic.expire(&message_id),
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut logic, command).await,
                None => break,
            },
        }
    }

    log::info!("[{}] mesh host stopped", logic.router().my_id());
    logic.close();
}

async fn handle_command(logic: &mut NetworkLogic, command: Command) {
    // a dropped reply receiver means the caller gave up; nothing to do
    match command {
        Command::Request { to, uri, payload, ttl, reply } => {
            let res = logic.request(&to, &uri, payload, ttl).await;
            if let Err(e) = &res {
                log::warn!("[{}] request to {} on \"{}\" failed: {}", logic.router().my_id(), to, uri, e);
            }
            let _ = reply.send(res);
        }
        Command::StartListen { uri, handler, reply } => {
            let _ = reply.send(logic.start_listen_uri(&uri, handler));
        }
        Command::StopListen { uri, reply } => {
            let _ = reply.send(logic.stop_listen_uri(&uri));
        }
        Command::OnIncome { listener, reply } => {
            let _ = reply.send(logic.router_mut().on_income_message(listener));
        }
        Command::RemoveListener { id, reply } => {
            let _ = reply.send(logic.router_mut().remove_listener(id));
        }
        Command::Status { reply } => {
            let _ = reply.send(HostStatus::collect(logic));
        }
    }
}
