//! Realtime channel: one live connection per session plus an internal event bus.
//!
//! Inbound frames are decoded and validated here; handlers only ever see a
//! well-formed [`ServerEvent`]. Handlers run on the reader task in frame
//! order, so they must not block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tether_protocol::{ClientEvent, ServerEvent, ServerEventKind};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::token::decode_claims;

/// Text-frame pipes of an established connection.
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Opens authenticated connections to the realtime endpoint.
pub trait ChannelConnector: Send + Sync {
    fn connect(&self, credential: &str) -> BoxFuture<'_, Result<Connection>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
}

pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct ActiveLink {
    generation: u64,
    credential: String,
    outbound: mpsc::Sender<String>,
    reader: JoinHandle<()>,
}

struct ChannelInner {
    connector: Arc<dyn ChannelConnector>,
    handlers: DashMap<u64, (ServerEventKind, EventHandler)>,
    next_handler: AtomicU64,
    next_generation: AtomicU64,
    link: Mutex<Option<ActiveLink>>,
    status: watch::Sender<ChannelStatus>,
}

#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeChannel {
    pub fn new(connector: Arc<dyn ChannelConnector>) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                connector,
                handlers: DashMap::new(),
                next_handler: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                link: Mutex::new(None),
                status,
            }),
        }
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.status.borrow() == ChannelStatus::Connected
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Connect with `credential`, replacing any connection made with a
    /// different one. Subscriptions survive the swap.
    pub async fn connect(&self, credential: &str) -> Result<()> {
        let mut link = self.inner.link.lock().await;

        if let Some(active) = link.as_ref() {
            if active.credential == credential && !active.reader.is_finished() {
                debug!(
                    component = "channel",
                    event = "channel.connect.noop",
                    "Already connected with this credential"
                );
                return Ok(());
            }
        }
        if let Some(old) = link.take() {
            info!(
                component = "channel",
                event = "channel.reconnect",
                generation = old.generation,
                "Credential changed, replacing connection"
            );
            old.reader.abort();
        }

        self.inner.status.send_replace(ChannelStatus::Connecting);
        let conn = match self.inner.connector.connect(credential).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    component = "channel",
                    event = "channel.connect_failed",
                    error = %e,
                    "Realtime connection failed"
                );
                self.inner.status.send_replace(ChannelStatus::Disconnected);
                return Err(e);
            }
        };

        let join = ClientEvent::Join {
            user_id: decode_claims(credential).ok().and_then(|c| c.subject),
        };
        let frame = serde_json::to_string(&join)?;
        if conn.outbound.send(frame).await.is_err() {
            warn!(
                component = "channel",
                event = "channel.join_failed",
                "Connection closed before join was sent"
            );
            self.inner.status.send_replace(ChannelStatus::Disconnected);
            return Err(ClientError::ChannelDisconnected);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            generation,
            conn.inbound,
        ));
        *link = Some(ActiveLink {
            generation,
            credential: credential.to_string(),
            outbound: conn.outbound,
            reader,
        });
        self.inner.status.send_replace(ChannelStatus::Connected);
        info!(
            component = "channel",
            event = "channel.connected",
            generation,
            "Realtime channel connected"
        );
        Ok(())
    }

    /// Close the connection and detach every handler.
    pub async fn disconnect(&self) {
        let old = self.inner.link.lock().await.take();
        let detached = self.inner.handlers.len();
        self.inner.handlers.clear();
        if let Some(old) = old {
            old.reader.abort();
            info!(
                component = "channel",
                event = "channel.disconnected",
                generation = old.generation,
                handlers = detached,
                "Realtime channel closed"
            );
        }
        self.inner.status.send_replace(ChannelStatus::Disconnected);
    }

    pub async fn publish(&self, event: &ClientEvent) -> Result<()> {
        let outbound = {
            let link = self.inner.link.lock().await;
            match link.as_ref() {
                Some(active) if !active.reader.is_finished() => active.outbound.clone(),
                _ => return Err(ClientError::ChannelDisconnected),
            }
        };
        let frame = serde_json::to_string(event)?;
        outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::ChannelDisconnected)?;
        debug!(
            component = "channel",
            event = "channel.published",
            name = event.name(),
            "Published event"
        );
        Ok(())
    }

    /// Attach `handler` for events of `kind` until the returned guard drops.
    pub fn subscribe<F>(&self, kind: ServerEventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.insert(id, (kind, Arc::new(handler)));
        Subscription {
            id,
            channel: Arc::downgrade(&self.inner),
        }
    }
}

/// Scoped handler registration. Dropping it detaches the handler only.
pub struct Subscription {
    id: u64,
    channel: Weak<ChannelInner>,
}

impl Subscription {
    /// False once the handler was detached by `disconnect`.
    pub fn is_attached(&self) -> bool {
        self.channel
            .upgrade()
            .is_some_and(|inner| inner.handlers.contains_key(&self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.channel.upgrade() {
            inner.handlers.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

async fn read_loop(inner: Weak<ChannelInner>, generation: u64, mut inbound: mpsc::Receiver<String>) {
    while let Some(frame) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match ServerEvent::decode(&frame) {
            Ok(event) => dispatch(&inner, &event),
            Err(e) => {
                let err = ClientError::MalformedEvent(e.to_string());
                warn!(
                    component = "channel",
                    event = "channel.frame.malformed",
                    generation,
                    error = %err,
                    frame_bytes = frame.len(),
                    "Dropped malformed realtime frame"
                );
            }
        }
    }

    // Remote side closed. Only clear the link if it is still ours.
    if let Some(inner) = inner.upgrade() {
        let mut link = inner.link.lock().await;
        if link.as_ref().is_some_and(|l| l.generation == generation) {
            link.take();
            inner.status.send_replace(ChannelStatus::Disconnected);
            info!(
                component = "channel",
                event = "channel.closed_by_peer",
                generation,
                "Realtime connection closed"
            );
        }
    }
}

fn dispatch(inner: &ChannelInner, event: &ServerEvent) {
    let kind = event.kind();
    // Snapshot first: a handler may drop a Subscription while we iterate.
    let mut targets: Vec<(u64, EventHandler)> = inner
        .handlers
        .iter()
        .filter(|entry| entry.value().0 == kind)
        .map(|entry| (*entry.key(), entry.value().1.clone()))
        .collect();
    targets.sort_by_key(|(id, _)| *id);
    for (_, handler) in targets {
        handler(event);
    }
}
