//! Sync engine: follows the session to drive the realtime channel and routes
//! live events into the conversation cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tether_protocol::{ClientEvent, Message, ServerEvent, ServerEventKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::cache::{CacheSnapshot, ConversationCache};
use crate::error::Result;
use crate::realtime::{ChannelStatus, RealtimeChannel, Subscription};

/// How the engine re-establishes a realtime connection the server dropped.
///
/// After `max_attempts` consecutive failures the engine stays refetch-only
/// until the credential changes. A connection that stayed up for
/// `stable_after` resets the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            stable_after: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based), doubling up to `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

pub struct SyncEngine {
    api: ChatApi,
    channel: RealtimeChannel,
    cache: ConversationCache,
    lifecycle: JoinHandle<()>,
}

impl SyncEngine {
    /// Start for the signed-in user. Fails with `SessionTerminated` when
    /// nobody is signed in.
    pub fn start(api: ChatApi, channel: RealtimeChannel) -> Result<Self> {
        Self::start_with(api, channel, ReconnectPolicy::default())
    }

    pub fn start_with(api: ChatApi, channel: RealtimeChannel, policy: ReconnectPolicy) -> Result<Self> {
        let viewer = api.viewer_id()?;
        let cache = ConversationCache::spawn(viewer.clone());
        let lifecycle = tokio::spawn(follow_session(
            api.store().subscribe(),
            channel.clone(),
            cache.clone(),
            policy,
        ));
        info!(
            component = "sync",
            event = "sync.started",
            viewer_id = %viewer,
            "Sync engine started"
        );
        Ok(Self {
            api,
            channel,
            cache,
            lifecycle,
        })
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.cache.snapshot()
    }

    /// Refetch the conversation list, stamped with the time it was issued.
    pub async fn refresh_conversations(&self) -> Result<Arc<CacheSnapshot>> {
        let as_of = Utc::now();
        let conversations = self.api.list_conversations().await?;
        debug!(
            component = "sync",
            event = "sync.conversations_fetched",
            count = conversations.len(),
            "Fetched conversation list"
        );
        self.cache.replace_conversations(conversations, as_of);
        Ok(self.cache.flush().await)
    }

    /// Make `peer` the open conversation and load its history.
    ///
    /// Live messages for `peer` are appended from this point on. A failed
    /// read receipt is logged, not returned.
    pub async fn open_conversation(&self, peer: &str) -> Result<Arc<CacheSnapshot>> {
        self.cache.set_active(Some(peer));
        let history = self.api.fetch_history(peer).await?;
        self.cache.replace_history(peer, history);

        match self.api.mark_read(peer).await {
            Ok(()) => self.cache.mark_read(peer),
            Err(e) => warn!(
                component = "sync",
                event = "sync.mark_read_failed",
                peer = %peer,
                error = %e,
                "Failed to mark conversation read"
            ),
        }
        Ok(self.cache.flush().await)
    }

    pub fn close_conversation(&self) {
        self.cache.set_active(None);
    }

    /// Publish a message and append it optimistically.
    ///
    /// Nothing is appended when the channel is down; the caller gets
    /// `ChannelDisconnected` and may retry once it reconnects.
    pub async fn send_message(&self, peer: &str, text: &str) -> Result<Message> {
        self.channel
            .publish(&ClientEvent::SendMessage {
                to_user_id: peer.to_string(),
                message: text.to_string(),
            })
            .await?;
        Ok(self.cache.append_local(peer, text))
    }

    /// Disconnect and stop following the session.
    pub async fn shutdown(self) {
        self.lifecycle.abort();
        self.channel.disconnect().await;
        info!(component = "sync", event = "sync.stopped", "Sync engine stopped");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.lifecycle.abort();
    }
}

async fn follow_session(
    mut token_rx: watch::Receiver<Option<String>>,
    channel: RealtimeChannel,
    cache: ConversationCache,
    policy: ReconnectPolicy,
) {
    let mut status_rx = channel.status();
    let mut subscription: Option<Subscription> = None;
    let mut current: Option<String> = None;
    let mut failures = 0u32;
    let mut connected_at: Option<Instant> = None;

    loop {
        let token = token_rx.borrow_and_update().clone();
        if token != current {
            failures = 0;
            current = token.clone();
        }
        match token {
            Some(token) => {
                if !subscription.as_ref().is_some_and(Subscription::is_attached) {
                    subscription = Some(route_live_events(&channel, &cache));
                }
                match channel.connect(&token).await {
                    Ok(()) => connected_at = Some(Instant::now()),
                    Err(e) => {
                        failures += 1;
                        connected_at = None;
                        warn!(
                            component = "sync",
                            event = "sync.channel_unavailable",
                            error = %e,
                            failures,
                            "Realtime unavailable, continuing with refetch only"
                        );
                    }
                }
            }
            None => {
                subscription = None;
                connected_at = None;
                channel.disconnect().await;
                debug!(
                    component = "sync",
                    event = "sync.signed_out",
                    "Session ended, channel closed"
                );
            }
        }

        let may_reconnect = current.is_some() && failures < policy.max_attempts;
        tokio::select! {
            changed = token_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = connection_lost(&mut status_rx), if may_reconnect => {
                // A connect error was already counted; a drop counts unless the
                // connection had been stable.
                if let Some(at) = connected_at.take() {
                    if at.elapsed() >= policy.stable_after {
                        failures = 0;
                    } else {
                        failures += 1;
                    }
                }
                if failures >= policy.max_attempts {
                    warn!(
                        component = "sync",
                        event = "sync.reconnect_exhausted",
                        failures,
                        "Giving up on realtime until the session changes"
                    );
                    if token_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                let delay = policy.delay(failures);
                info!(
                    component = "sync",
                    event = "sync.reconnect_scheduled",
                    attempt = failures + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Realtime connection lost, reconnecting"
                );
                tokio::select! {
                    changed = token_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    drop(subscription);
}

/// Resolves once the channel reports `Disconnected`.
async fn connection_lost(status_rx: &mut watch::Receiver<ChannelStatus>) {
    let _ = status_rx
        .wait_for(|status| *status == ChannelStatus::Disconnected)
        .await;
}

fn route_live_events(channel: &RealtimeChannel, cache: &ConversationCache) -> Subscription {
    let cache = cache.clone();
    channel.subscribe(ServerEventKind::NewMessage, move |event| match event {
        ServerEvent::NewMessage(message) => cache.apply_live(message.clone()),
    })
}
