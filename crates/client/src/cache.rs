//! Conversation cache actor: owns a [`CacheState`] and applies commands in
//! arrival order.
//!
//! Callers talk to it through [`ConversationCache`], which enqueues
//! `CacheCommand`s over an unbounded mpsc channel so the realtime reader can
//! hand events over without awaiting. Lock-free reads go through `ArcSwap`.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tether_protocol::{new_id, Conversation, Direction, Message, NewMessage};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::grouping::{group_by_date, group_by_local_date, DateGroup};
use crate::merge::{CacheState, LiveOutcome, LOCAL_ID_PREFIX};

/// Immutable view published after every change.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub viewer_id: String,
    /// Display order
    pub conversations: Vec<Conversation>,
    /// Per-peer histories, shared with the actor until a peer's history changes
    pub histories: HashMap<String, Arc<Vec<Message>>>,
    pub active_peer: Option<String>,
    pub revision: u64,
}

impl CacheSnapshot {
    pub fn conversation(&self, peer: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.counterparty_id == peer)
    }

    pub fn messages(&self, peer: &str) -> &[Message] {
        self.histories.get(peer).map(|h| h.as_slice()).unwrap_or(&[])
    }

    pub fn date_groups<Tz: TimeZone>(&self, peer: &str, today: NaiveDate, tz: &Tz) -> Vec<DateGroup> {
        group_by_date(self.messages(peer), today, tz)
    }

    pub fn local_date_groups(&self, peer: &str) -> Vec<DateGroup> {
        group_by_local_date(self.messages(peer))
    }

    pub fn unread_total(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }
}

/// Change notifications for views.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheChange {
    /// A pushed message was applied; `message` is the event as recorded
    Live {
        peer: String,
        outcome: LiveOutcome,
        message: Message,
    },
    ConversationsReplaced,
    HistoryReplaced { peer: String },
    LocalMessage { peer: String },
    ActiveChanged { peer: Option<String> },
    Read { peer: String },
}

enum CacheCommand {
    Live(NewMessage),
    ReplaceConversations {
        conversations: Vec<Conversation>,
        as_of: DateTime<Utc>,
    },
    ReplaceHistory {
        peer: String,
        messages: Vec<Message>,
    },
    AppendLocal {
        peer: String,
        message: Message,
    },
    SetActive(Option<String>),
    MarkRead(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to a running cache actor (cheap to Clone).
#[derive(Clone)]
pub struct ConversationCache {
    command_tx: mpsc::UnboundedSender<CacheCommand>,
    snapshot: Arc<ArcSwap<CacheSnapshot>>,
    changes: broadcast::Sender<CacheChange>,
}

impl ConversationCache {
    /// Spawn the actor for `viewer_id`. It stops once every handle is dropped.
    pub fn spawn(viewer_id: impl Into<String>) -> Self {
        let state = CacheState::new(viewer_id);
        let snapshot = Arc::new(ArcSwap::from_pointee(build_snapshot(&state, 0)));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(256);

        tokio::spawn(actor_loop(state, command_rx, snapshot.clone(), changes.clone()));

        Self {
            command_tx,
            snapshot,
            changes,
        }
    }

    /// Lock-free snapshot read. Reflects every command the actor has drained.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    pub fn apply_live(&self, event: NewMessage) {
        self.send(CacheCommand::Live(event));
    }

    pub fn replace_conversations(&self, conversations: Vec<Conversation>, as_of: DateTime<Utc>) {
        self.send(CacheCommand::ReplaceConversations {
            conversations,
            as_of,
        });
    }

    pub fn replace_history(&self, peer: &str, messages: Vec<Message>) {
        self.send(CacheCommand::ReplaceHistory {
            peer: peer.to_string(),
            messages,
        });
    }

    /// Enqueue an optimistic outbound message and return it.
    pub fn append_local(&self, peer: &str, text: &str) -> Message {
        let message = Message {
            id: format!("{LOCAL_ID_PREFIX}{}", new_id()),
            conversation_id: peer.to_string(),
            direction: Direction::Outbound,
            text: text.to_string(),
            created_at: Utc::now(),
            read: true,
        };
        self.send(CacheCommand::AppendLocal {
            peer: peer.to_string(),
            message: message.clone(),
        });
        message
    }

    pub fn set_active(&self, peer: Option<&str>) {
        self.send(CacheCommand::SetActive(peer.map(str::to_string)));
    }

    pub fn mark_read(&self, peer: &str) {
        self.send(CacheCommand::MarkRead(peer.to_string()));
    }

    /// Wait until every previously enqueued command has been applied.
    pub async fn flush(&self) -> Arc<CacheSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(CacheCommand::Flush(tx));
        let _ = rx.await;
        self.snapshot()
    }

    fn send(&self, command: CacheCommand) {
        if self.command_tx.send(command).is_err() {
            warn!(
                component = "cache",
                event = "cache.command_dropped",
                "Cache actor stopped, command dropped"
            );
        }
    }
}

async fn actor_loop(
    mut state: CacheState,
    mut command_rx: mpsc::UnboundedReceiver<CacheCommand>,
    snapshot: Arc<ArcSwap<CacheSnapshot>>,
    changes: broadcast::Sender<CacheChange>,
) {
    let mut revision = 0u64;
    while let Some(command) = command_rx.recv().await {
        let change = match command {
            CacheCommand::Flush(reply) => {
                let _ = reply.send(());
                continue;
            }
            CacheCommand::Live(event) => {
                let peer = if event.from_user_id == state.viewer_id() {
                    event.to_user_id.clone()
                } else {
                    event.from_user_id.clone()
                };
                let (outcome, message) = state.merge_live(&event);
                if outcome == LiveOutcome::Duplicate {
                    continue;
                }
                CacheChange::Live {
                    peer,
                    outcome,
                    message,
                }
            }
            CacheCommand::ReplaceConversations {
                conversations,
                as_of,
            } => {
                state.replace_conversations(conversations, as_of);
                CacheChange::ConversationsReplaced
            }
            CacheCommand::ReplaceHistory { peer, messages } => {
                state.replace_history(&peer, messages);
                CacheChange::HistoryReplaced { peer }
            }
            CacheCommand::AppendLocal { peer, message } => {
                state.append_local(&peer, message);
                CacheChange::LocalMessage { peer }
            }
            CacheCommand::SetActive(peer) => {
                state.set_active(peer.as_deref());
                CacheChange::ActiveChanged { peer }
            }
            CacheCommand::MarkRead(peer) => {
                state.mark_read(&peer);
                CacheChange::Read { peer }
            }
        };

        revision += 1;
        snapshot.store(Arc::new(build_snapshot(&state, revision)));
        debug!(
            component = "cache",
            event = "cache.changed",
            revision,
            change = ?change,
            "Cache updated"
        );
        let _ = changes.send(change);
    }
}

fn build_snapshot(state: &CacheState, revision: u64) -> CacheSnapshot {
    CacheSnapshot {
        viewer_id: state.viewer_id().to_string(),
        conversations: state.conversations(),
        histories: state.histories().clone(),
        active_peer: state.active_peer().map(str::to_string),
        revision,
    }
}
