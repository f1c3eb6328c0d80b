//! Conversation merge engine.
//!
//! Pure state: no I/O, no errors. Input that cannot be applied is dropped and
//! logged. Conversations and histories are keyed by counterparty id, which is
//! the only identity a live event carries.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tether_protocol::{Conversation, Direction, Message, NewMessage};
use tracing::debug;

/// Prefix of ids minted for optimistic local messages.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// What applying a live event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Appended to the open conversation; unread untouched
    Appended,
    /// Inbound for a conversation that is not open; unread incremented
    Unread,
    /// Outbound for a conversation that is not open
    Recorded,
    /// Confirmed a pending local message
    Confirmed,
    /// Already seen
    Duplicate,
}

#[derive(Debug, Clone)]
struct Entry {
    conversation: Conversation,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct CacheState {
    viewer_id: String,
    entries: Vec<Entry>,
    histories: HashMap<String, Arc<Vec<Message>>>,
    /// Ids applied outside the open conversation, per peer
    seen: HashMap<String, HashSet<String>>,
    active_peer: Option<String>,
    next_seq: u64,
}

impl CacheState {
    pub fn new(viewer_id: impl Into<String>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            entries: Vec::new(),
            histories: HashMap::new(),
            seen: HashMap::new(),
            active_peer: None,
            next_seq: 0,
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.active_peer.as_deref()
    }

    /// Conversations in display order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.entries.iter().map(|e| e.conversation.clone()).collect()
    }

    pub fn conversation(&self, peer: &str) -> Option<&Conversation> {
        self.position(peer).map(|i| &self.entries[i].conversation)
    }

    pub fn messages(&self, peer: &str) -> &[Message] {
        self.histories.get(peer).map(|h| h.as_slice()).unwrap_or(&[])
    }

    /// Histories keyed by peer. Unchanged histories are shared between calls.
    pub fn histories(&self) -> &HashMap<String, Arc<Vec<Message>>> {
        &self.histories
    }

    /// Merge one pushed message.
    pub fn apply_live(&mut self, event: &NewMessage) -> LiveOutcome {
        self.merge_live(event).0
    }

    /// Merge one pushed message and return it as it was recorded.
    ///
    /// For the open conversation a message is a duplicate only when its
    /// history already holds the id. A list refetch may have reported the
    /// message as `last_message` first; it is still appended. Elsewhere an id
    /// already applied, or already reported as the last message, is skipped.
    pub fn merge_live(&mut self, event: &NewMessage) -> (LiveOutcome, Message) {
        let (peer, direction) = if event.from_user_id == self.viewer_id {
            (event.to_user_id.clone(), Direction::Outbound)
        } else {
            (event.from_user_id.clone(), Direction::Inbound)
        };
        let is_open = self.active_peer.as_deref() == Some(peer.as_str());
        let conversation_id = self
            .conversation(&peer)
            .map_or_else(|| peer.clone(), |c| c.id.clone());
        let message = Message {
            id: event.id.clone(),
            conversation_id,
            direction,
            text: event.message.clone(),
            created_at: event.created_at,
            read: event.has_read || direction == Direction::Outbound || is_open,
        };

        let duplicate = if is_open {
            self.messages(&peer).iter().any(|m| m.id == event.id)
        } else {
            self.is_seen(&peer, &event.id) || self.is_last_message(&peer, &event.id)
        };
        if duplicate {
            debug!(
                component = "merge",
                event = "merge.live.duplicate",
                message_id = %event.id,
                "Ignoring already applied message"
            );
            return (LiveOutcome::Duplicate, message);
        }
        self.mark_seen(&peer, &event.id);

        let idx = self.upsert(&peer);
        let mut message = message;
        message.conversation_id = self.entries[idx].conversation.id.clone();

        let outcome = if direction == Direction::Outbound && self.confirm_local(&peer, &message) {
            LiveOutcome::Confirmed
        } else if is_open {
            Arc::make_mut(self.histories.entry(peer.clone()).or_default()).push(message.clone());
            LiveOutcome::Appended
        } else if direction == Direction::Inbound {
            self.entries[idx].conversation.unread_count += 1;
            LiveOutcome::Unread
        } else {
            LiveOutcome::Recorded
        };

        let conversation = &mut self.entries[idx].conversation;
        if conversation
            .last_activity()
            .map_or(true, |last| message.created_at >= last)
        {
            conversation.last_message = Some(message.clone());
        }

        self.sort();
        (outcome, message)
    }

    /// Replace the list from a refetch issued at `as_of`.
    ///
    /// A fetched conversation overrides the cached one only when its last
    /// message is at least as new. Cached conversations absent from the fetch
    /// survive only when they saw activity after `as_of`.
    pub fn replace_conversations(&mut self, fetched: Vec<Conversation>, as_of: DateTime<Utc>) {
        let mut cached: HashMap<String, Entry> = self
            .entries
            .drain(..)
            .map(|e| (e.conversation.counterparty_id.clone(), e))
            .collect();

        let mut next = Vec::with_capacity(fetched.len());
        for mut incoming in fetched {
            let peer = incoming.counterparty_id.clone();

            let entry = match cached.remove(&peer) {
                Some(mut existing) => {
                    if !fresher_or_equal(incoming.last_activity(), existing.conversation.last_activity()) {
                        debug!(
                            component = "merge",
                            event = "merge.refetch.stale",
                            peer = %peer,
                            "Keeping newer cached summary"
                        );
                        incoming.last_message = existing.conversation.last_message.take();
                        incoming.unread_count = existing.conversation.unread_count;
                    }
                    if incoming.counterparty.is_none() {
                        incoming.counterparty = existing.conversation.counterparty.take();
                    }
                    Entry {
                        conversation: incoming,
                        seq: existing.seq,
                    }
                }
                None => Entry {
                    conversation: incoming,
                    seq: self.bump_seq(),
                },
            };
            next.push(entry);
        }

        for (peer, entry) in cached {
            let survives = entry
                .conversation
                .last_activity()
                .is_some_and(|last| last > as_of);
            if survives {
                next.push(entry);
            } else {
                debug!(
                    component = "merge",
                    event = "merge.refetch.dropped",
                    peer = %peer,
                    "Conversation missing from refetch"
                );
            }
        }

        self.entries = next;
        for idx in 0..self.entries.len() {
            let peer = self.entries[idx].conversation.counterparty_id.clone();
            if self.active_peer.as_deref() == Some(peer.as_str()) {
                self.entries[idx].conversation.unread_count = 0;
            }
            self.stamp(idx);
        }
        self.sort();
    }

    /// Replace the history with `peer`. Cached messages newer than the newest
    /// fetched one are kept.
    pub fn replace_history(&mut self, peer: &str, mut fetched: Vec<Message>) {
        fetched.sort_by_key(|m| m.created_at);
        let fetched_ids: HashSet<String> = fetched.iter().map(|m| m.id.clone()).collect();
        let newest = fetched.last().map(|m| m.created_at);

        let kept: Vec<Message> = self
            .histories
            .remove(peer)
            .unwrap_or_default()
            .iter()
            .filter(|m| !fetched_ids.contains(&m.id))
            .filter(|m| newest.map_or(true, |n| m.created_at > n))
            .cloned()
            .collect();

        self.seen
            .entry(peer.to_string())
            .or_default()
            .extend(fetched_ids);

        let mut history = fetched;
        history.extend(kept);
        let latest = history.last().cloned();
        self.histories.insert(peer.to_string(), Arc::new(history));

        if let (Some(idx), Some(latest)) = (self.position(peer), latest) {
            let conversation = &mut self.entries[idx].conversation;
            if conversation
                .last_activity()
                .map_or(true, |last| latest.created_at > last)
            {
                conversation.last_message = Some(latest);
            }
            self.stamp(idx);
            self.sort();
        }
    }

    /// Record an optimistic outbound message. Creates the conversation if needed.
    pub fn append_local(&mut self, peer: &str, message: Message) {
        self.mark_seen(peer, &message.id);
        let idx = self.upsert(peer);
        let mut message = message;
        message.conversation_id = self.entries[idx].conversation.id.clone();

        Arc::make_mut(self.histories.entry(peer.to_string()).or_default()).push(message.clone());
        self.entries[idx].conversation.last_message = Some(message);
        self.sort();
    }

    /// Open `peer` (or close with `None`). Opening clears its unread count.
    pub fn set_active(&mut self, peer: Option<&str>) {
        self.active_peer = peer.map(str::to_string);
        if let Some(peer) = peer {
            self.clear_unread(peer);
        }
    }

    pub fn mark_read(&mut self, peer: &str) {
        self.clear_unread(peer);
        if let Some(history) = self.histories.get_mut(peer) {
            if history.iter().any(|m| m.direction == Direction::Inbound && !m.read) {
                for message in Arc::make_mut(history)
                    .iter_mut()
                    .filter(|m| m.direction == Direction::Inbound)
                {
                    message.read = true;
                }
            }
        }
    }

    fn clear_unread(&mut self, peer: &str) {
        if let Some(idx) = self.position(peer) {
            let conversation = &mut self.entries[idx].conversation;
            conversation.unread_count = 0;
            if let Some(last) = conversation.last_message.as_mut() {
                last.read = true;
            }
        }
    }

    /// Swap a pending local message for its server-confirmed copy.
    fn confirm_local(&mut self, peer: &str, confirmed: &Message) -> bool {
        let Some(history) = self.histories.get_mut(peer) else {
            return false;
        };
        let Some(pos) = history.iter().position(|m| {
            m.id.starts_with(LOCAL_ID_PREFIX)
                && m.direction == Direction::Outbound
                && m.text == confirmed.text
        }) else {
            return false;
        };
        let local_id = std::mem::replace(&mut Arc::make_mut(history)[pos], confirmed.clone()).id;

        if let Some(idx) = self.position(peer) {
            let conversation = &mut self.entries[idx].conversation;
            if conversation.last_message.as_ref().is_some_and(|m| m.id == local_id) {
                conversation.last_message = Some(confirmed.clone());
            }
        }
        true
    }

    fn upsert(&mut self, peer: &str) -> usize {
        if let Some(idx) = self.position(peer) {
            return idx;
        }
        let seq = self.bump_seq();
        debug!(
            component = "merge",
            event = "merge.conversation.created",
            peer = %peer,
            "New conversation"
        );
        self.entries.push(Entry {
            conversation: Conversation {
                id: peer.to_string(),
                counterparty_id: peer.to_string(),
                counterparty: None,
                last_message: None,
                unread_count: 0,
            },
            seq,
        });
        self.entries.len() - 1
    }

    /// Make every message of entry `idx` carry the conversation's id.
    fn stamp(&mut self, idx: usize) {
        let conversation = &mut self.entries[idx].conversation;
        let id = conversation.id.clone();
        if let Some(last) = conversation.last_message.as_mut() {
            last.conversation_id = id.clone();
        }
        if let Some(history) = self.histories.get_mut(&conversation.counterparty_id) {
            if history.iter().any(|m| m.conversation_id != id) {
                for message in Arc::make_mut(history).iter_mut() {
                    message.conversation_id = id.clone();
                }
            }
        }
    }

    fn position(&self, peer: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.conversation.counterparty_id == peer)
    }

    fn is_seen(&self, peer: &str, id: &str) -> bool {
        self.seen.get(peer).is_some_and(|ids| ids.contains(id))
    }

    fn is_last_message(&self, peer: &str, id: &str) -> bool {
        self.conversation(peer)
            .and_then(|c| c.last_message.as_ref())
            .is_some_and(|m| m.id == id)
    }

    fn mark_seen(&mut self, peer: &str, id: &str) {
        self.seen
            .entry(peer.to_string())
            .or_default()
            .insert(id.to_string());
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn sort(&mut self) {
        self.entries.sort_by(display_order);
    }
}

fn fresher_or_equal(incoming: Option<DateTime<Utc>>, cached: Option<DateTime<Utc>>) -> bool {
    match (incoming, cached) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => a >= b,
    }
}

/// Newest activity first, empty conversations last, ties by insertion.
fn display_order(a: &Entry, b: &Entry) -> Ordering {
    match (a.conversation.last_activity(), b.conversation.last_activity()) {
        (Some(x), Some(y)) => y.cmp(&x).then(a.seq.cmp(&b.seq)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.seq.cmp(&b.seq),
    }
}
