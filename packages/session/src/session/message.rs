//! Per-room outgoing message state machine.
//!
//! [`MessageSession::send`] returns a `Pending` record immediately. The
//! record is handed to the connection (or queued while the link is coming
//! up) and later resolved to `Sent` by a `message_ack`, or to `Failed` by a
//! `message_rejected`, the ack timeout, or cancellation. Failed sends are
//! never retried automatically; [`MessageSession::resend`] is the explicit
//! user-triggered retry.

use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use indexmap::IndexSet;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    domain::{
        ConnectionState, DeliveryFailure, DeliveryState, LocalId, Message, MessageText, RoomId,
        Timestamp, UserId,
    },
    infrastructure::dto::{
        ClientEvent, EventKind, MessageAckPayload, MessageReadPayload, MessageRejectedPayload,
        NewMessagePayload, SendMessagePayload, ServerEvent,
    },
};

use super::{
    config::SessionConfig,
    connection::{StateListenerHandle, TransportConnection},
    dispatcher::{EventDispatcher, SubscriptionHandle},
    error::{ConnectionError, SendError},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notifications for a room's timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    /// An outgoing message was created in `Pending`
    Queued(Message),
    /// An outgoing message was acknowledged
    Sent(Message),
    /// An outgoing message failed (timeout, rejection, cancellation)
    Failed(Message),
    /// A message from someone else (or another device) arrived
    Received(Message),
    /// A sent message was read
    Read(Message),
}

/// Bounded insertion-ordered set
struct Recent<T> {
    members: IndexSet<T>,
    capacity: usize,
}

impl<T: Eq + Hash> Recent<T> {
    fn new(capacity: usize) -> Self {
        Self {
            members: IndexSet::new(),
            capacity,
        }
    }

    fn insert(&mut self, value: T) {
        if self.capacity == 0 || !self.members.insert(value) {
            return;
        }
        while self.members.len() > self.capacity {
            self.members.shift_remove_index(0);
        }
    }

    fn contains(&self, value: &T) -> bool {
        self.members.contains(value)
    }
}

struct Timeline {
    messages: VecDeque<Message>,
    /// Handed to the transport, waiting for an ack; value is the ack timer
    in_flight: HashMap<LocalId, JoinHandle<()>>,
    /// Waiting for the link, in send order
    queue: VecDeque<LocalId>,
    resolved: Recent<LocalId>,
    seen_remote: Recent<String>,
    last_sent_at: i64,
    closed: bool,
}

impl Timeline {
    fn find(&self, local_id: &LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| m.local_id == *local_id)
    }

    fn find_mut(&mut self, local_id: &LocalId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.local_id == *local_id)
    }

    /// Strictly increasing send time for own messages
    fn next_sent_at(&mut self) -> Timestamp {
        let now = Timestamp::now().value().max(self.last_sent_at + 1);
        self.last_sent_at = now;
        Timestamp::new(now)
    }

    /// Append, evicting the oldest resolved messages beyond `capacity`.
    /// Pending messages are never evicted.
    fn push(&mut self, message: Message, capacity: usize) {
        self.messages.push_back(message);
        while self.messages.len() > capacity {
            let Some(index) = self
                .messages
                .iter()
                .position(|m| m.delivery_state != DeliveryState::Pending)
            else {
                break;
            };
            self.messages.remove(index);
        }
    }
}

/// Outgoing message state for one room
pub struct MessageSession {
    room_id: RoomId,
    sender_id: UserId,
    connection: TransportConnection,
    dispatcher: Arc<EventDispatcher>,
    config: SessionConfig,
    timeline: Mutex<Timeline>,
    events: broadcast::Sender<MessageEvent>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    state_listener: Mutex<Option<StateListenerHandle>>,
    me: Weak<MessageSession>,
}

impl MessageSession {
    /// Create the session for `room_id` and subscribe it to ack, rejection,
    /// inbound message and read receipt events
    pub fn new(
        room_id: RoomId,
        sender_id: UserId,
        connection: TransportConnection,
        dispatcher: Arc<EventDispatcher>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session = Arc::new_cyclic(|me| Self {
            room_id,
            sender_id,
            connection,
            dispatcher,
            timeline: Mutex::new(Timeline {
                messages: VecDeque::new(),
                in_flight: HashMap::new(),
                queue: VecDeque::new(),
                resolved: Recent::new(config.dedup_capacity),
                seen_remote: Recent::new(config.dedup_capacity),
                last_sent_at: 0,
                closed: false,
            }),
            config,
            events,
            subscriptions: Mutex::new(Vec::new()),
            state_listener: Mutex::new(None),
            me: me.clone(),
        });
        session.attach();
        session
    }

    fn attach(&self) {
        let kinds = [
            EventKind::MessageAck,
            EventKind::MessageRejected,
            EventKind::NewMessage,
            EventKind::MessageRead,
        ];
        let handles: Vec<SubscriptionHandle> = kinds
            .into_iter()
            .map(|kind| {
                let me = self.me.clone();
                self.dispatcher.on(kind, move |event| {
                    if let Some(session) = me.upgrade() {
                        session.handle_event(event);
                    }
                })
            })
            .collect();
        *self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handles;

        let me = self.me.clone();
        let listener = self.connection.on_state_change(move |state| {
            if let Some(session) = me.upgrade() {
                session.on_connection_state(state);
            }
        });
        *self
            .state_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Send a message. Returns the `Pending` record right away.
    ///
    /// While the link is coming up the message is queued (bounded by
    /// `max_queued_sends`) and written once `Connected`, after the room
    /// joins were replayed. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `SendError::Empty` without text or attachment
    /// - `SendError::InvalidText` for text that is too long
    /// - `SendError::Connection(NotConnected)` while `Disconnected` or `Failed`
    /// - `SendError::Connection(QueueFull)` when the queue is full
    /// - `SendError::NotJoined` once the session was closed
    pub fn send(
        &self,
        text: Option<String>,
        attachment: Option<String>,
    ) -> Result<Message, SendError> {
        let text = text
            .filter(|t| !t.is_empty())
            .map(MessageText::new)
            .transpose()?;
        if text.is_none() && attachment.is_none() {
            return Err(SendError::Empty);
        }
        let mut timeline = self.lock();
        self.admit(&timeline)?;
        Ok(self.enqueue(&mut timeline, text, attachment))
    }

    /// Resend a `Failed` message as a new message with a fresh local id.
    /// The failed record is removed from the timeline.
    ///
    /// # Errors
    ///
    /// `SendError::UnknownMessage`, `SendError::NotFailed`, or any error
    /// [`MessageSession::send`] can return for the connection state
    pub fn resend(&self, local_id: LocalId) -> Result<Message, SendError> {
        let mut timeline = self.lock();
        let Some(index) = timeline
            .messages
            .iter()
            .position(|m| m.local_id == local_id)
        else {
            return Err(SendError::UnknownMessage(local_id));
        };
        if timeline.messages[index].delivery_state != DeliveryState::Failed {
            return Err(SendError::NotFailed(local_id));
        }
        self.admit(&timeline)?;
        let Some(failed) = timeline.messages.remove(index) else {
            return Err(SendError::UnknownMessage(local_id));
        };
        tracing::info!(room = %self.room_id, previous = %local_id, "resending failed message");
        Ok(self.enqueue(&mut timeline, failed.text, failed.attachment_ref))
    }

    /// Subscribe to timeline changes
    pub fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the timeline, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.iter().cloned().collect()
    }

    pub fn message(&self, local_id: &LocalId) -> Option<Message> {
        self.lock().find(local_id).cloned()
    }

    /// Messages handed to the transport and waiting for an ack
    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Messages waiting for the link
    pub fn queued_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Unsubscribe and cancel every pending message. Idempotent.
    pub fn close(&self) {
        self.detach();
        let mut timeline = self.lock();
        if timeline.closed {
            return;
        }
        timeline.closed = true;
        let cancelled = self.cancel_pending(&mut timeline);
        tracing::debug!(room = %self.room_id, cancelled, "message session closed");
    }

    fn detach(&self) {
        let handles = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            self.dispatcher.off(handle);
        }
        if let Some(listener) = self
            .state_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.connection.remove_state_listener(listener);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, timeline: &Timeline) -> Result<(), SendError> {
        if timeline.closed {
            return Err(SendError::NotJoined(self.room_id.clone()));
        }
        let state = self.connection.state();
        if state == ConnectionState::Connected {
            return Ok(());
        }
        if !state.is_transient() {
            return Err(ConnectionError::NotConnected.into());
        }
        if timeline.queue.len() >= self.config.max_queued_sends {
            tracing::warn!(room = %self.room_id, capacity = self.config.max_queued_sends, "send queue full");
            return Err(ConnectionError::QueueFull {
                capacity: self.config.max_queued_sends,
            }
            .into());
        }
        Ok(())
    }

    fn enqueue(
        &self,
        timeline: &mut Timeline,
        text: Option<MessageText>,
        attachment: Option<String>,
    ) -> Message {
        let sent_at = timeline.next_sent_at();
        let message = Message::outgoing(
            self.room_id.clone(),
            self.sender_id.clone(),
            text,
            attachment,
            sent_at,
        );
        let local_id = message.local_id;
        timeline.push(message.clone(), self.config.timeline_capacity);
        let _ = self.events.send(MessageEvent::Queued(message.clone()));

        let connected = self.connection.state() == ConnectionState::Connected;
        if !timeline.queue.is_empty() || !connected || !self.dispatch(timeline, local_id) {
            timeline.queue.push_back(local_id);
            tracing::debug!(room = %self.room_id, %local_id, queued = timeline.queue.len(), "message queued");
        }
        message
    }

    /// Hand a pending message to the connection and start its ack timer
    fn dispatch(&self, timeline: &mut Timeline, local_id: LocalId) -> bool {
        let Some(message) = timeline.find(&local_id) else {
            return true;
        };
        let event = ClientEvent::SendMessage(SendMessagePayload {
            room_id: message.room_id.clone(),
            local_id,
            text: message.text.as_ref().map(|t| t.as_str().to_string()),
            attachment: message.attachment_ref.clone(),
            timestamp: message.sent_at,
        });
        if !self.connection.send(event) {
            return false;
        }

        let me = self.me.clone();
        let ack_timeout = self.config.ack_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ack_timeout).await;
            if let Some(session) = me.upgrade() {
                session.expire(local_id);
            }
        });
        timeline.in_flight.insert(local_id, timer);
        tracing::debug!(room = %self.room_id, %local_id, "message handed to transport");
        true
    }

    fn flush(&self, timeline: &mut Timeline) {
        let mut flushed = 0;
        while let Some(local_id) = timeline.queue.front().copied() {
            if !self.dispatch(timeline, local_id) {
                break;
            }
            timeline.queue.pop_front();
            flushed += 1;
        }
        if flushed > 0 {
            tracing::info!(room = %self.room_id, flushed, "flushed queued messages");
        }
    }

    fn on_connection_state(&self, state: ConnectionState) {
        let mut timeline = self.lock();
        if timeline.closed {
            return;
        }
        match state {
            ConnectionState::Connected => self.flush(&mut timeline),
            ConnectionState::Failed => {
                let queued: Vec<LocalId> = timeline.queue.drain(..).collect();
                for local_id in queued {
                    self.resolve_failed(&mut timeline, local_id, DeliveryFailure::Cancelled);
                }
            }
            ConnectionState::Disconnected => {
                self.cancel_pending(&mut timeline);
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {}
        }
    }

    fn handle_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::MessageAck(ack) => self.on_ack(ack),
            ServerEvent::MessageRejected(rejected) => self.on_rejected(rejected),
            ServerEvent::NewMessage(message) => self.on_new_message(message),
            ServerEvent::MessageRead(read) => self.on_read(read),
            ServerEvent::Typing(_) | ServerEvent::Presence(_) => {}
        }
    }

    fn on_ack(&self, ack: &MessageAckPayload) {
        let mut timeline = self.lock();
        if self.resolve_sent(&mut timeline, ack.local_id, ack.remote_id.clone()) {
            tracing::debug!(room = %self.room_id, local_id = %ack.local_id, remote_id = %ack.remote_id, "message acknowledged");
        }
    }

    fn on_rejected(&self, rejected: &MessageRejectedPayload) {
        let mut timeline = self.lock();
        let failure = DeliveryFailure::Rejected {
            code: rejected.code.clone(),
            reason: rejected.reason.clone(),
        };
        if self.resolve_failed(&mut timeline, rejected.local_id, failure) {
            tracing::warn!(
                room = %self.room_id,
                local_id = %rejected.local_id,
                code = %rejected.code,
                reason = %rejected.reason,
                "message rejected by server"
            );
        }
    }

    fn expire(&self, local_id: LocalId) {
        let mut timeline = self.lock();
        if self.resolve_failed(&mut timeline, local_id, DeliveryFailure::Timeout) {
            tracing::warn!(room = %self.room_id, %local_id, timeout = ?self.config.ack_timeout, "no ack, message failed");
        }
    }

    fn on_new_message(&self, payload: &NewMessagePayload) {
        if payload.room_id != self.room_id {
            return;
        }
        let mut timeline = self.lock();
        if timeline.closed {
            return;
        }
        if let Some(local_id) = payload.local_id {
            if timeline.in_flight.contains_key(&local_id) {
                // echo of our own send, treat as its ack
                self.resolve_sent(&mut timeline, local_id, payload.remote_id.clone());
                return;
            }
            if timeline.resolved.contains(&local_id) || timeline.find(&local_id).is_some() {
                tracing::debug!(room = %self.room_id, %local_id, "dropping echo of resolved message");
                return;
            }
        }
        if timeline.seen_remote.contains(&payload.remote_id) {
            tracing::debug!(room = %self.room_id, remote_id = %payload.remote_id, "dropping duplicate message");
            return;
        }

        let text = payload
            .text
            .clone()
            .and_then(|t| MessageText::new(t).ok());
        let message = Message::inbound(
            payload.local_id.unwrap_or_else(LocalId::generate),
            payload.remote_id.clone(),
            self.room_id.clone(),
            payload.sender_id.clone(),
            text,
            payload.attachment.clone(),
            payload.timestamp,
        );
        timeline.resolved.insert(message.local_id);
        timeline.seen_remote.insert(payload.remote_id.clone());
        timeline.push(message.clone(), self.config.timeline_capacity);
        let _ = self.events.send(MessageEvent::Received(message));
    }

    fn on_read(&self, read: &MessageReadPayload) {
        if read.room_id != self.room_id {
            return;
        }
        let mut timeline = self.lock();
        let Some(message) = timeline
            .messages
            .iter_mut()
            .find(|m| m.remote_id.as_deref() == Some(read.message_id.as_str()))
        else {
            return;
        };
        if message.read {
            return;
        }
        match message.mark_read() {
            Ok(()) => {
                let _ = self.events.send(MessageEvent::Read(message.clone()));
            }
            Err(error) => tracing::debug!(%error, "ignoring read receipt"),
        }
    }

    fn resolve_sent(&self, timeline: &mut Timeline, local_id: LocalId, remote_id: String) -> bool {
        let Some(timer) = timeline.in_flight.remove(&local_id) else {
            return false;
        };
        timer.abort();
        timeline.resolved.insert(local_id);
        timeline.seen_remote.insert(remote_id.clone());
        let Some(message) = timeline.find_mut(&local_id) else {
            return false;
        };
        match message.mark_sent(remote_id) {
            Ok(()) => {
                let _ = self.events.send(MessageEvent::Sent(message.clone()));
                true
            }
            Err(error) => {
                tracing::debug!(%error, %local_id, "ignoring ack");
                false
            }
        }
    }

    fn resolve_failed(
        &self,
        timeline: &mut Timeline,
        local_id: LocalId,
        failure: DeliveryFailure,
    ) -> bool {
        if let Some(timer) = timeline.in_flight.remove(&local_id) {
            timer.abort();
        } else if failure != DeliveryFailure::Cancelled {
            // only in-flight messages can time out or be rejected
            return false;
        }
        timeline.resolved.insert(local_id);
        let Some(message) = timeline.find_mut(&local_id) else {
            return false;
        };
        match message.mark_failed(failure) {
            Ok(()) => {
                let _ = self.events.send(MessageEvent::Failed(message.clone()));
                true
            }
            Err(error) => {
                tracing::debug!(%error, %local_id, "ignoring failure");
                false
            }
        }
    }

    fn cancel_pending(&self, timeline: &mut Timeline) -> usize {
        let mut pending: Vec<LocalId> = timeline.queue.drain(..).collect();
        pending.extend(timeline.in_flight.keys().copied());
        pending
            .into_iter()
            .filter(|local_id| {
                self.resolve_failed(timeline, *local_id, DeliveryFailure::Cancelled)
            })
            .count()
    }
}

impl Drop for MessageSession {
    fn drop(&mut self) {
        self.detach();
        for (_, timer) in self.lock().in_flight.drain() {
            timer.abort();
        }
    }
}
