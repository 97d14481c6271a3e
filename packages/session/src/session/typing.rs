//! Typing indicators.
//!
//! Local side: the first keystroke in a quiet window sends
//! `typing{isTyping:true}`, further keystrokes only push the idle deadline
//! back, and `typing_idle` without keystrokes sends `isTyping:false`.
//!
//! Remote side: every `typing{isTyping:true}` sets an expiry of
//! `now + typing_ttl`; a user counts as typing only while that expiry is in
//! the future, so a lost stop event cannot leave the indicator on.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};

use crate::{
    domain::{RoomId, TypingSignal, UserId},
    infrastructure::dto::{ClientEvent, EventKind, ServerEvent, TypingPayload},
};

use super::{
    connection::TransportConnection,
    dispatcher::{EventDispatcher, SubscriptionHandle},
};

struct LocalTyping {
    last_activity: Instant,
    idle_timer: JoinHandle<()>,
}

#[derive(Default)]
struct Indicators {
    local: HashMap<RoomId, LocalTyping>,
    remote: HashMap<RoomId, HashMap<UserId, TypingSignal>>,
}

pub struct TypingCoordinator {
    self_id: UserId,
    connection: TransportConnection,
    dispatcher: Arc<EventDispatcher>,
    idle: Duration,
    ttl: Duration,
    indicators: Mutex<Indicators>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    me: Weak<TypingCoordinator>,
}

impl TypingCoordinator {
    /// Create a coordinator for `self_id` and subscribe it to `typing` events
    pub fn new(
        self_id: UserId,
        connection: TransportConnection,
        dispatcher: Arc<EventDispatcher>,
        idle: Duration,
        ttl: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let weak = me.clone();
            let handle = dispatcher.on(EventKind::Typing, move |event| {
                if let (Some(coordinator), ServerEvent::Typing(payload)) = (weak.upgrade(), event) {
                    coordinator.on_remote_typing(payload);
                }
            });
            Self {
                self_id,
                connection,
                dispatcher,
                idle,
                ttl,
                indicators: Mutex::new(Indicators::default()),
                subscription: Mutex::new(Some(handle)),
                me: me.clone(),
            }
        })
    }

    /// The user whose typing is reported
    pub fn user_id(&self) -> &UserId {
        &self.self_id
    }

    /// Report a local keystroke in `room_id`. Must be called within a Tokio
    /// runtime.
    pub fn notify_typing(&self, room_id: &RoomId) {
        let mut indicators = self.lock();
        let now = Instant::now();
        if let Some(local) = indicators.local.get_mut(room_id) {
            local.last_activity = now;
            return;
        }
        if !self.connection.send(self.typing_event(room_id, true)) {
            tracing::trace!(room = %room_id, "typing not reported, not connected");
            return;
        }
        tracing::debug!(room = %room_id, "typing started");
        let idle_timer = tokio::spawn(watch_idle(
            self.me.clone(),
            room_id.clone(),
            now + self.idle,
        ));
        indicators.local.insert(
            room_id.clone(),
            LocalTyping {
                last_activity: now,
                idle_timer,
            },
        );
    }

    /// Stop local typing in `room_id` right away (e.g. after sending)
    pub fn stop_typing(&self, room_id: &RoomId) {
        let Some(local) = self.lock().local.remove(room_id) else {
            return;
        };
        local.idle_timer.abort();
        self.connection.send(self.typing_event(room_id, false));
        tracing::debug!(room = %room_id, "typing stopped");
    }

    /// Whether the local user is currently reported as typing in `room_id`
    pub fn is_local_typing(&self, room_id: &RoomId) -> bool {
        self.lock().local.contains_key(room_id)
    }

    /// Whether anyone else is typing in `room_id`
    pub fn is_remote_typing(&self, room_id: &RoomId) -> bool {
        let now = Instant::now();
        self.lock()
            .remote
            .get(room_id)
            .is_some_and(|signals| signals.values().any(|s| s.is_active(now)))
    }

    /// Users currently typing in `room_id`, sorted
    pub fn typing_users(&self, room_id: &RoomId) -> Vec<UserId> {
        let now = Instant::now();
        let mut indicators = self.lock();
        let Some(signals) = indicators.remote.get_mut(room_id) else {
            return Vec::new();
        };
        signals.retain(|_, signal| signal.is_active(now));
        let mut users: Vec<UserId> = signals.keys().cloned().collect();
        users.sort();
        users
    }

    /// Forget everything about `room_id`, stopping local typing first
    pub fn forget_room(&self, room_id: &RoomId) {
        self.stop_typing(room_id);
        self.lock().remote.remove(room_id);
    }

    /// Forget every room without sending anything
    pub fn clear(&self) {
        let mut indicators = self.lock();
        for (_, local) in indicators.local.drain() {
            local.idle_timer.abort();
        }
        indicators.remote.clear();
    }

    fn on_remote_typing(&self, payload: &TypingPayload) {
        if payload.user_id == self.self_id {
            return;
        }
        let mut indicators = self.lock();
        if payload.is_typing {
            let signal = TypingSignal::new(
                payload.room_id.clone(),
                payload.user_id.clone(),
                Instant::now() + self.ttl,
            );
            indicators
                .remote
                .entry(payload.room_id.clone())
                .or_default()
                .insert(payload.user_id.clone(), signal);
        } else if let Some(signals) = indicators.remote.get_mut(&payload.room_id) {
            signals.remove(&payload.user_id);
            if signals.is_empty() {
                indicators.remote.remove(&payload.room_id);
            }
        }
    }

    /// `None` once the room went idle (and the stop was sent), otherwise the
    /// next deadline to check
    fn check_idle(&self, room_id: &RoomId) -> Option<Instant> {
        let mut indicators = self.lock();
        let deadline = indicators.local.get(room_id)?.last_activity + self.idle;
        if deadline > Instant::now() {
            return Some(deadline);
        }
        indicators.local.remove(room_id);
        drop(indicators);
        self.connection.send(self.typing_event(room_id, false));
        tracing::debug!(room = %room_id, "typing went idle");
        None
    }

    fn typing_event(&self, room_id: &RoomId, is_typing: bool) -> ClientEvent {
        ClientEvent::Typing(TypingPayload {
            room_id: room_id.clone(),
            user_id: self.self_id.clone(),
            is_typing,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Indicators> {
        self.indicators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.dispatcher.off(handle);
        }
        self.clear();
    }
}

async fn watch_idle(me: Weak<TypingCoordinator>, room_id: RoomId, mut deadline: Instant) {
    loop {
        tokio::time::sleep_until(deadline).await;
        let Some(coordinator) = me.upgrade() else {
            return;
        };
        match coordinator.check_idle(&room_id) {
            Some(next) => deadline = next,
            None => return,
        }
    }
}
