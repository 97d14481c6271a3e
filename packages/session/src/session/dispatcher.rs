//! Typed publish/subscribe hub for inbound server events.
//!
//! Frames are decoded once by the connection task and fanned out here.
//! Dispatch is synchronous on the caller's task; a handler that needs to do
//! async work must hand it off (spawn, channel) itself.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::infrastructure::dto::{EventKind, ServerEvent};

type Callback = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Handle returned by [`EventDispatcher::on`], the only way to remove that
/// one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    kind: EventKind,
    id: u64,
}

impl SubscriptionHandle {
    /// Event the subscription listens to
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Event name -> ordered callbacks
#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<EventKind, Vec<(u64, Callback)>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `callback` to `kind`; callbacks fire in subscription order
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        tracing::trace!(event = %kind, id, "subscribed");
        SubscriptionHandle { kind, id }
    }

    /// Remove one subscription. Returns `false` if it was already gone.
    pub fn off(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.lock();
        let Some(callbacks) = subscribers.get_mut(&handle.kind) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != handle.id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            subscribers.remove(&handle.kind);
        }
        removed
    }

    /// Remove every subscription to `kind`, returning how many were removed
    pub fn off_all(&self, kind: EventKind) -> usize {
        self.lock().remove(&kind).map_or(0, |callbacks| callbacks.len())
    }

    /// Deliver `event` to its subscribers, returning how many were called.
    ///
    /// Callbacks are snapshotted before the first one runs, so handlers may
    /// subscribe or unsubscribe re-entrantly; such changes take effect from
    /// the next emission.
    pub fn emit(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let callbacks: Vec<Callback> = match self.lock().get(&kind) {
            Some(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => Vec::new(),
        };
        if callbacks.is_empty() {
            tracing::trace!(event = %kind, "no subscribers");
        }
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    /// Current number of subscriptions to `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<(u64, Callback)>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
