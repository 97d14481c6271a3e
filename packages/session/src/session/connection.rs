//! The single physical connection to the server.
//!
//! A [`TransportConnection`] owns at most one live link. `connect` spawns a
//! driver task that opens the link, replays room joins, then serially
//! writes outbound frames and decodes inbound frames into the
//! [`EventDispatcher`]. When the link drops, the driver reconnects with
//! backoff until it succeeds or runs out of attempts.
//!
//! Transport errors never escape this module as errors: they surface as
//! [`ConnectionState`] transitions.
//!
//! Lock order: the link mutex may be held while the replay hook runs (which
//! takes the room registry lock), never the other way around.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    domain::{ConnectionState, UserId},
    infrastructure::{
        dto::{ClientEvent, ServerEvent},
        transport::{Connector, Transport},
    },
};

use super::{config::SessionConfig, dispatcher::EventDispatcher, error::ConnectionError};

/// Graceful close budget for a link being shut down
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type ReplayHook = Arc<dyn Fn() -> Vec<ClientEvent> + Send + Sync>;

/// Handle for removing a listener registered with
/// [`TransportConnection::on_state_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateListenerHandle(u64);

struct Driver {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Link {
    state: ConnectionState,
    attempt: u32,
    identity: Option<UserId>,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    driver: Option<Driver>,
    /// Bumped whenever a driver is started or abandoned; stale drivers
    /// compare against it and stop touching the state.
    generation: u64,
    last_error: Option<ConnectionError>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    dispatcher: Arc<EventDispatcher>,
    config: SessionConfig,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    listeners: Mutex<Vec<(u64, StateListener)>>,
    next_listener_id: AtomicU64,
    replay: Mutex<Option<ReplayHook>>,
}

enum LinkEnd {
    Shutdown,
    Dropped(String),
}

/// Owner of the one physical connection. Cheap to clone; clones share it.
#[derive(Clone)]
pub struct TransportConnection {
    shared: Arc<Shared>,
}

impl TransportConnection {
    pub fn new(
        connector: Arc<dyn Connector>,
        dispatcher: Arc<EventDispatcher>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                dispatcher,
                config,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    attempt: 0,
                    identity: None,
                    outbound: None,
                    driver: None,
                    generation: 0,
                    last_error: None,
                }),
                state_tx,
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                replay: Mutex::new(None),
            }),
        }
    }

    /// Open the connection for `identity`.
    ///
    /// Resolves once the first link is up (`Ok`), the connection `Failed`,
    /// or `connect_timeout` elapsed (`Err(Timeout)`; the driver keeps
    /// retrying in the background). While a driver is already running, this
    /// waits for that driver instead of opening a second link.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn connect(&self, identity: UserId) -> Result<(), ConnectionError> {
        let (mut state_rx, dropped, started) = {
            let mut link = self.shared.lock_link();
            let same_identity = link.identity.as_ref() == Some(&identity);
            let (dropped, started) = match link.state {
                ConnectionState::Connected if same_identity => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Reconnecting if same_identity => {
                    (false, false)
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    self.shared.abandon_driver(&mut link);
                    self.start_driver(&mut link, identity);
                    (false, true)
                }
                _ => {
                    tracing::info!(from = ?link.identity, to = %identity, "identity changed, replacing connection");
                    self.shared.abandon_driver(&mut link);
                    let dropped = self.shared.transition(&mut link, ConnectionState::Disconnected);
                    self.start_driver(&mut link, identity);
                    (dropped, true)
                }
            };
            (self.shared.state_tx.subscribe(), dropped, started)
        };
        if dropped {
            self.shared.notify_listeners(ConnectionState::Disconnected);
        }
        if started {
            self.shared.notify_listeners(ConnectionState::Connecting);
        }

        let wait = async {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Failed => {
                        let error = self.shared.lock_link().last_error.clone();
                        return Err(error.unwrap_or(ConnectionError::Failed {
                            attempts: self.shared.config.backoff.max_attempts(),
                        }));
                    }
                    ConnectionState::Disconnected => return Err(ConnectionError::NotConnected),
                    ConnectionState::Connecting | ConnectionState::Reconnecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(ConnectionError::NotConnected);
                }
            }
        };

        match tokio::time::timeout(self.shared.config.connect_timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.shared.config.connect_timeout,
                    "connect timed out, retrying in the background"
                );
                Err(ConnectionError::Timeout)
            }
        }
    }

    /// Tear the connection down. Safe in every state.
    pub fn disconnect(&self) {
        let changed = {
            let mut link = self.shared.lock_link();
            self.shared.abandon_driver(&mut link);
            link.identity = None;
            link.attempt = 0;
            link.last_error = None;
            self.shared.transition(&mut link, ConnectionState::Disconnected)
        };
        if changed {
            tracing::info!("disconnected");
            self.shared.notify_listeners(ConnectionState::Disconnected);
        }
    }

    /// Hand `event` to the link. Returns `false` unless `Connected`; nothing
    /// is buffered here.
    pub fn send(&self, event: ClientEvent) -> bool {
        let link = self.shared.lock_link();
        if link.state != ConnectionState::Connected {
            tracing::debug!(event = event.name(), state = ?link.state, "send refused, not connected");
            return false;
        }
        match &link.outbound {
            Some(outbound) => outbound.send(event).is_ok(),
            None => false,
        }
    }

    /// Register `listener` for every state transition
    pub fn on_state_change<F>(&self, listener: F) -> StateListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        StateListenerHandle(id)
    }

    /// Remove a state listener. Returns `false` if it was already gone.
    pub fn remove_state_listener(&self, handle: StateListenerHandle) -> bool {
        let mut listeners = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != handle.0);
        listeners.len() != before
    }

    /// Watch channel of the state, for async waiters
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Install the frames to write first on every new link, before the
    /// state becomes `Connected`
    pub fn set_replay_hook<F>(&self, hook: F)
    where
        F: Fn() -> Vec<ClientEvent> + Send + Sync + 'static,
    {
        *self
            .shared
            .replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock_link().state
    }

    /// Reconnect attempts since the last successful link
    pub fn attempt(&self) -> u32 {
        self.shared.lock_link().attempt
    }

    pub fn identity(&self) -> Option<UserId> {
        self.shared.lock_link().identity.clone()
    }

    /// Why the connection last ended up `Failed`
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.shared.lock_link().last_error.clone()
    }

    fn start_driver(&self, link: &mut Link, identity: UserId) {
        link.generation += 1;
        link.identity = Some(identity.clone());
        link.attempt = 0;
        link.last_error = None;
        self.shared.transition(link, ConnectionState::Connecting);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_driver(
            Arc::clone(&self.shared),
            link.generation,
            identity,
            shutdown_rx,
        ));
        link.driver = Some(Driver {
            shutdown: shutdown_tx,
            task,
        });
    }
}

impl Shared {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a transition under the link lock. The watch channel is updated
    /// here; listeners are called later via [`Shared::notify_listeners`].
    fn transition(&self, link: &mut Link, next: ConnectionState) -> bool {
        if link.state == next {
            return false;
        }
        if !link.state.allows(next) {
            tracing::error!(from = ?link.state, to = ?next, "rejected illegal connection transition");
            return false;
        }
        tracing::debug!(from = ?link.state, to = ?next, attempt = link.attempt, "connection state");
        link.state = next;
        self.state_tx.send_replace(next);
        true
    }

    fn notify_listeners(&self, state: ConnectionState) {
        let listeners: Vec<StateListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(state);
        }
    }

    fn abandon_driver(&self, link: &mut Link) {
        link.generation += 1;
        link.outbound = None;
        if let Some(driver) = link.driver.take() {
            if driver.shutdown.send(()).is_err() && !driver.task.is_finished() {
                driver.task.abort();
            }
        }
    }

    /// A fresh link is up: replay, then publish `Connected`
    fn establish(&self, generation: u64, outbound: mpsc::UnboundedSender<ClientEvent>) -> bool {
        {
            let mut link = self.lock_link();
            if link.generation != generation {
                return false;
            }
            let hook = self
                .replay
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let replayed = hook.map(|hook| hook()).unwrap_or_default();
            let count = replayed.len();
            for event in replayed {
                if outbound.send(event).is_err() {
                    return false;
                }
            }
            let reconnected = link.state == ConnectionState::Reconnecting;
            link.outbound = Some(outbound);
            link.attempt = 0;
            link.last_error = None;
            if !self.transition(&mut link, ConnectionState::Connected) {
                return false;
            }
            tracing::info!(
                identity = ?link.identity,
                replayed = count,
                reconnected,
                "connected"
            );
        }
        self.notify_listeners(ConnectionState::Connected);
        true
    }

    /// The link dropped; start reconnecting
    fn begin_reconnect(&self, generation: u64) -> bool {
        {
            let mut link = self.lock_link();
            if link.generation != generation {
                return false;
            }
            link.outbound = None;
            if !self.transition(&mut link, ConnectionState::Reconnecting) {
                return true;
            }
        }
        self.notify_listeners(ConnectionState::Reconnecting);
        true
    }

    /// Count one more retry; `None` when stale or out of attempts (-> Failed)
    fn next_attempt(&self, generation: u64) -> Option<u32> {
        let attempt = {
            let mut link = self.lock_link();
            if link.generation != generation {
                return None;
            }
            link.attempt += 1;
            if link.attempt <= self.config.backoff.max_attempts() {
                return Some(link.attempt);
            }
            link.attempt - 1
        };
        self.fail(generation, ConnectionError::Failed { attempts: attempt });
        None
    }

    fn fail(&self, generation: u64, error: ConnectionError) {
        {
            let mut link = self.lock_link();
            if link.generation != generation {
                return;
            }
            tracing::error!(%error, "connection failed");
            link.outbound = None;
            link.last_error = Some(error);
            if !self.transition(&mut link, ConnectionState::Failed) {
                return;
            }
        }
        self.notify_listeners(ConnectionState::Failed);
    }

    /// Decode one inbound frame and fan it out; malformed frames are dropped
    fn deliver(&self, frame: &str) {
        match ServerEvent::decode(frame) {
            Ok(event) => {
                tracing::debug!(event = %event.kind(), "inbound event");
                self.dispatcher.emit(&event);
            }
            Err(error) => tracing::warn!(%error, "dropping malformed frame"),
        }
    }
}

async fn run_driver(
    shared: Arc<Shared>,
    generation: u64,
    identity: UserId,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connect_timeout = shared.config.connect_timeout;
    loop {
        let attempt = tokio::select! {
            _ = &mut shutdown => return,
            result = tokio::time::timeout(connect_timeout, shared.connector.connect(&identity)) => {
                result.unwrap_or_else(|_| Err(crate::infrastructure::TransportError::Unreachable(
                    format!("no link within {connect_timeout:?}"),
                )))
            }
        };

        match attempt {
            Ok(mut transport) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                if !shared.establish(generation, outbound_tx) {
                    close_quietly(transport.as_mut()).await;
                    return;
                }
                match pump(&shared, transport, outbound_rx, &mut shutdown).await {
                    LinkEnd::Shutdown => return,
                    LinkEnd::Dropped(reason) => {
                        tracing::warn!(%reason, "link dropped");
                        if !shared.begin_reconnect(generation) {
                            return;
                        }
                    }
                }
            }
            Err(error) if error.is_fatal() => {
                shared.fail(generation, ConnectionError::from(error));
                return;
            }
            Err(error) => tracing::warn!(%error, "connect attempt failed"),
        }

        let Some(attempt) = shared.next_attempt(generation) else {
            return;
        };
        let delay = shared.config.backoff.next_delay(attempt);
        tracing::info!(attempt, ?delay, "reconnecting after backoff");
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Serve one established link until it drops or the driver is shut down
async fn pump(
    shared: &Shared,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    shutdown: &mut oneshot::Receiver<()>,
) -> LinkEnd {
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                close_quietly(transport.as_mut()).await;
                return LinkEnd::Shutdown;
            }
            event = outbound.recv() => {
                let Some(event) = event else {
                    close_quietly(transport.as_mut()).await;
                    return LinkEnd::Shutdown;
                };
                let frame = match event.encode() {
                    Ok(frame) => frame,
                    Err(error) => {
                        tracing::error!(%error, event = event.name(), "failed to encode outbound event");
                        continue;
                    }
                };
                tracing::debug!(event = event.name(), room = %event.room_id(), "outbound event");
                if let Err(error) = transport.send(frame).await {
                    return LinkEnd::Dropped(error.to_string());
                }
            }
            frame = transport.recv() => match frame {
                Some(Ok(frame)) => shared.deliver(&frame),
                Some(Err(error)) => return LinkEnd::Dropped(error.to_string()),
                None => return LinkEnd::Dropped("closed by server".to_string()),
            },
        }
    }
}

async fn close_quietly(transport: &mut dyn Transport) {
    match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::debug!(%error, "error while closing link"),
        Err(_) => tracing::debug!("link close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::RoomId,
        infrastructure::{
            TransportError,
            dto::{EventKind, PresencePayload, RoomPayload},
            transport::{ConnectScript, MemoryConnector, ServerPeer},
        },
        session::config::BackoffPolicy,
    };

    fn test_config() -> SessionConfig {
        SessionConfig::default().with_backoff(BackoffPolicy::default().with_jitter(0.0))
    }

    fn setup() -> (TransportConnection, ServerPeer, Arc<EventDispatcher>) {
        let (connector, peer) = MemoryConnector::new();
        let dispatcher = Arc::new(EventDispatcher::new());
        let connection =
            TransportConnection::new(Arc::new(connector), Arc::clone(&dispatcher), test_config());
        (connection, peer, dispatcher)
    }

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn record_states(connection: &TransportConnection) -> Arc<Mutex<Vec<ConnectionState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        connection.on_state_change(move |state| sink.lock().unwrap().push(state));
        states
    }

    async fn wait_for(connection: &TransportConnection, target: ConnectionState) {
        let mut rx = connection.subscribe_state();
        rx.wait_for(|state| *state == target).await.unwrap();
    }

    fn join(room: &str) -> ClientEvent {
        ClientEvent::JoinRoom(RoomPayload {
            room_id: RoomId::new(room).unwrap(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_presents_identity_as_metadata() {
        // テスト項目: 接続時に identity がリンクのメタデータとして渡される
        // given (前提条件):
        let (connection, mut server, _) = setup();

        // when (操作):
        let result = connection.connect(alice()).await;
        let link = server.accept().await.unwrap();

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(link.identity(), &alice());
        assert_eq!(connection.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_is_refused_while_not_connected() {
        // テスト項目: Connected 以外では send は false を返しバッファしない
        // given (前提条件):
        let (connection, _server, _) = setup();

        // when (操作):
        let sent = connection.send(join("r1"));

        // then (期待する結果):
        assert!(!sent);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_reuses_live_connection() {
        // テスト項目: 接続済みで再度 connect しても物理接続は 1 本のまま
        // given (前提条件):
        let (connection, mut server, _) = setup();
        connection.connect(alice()).await.unwrap();
        let _link = server.accept().await.unwrap();

        // when (操作):
        let again = connection.connect(alice()).await;

        // then (期待する結果):
        assert!(again.is_ok());
        assert_eq!(server.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop_and_resets_attempt() {
        // テスト項目: リンク切断後は Reconnecting を経て再接続し attempt が 0 に戻る
        // given (前提条件):
        let (connection, mut server, _) = setup();
        let states = record_states(&connection);
        connection.connect(alice()).await.unwrap();
        let link = server.accept().await.unwrap();
        server.script_connects([ConnectScript::Fail(TransportError::Unreachable(
            "down".to_string(),
        ))]);

        // when (操作):
        link.drop_link();
        let relinked = server.accept().await.unwrap();
        wait_for(&connection, ConnectionState::Connected).await;

        // then (期待する結果):
        assert_eq!(relinked.identity(), &alice());
        assert_eq!(connection.attempt(), 0);
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Connected,
            ]
        );
        assert_eq!(server.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhaustion_fails_and_stops() {
        // テスト項目: 再試行回数を使い切ると Failed になり、以降は再試行しない
        // given (前提条件):
        let (connection, server, _) = setup();
        server.script_connects(
            (0..10).map(|_| ConnectScript::Fail(TransportError::Unreachable("down".to_string()))),
        );

        // when (操作):
        let result = connection.connect(alice()).await;

        // then (期待する結果):
        assert_eq!(result, Err(ConnectionError::Failed { attempts: 5 }));
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert_eq!(server.connect_attempts(), 6);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(server.connect_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_is_fatal() {
        // テスト項目: 認証拒否は再試行せず Failed になる
        // given (前提条件):
        let (connection, server, _) = setup();
        server.script_connects([ConnectScript::Fail(TransportError::Rejected(
            "HTTP 401".to_string(),
        ))]);

        // when (操作):
        let result = connection.connect(alice()).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(ConnectionError::AuthRejected("HTTP 401".to_string()))
        );
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert_eq!(server.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_keeps_retrying_in_background() {
        // テスト項目: connect のタイムアウト後もバックグラウンドで再接続が続く
        // given (前提条件):
        let (connection, mut server, _) = setup();
        server.script_connects([ConnectScript::Hang]);

        // when (操作):
        let result = connection.connect(alice()).await;

        // then (期待する結果):
        assert_eq!(result, Err(ConnectionError::Timeout));
        let link = server.accept().await.unwrap();
        wait_for(&connection, ConnectionState::Connected).await;
        assert_eq!(link.identity(), &alice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_frames_precede_other_traffic() {
        // テスト項目: 再接続時はリプレイ（join）が他の送信より先に流れる
        // given (前提条件):
        let (connection, mut server, _) = setup();
        connection.set_replay_hook(|| vec![join("r1"), join("r2")]);
        connection.connect(alice()).await.unwrap();
        let mut link = server.accept().await.unwrap();
        assert_eq!(link.recv_event().await, Some(join("r1")));
        assert_eq!(link.recv_event().await, Some(join("r2")));

        // when (操作):
        link.drop_link();
        let mut relinked = server.accept().await.unwrap();
        wait_for(&connection, ConnectionState::Connected).await;
        assert!(connection.send(join("r3")));

        // then (期待する結果):
        assert_eq!(relinked.recv_event().await, Some(join("r1")));
        assert_eq!(relinked.recv_event().await, Some(join("r2")));
        assert_eq!(relinked.recv_event().await, Some(join("r3")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_does_not_break_delivery() {
        // テスト項目: 不正なフレームは破棄され、後続のイベントは配送される
        // given (前提条件):
        let (connection, mut server, dispatcher) = setup();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        dispatcher.on(EventKind::Presence, move |event| {
            let _ = seen_tx.send(event.clone());
        });
        connection.connect(alice()).await.unwrap();
        let link = server.accept().await.unwrap();

        // when (操作):
        link.send_raw("{definitely not json").unwrap();
        link.send_raw(r#"{"event":"unknown","data":{}}"#).unwrap();
        let presence = ServerEvent::Presence(PresencePayload {
            user_id: UserId::new("bob").unwrap(),
            online: true,
        });
        link.send_event(&presence).unwrap();

        // then (期待する結果):
        assert_eq!(seen_rx.recv().await, Some(presence));
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_reports_disconnect_before_new_link() {
        // テスト項目: 別の identity で connect すると Disconnected を通知してから新しいリンクを張る
        // given (前提条件):
        let (connection, mut server, _) = setup();
        connection.connect(alice()).await.unwrap();
        let _alice_link = server.accept().await.unwrap();
        let states = record_states(&connection);
        let bob = UserId::new("bob").unwrap();

        // when (操作):
        connection.connect(bob.clone()).await.unwrap();
        let bob_link = server.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // then (期待する結果):
        assert_eq!(bob_link.identity(), &bob);
        assert_eq!(connection.identity(), Some(bob));
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_from_any_state() {
        // テスト項目: disconnect はどの状態からでも安全に呼べる
        // given (前提条件):
        let (connection, mut server, _) = setup();

        // when (操作): 未接続での disconnect
        connection.disconnect();

        // then (期待する結果):
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        // when (操作): 接続後の disconnect
        connection.connect(alice()).await.unwrap();
        let mut link = server.accept().await.unwrap();
        connection.disconnect();

        // then (期待する結果):
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!connection.send(join("r1")));
        assert_eq!(link.recv_frame().await, None);
        assert!(connection.identity().is_none());
    }
}
