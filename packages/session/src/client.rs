//! Entry point for applications: one [`ChatClient`] per logged-in identity.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;

use crate::{
    domain::{
        ConnectionState, IdentityProvider, LocalId, Message, Room, RoomId, RoomIdFactory, UserId,
        ValueObjectError,
    },
    infrastructure::{
        dto::{EventKind, ServerEvent},
        transport::Connector,
    },
    session::{
        ConnectionError, EventDispatcher, MessageSession, RoomRegistry, SendError, SessionConfig,
        StateListenerHandle, SubscriptionHandle, TransportConnection, TypingCoordinator,
    },
};

/// Client-side realtime session: one connection, many rooms.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use chatlink_session::{ChatClient, SessionConfig, StaticIdentity, UserId, WebSocketConnector};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let me = UserId::new("alice")?;
/// let client = ChatClient::new(
///     Arc::new(WebSocketConnector::new("ws://127.0.0.1:8080/ws")),
///     Arc::new(StaticIdentity::new(me)),
///     SessionConfig::default(),
/// );
/// client.connect().await?;
/// let room = client.open_direct(&[UserId::new("bob")?])?;
/// client.send(room.room_id(), Some("hi".to_string()), None)?;
/// # Ok(())
/// # }
/// ```
pub struct ChatClient {
    identity: Arc<dyn IdentityProvider>,
    config: SessionConfig,
    dispatcher: Arc<EventDispatcher>,
    connection: TransportConnection,
    registry: Arc<RoomRegistry>,
    sessions: Mutex<HashMap<RoomId, Arc<MessageSession>>>,
    typing: Mutex<Option<Arc<TypingCoordinator>>>,
    /// Subscriptions made through [`ChatClient::on`]
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

impl ChatClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        identity: Arc<dyn IdentityProvider>,
        config: SessionConfig,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        let connection =
            TransportConnection::new(connector, Arc::clone(&dispatcher), config.clone());
        let registry = RoomRegistry::new(connection.clone());
        Self {
            identity,
            config,
            dispatcher,
            connection,
            registry,
            sessions: Mutex::new(HashMap::new()),
            typing: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Connect as the identity provider's current user.
    ///
    /// A different user than the one currently connected first gets the
    /// full [`ChatClient::disconnect`] teardown: the previous user's rooms
    /// and pending messages are discarded, never carried over.
    ///
    /// # Errors
    ///
    /// See [`TransportConnection::connect`]
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let user_id = self.identity.current_user_id();
        if let Some(previous) = self.connection.identity()
            && previous != user_id
        {
            tracing::info!(from = %previous, to = %user_id, "identity changed, discarding previous session");
            self.disconnect();
        }
        self.typing_for(&user_id);
        tracing::info!(user = %user_id, "connecting");
        self.connection.connect(user_id).await
    }

    /// Disconnect, failing every pending message and forgetting every room
    pub fn disconnect(&self) {
        self.connection.disconnect();
        let sessions: Vec<Arc<MessageSession>> = self.lock_sessions().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close();
        }
        let rooms = self.registry.clear();
        if let Some(typing) = self.lock_typing().take() {
            typing.clear();
        }
        tracing::info!(rooms = rooms.len(), "session torn down");
    }

    /// Join `room_id` and return its message session. Joining again returns
    /// the existing session.
    pub fn join(&self, room_id: RoomId) -> Arc<MessageSession> {
        self.join_room(Room::new(room_id))
    }

    /// Join the room of `participants` plus the current user
    ///
    /// # Errors
    ///
    /// Never fails in practice: the current user makes the set non-empty
    pub fn open_direct(&self, participants: &[UserId]) -> Result<Arc<MessageSession>, ValueObjectError> {
        let me = self.identity.current_user_id();
        let members: std::collections::BTreeSet<UserId> = participants
            .iter()
            .cloned()
            .chain(std::iter::once(me))
            .collect();
        let room_id = RoomIdFactory::from_participants(&members)?;
        Ok(self.join_room(Room::with_participants(room_id, members)))
    }

    /// Leave `room_id`, cancelling its pending messages. Returns `false` if
    /// it was not joined.
    pub fn leave(&self, room_id: &RoomId) -> bool {
        if let Some(typing) = self.typing() {
            typing.forget_room(room_id);
        }
        if let Some(session) = self.lock_sessions().remove(room_id) {
            session.close();
        }
        self.registry.leave(room_id)
    }

    /// Send a message to a joined room
    ///
    /// # Errors
    ///
    /// `SendError::NotJoined` for an unknown room, otherwise see
    /// [`MessageSession::send`]
    pub fn send(
        &self,
        room_id: &RoomId,
        text: Option<String>,
        attachment: Option<String>,
    ) -> Result<Message, SendError> {
        let session = self
            .session(room_id)
            .ok_or_else(|| SendError::NotJoined(room_id.clone()))?;
        let message = session.send(text, attachment)?;
        if let Some(typing) = self.typing() {
            typing.stop_typing(room_id);
        }
        Ok(message)
    }

    /// Explicitly resend a failed message
    ///
    /// # Errors
    ///
    /// `SendError::NotJoined` for an unknown room, otherwise see
    /// [`MessageSession::resend`]
    pub fn resend(&self, room_id: &RoomId, local_id: LocalId) -> Result<Message, SendError> {
        self.session(room_id)
            .ok_or_else(|| SendError::NotJoined(room_id.clone()))?
            .resend(local_id)
    }

    /// Report a local keystroke; ignored for rooms that are not joined
    pub fn notify_typing(&self, room_id: &RoomId) {
        if !self.registry.is_joined(room_id) {
            return;
        }
        if let Some(typing) = self.typing() {
            typing.notify_typing(room_id);
        }
    }

    pub fn is_remote_typing(&self, room_id: &RoomId) -> bool {
        self.typing()
            .is_some_and(|typing| typing.is_remote_typing(room_id))
    }

    pub fn typing_users(&self, room_id: &RoomId) -> Vec<UserId> {
        self.typing()
            .map(|typing| typing.typing_users(room_id))
            .unwrap_or_default()
    }

    /// Subscribe to an inbound event
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let handle = self.dispatcher.on(kind, callback);
        self.lock_subscriptions().push(handle);
        handle
    }

    pub fn off(&self, handle: SubscriptionHandle) -> bool {
        self.lock_subscriptions().retain(|h| *h != handle);
        self.dispatcher.off(handle)
    }

    /// Remove every subscription to `kind` made through [`ChatClient::on`].
    /// Room sessions keep their own subscriptions. Returns how many were removed.
    pub fn off_all(&self, kind: EventKind) -> usize {
        let removed: Vec<SubscriptionHandle> = {
            let mut subscriptions = self.lock_subscriptions();
            let (removed, kept): (Vec<_>, Vec<_>) =
                subscriptions.drain(..).partition(|h| h.kind() == kind);
            *subscriptions = kept;
            removed
        };
        removed
            .into_iter()
            .filter(|handle| self.dispatcher.off(*handle))
            .count()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn on_state_change<F>(&self, listener: F) -> StateListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.connection.on_state_change(listener)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn session(&self, room_id: &RoomId) -> Option<Arc<MessageSession>> {
        self.lock_sessions().get(room_id).cloned()
    }

    pub fn joined_rooms(&self) -> Vec<RoomId> {
        self.registry.joined_rooms()
    }

    pub fn is_joined(&self, room_id: &RoomId) -> bool {
        self.registry.is_joined(room_id)
    }

    /// The user this client acts for
    pub fn user_id(&self) -> UserId {
        self.identity.current_user_id()
    }

    fn join_room(&self, room: Room) -> Arc<MessageSession> {
        let room_id = room.id.clone();
        let session = {
            let mut sessions = self.lock_sessions();
            Arc::clone(sessions.entry(room_id.clone()).or_insert_with(|| {
                MessageSession::new(
                    room_id.clone(),
                    self.identity.current_user_id(),
                    self.connection.clone(),
                    Arc::clone(&self.dispatcher),
                    self.config.clone(),
                )
            }))
        };
        self.registry.join(room);
        session
    }

    fn typing(&self) -> Option<Arc<TypingCoordinator>> {
        self.lock_typing().clone()
    }

    /// Typing coordinator for `user_id`, replacing one built for another user
    fn typing_for(&self, user_id: &UserId) {
        let mut typing = self.lock_typing();
        let current = typing.as_ref().is_some_and(|t| t.user_id() == user_id);
        if !current {
            *typing = Some(TypingCoordinator::new(
                user_id.clone(),
                self.connection.clone(),
                Arc::clone(&self.dispatcher),
                self.config.typing_idle,
                self.config.typing_ttl,
            ));
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<RoomId, Arc<MessageSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<SubscriptionHandle>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_typing(&self) -> MutexGuard<'_, Option<Arc<TypingCoordinator>>> {
        self.typing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{DeliveryFailure, Timestamp, identity::MockIdentityProvider, room_id_for},
        infrastructure::{
            dto::{ClientEvent, NewMessagePayload, RoomPayload},
            transport::{MemoryConnector, ServerPeer},
        },
    };

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn client_for(id: &'static str) -> (ChatClient, ServerPeer) {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_current_user_id()
            .returning(move || UserId::new(id).unwrap());
        let (connector, server) = MemoryConnector::new();
        let client = ChatClient::new(
            Arc::new(connector),
            Arc::new(identity),
            SessionConfig::default(),
        );
        (client, server)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_uses_identity_provider() {
        // テスト項目: 接続時に IdentityProvider のユーザーが使われる
        // given (前提条件):
        let (client, mut server) = client_for("alice");

        // when (操作):
        client.connect().await.unwrap();
        let link = server.accept().await.unwrap();

        // then (期待する結果):
        assert_eq!(link.identity(), &user("alice"));
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_unjoined_room_fails() {
        // テスト項目: 参加していないルームへの送信は NotJoined になる
        // given (前提条件):
        let (client, mut server) = client_for("alice");
        client.connect().await.unwrap();
        let _link = server.accept().await.unwrap();
        let room = RoomId::new("nowhere").unwrap();

        // when (操作):
        let result = client.send(&room, Some("hi".to_string()), None);

        // then (期待する結果):
        assert_eq!(result, Err(SendError::NotJoined(room)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_direct_derives_shared_room_id() {
        // テスト項目: open_direct は自分を含む参加者集合から同じ RoomId を導出する
        // given (前提条件):
        let (client, _server) = client_for("alice");

        // when (操作):
        let first = client.open_direct(&[user("bob")]).unwrap();
        let again = client.open_direct(&[user("bob"), user("alice")]).unwrap();

        // then (期待する結果):
        let expected = room_id_for([&user("bob"), &user("alice")]).unwrap();
        assert_eq!(first.room_id(), &expected);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(client.joined_rooms(), vec![expected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_pending_and_forgets_rooms() {
        // テスト項目: disconnect で保留中のメッセージは Failed になり、参加ルームは破棄される
        // given (前提条件):
        let (client, mut server) = client_for("alice");
        client.connect().await.unwrap();
        let _link = server.accept().await.unwrap();
        let session = client.join(RoomId::new("r1").unwrap());
        let message = client
            .send(session.room_id(), Some("hi".to_string()), None)
            .unwrap();

        // when (操作):
        client.disconnect();

        // then (期待する結果):
        let stored = session.message(&message.local_id).unwrap();
        assert_eq!(stored.failure, Some(DeliveryFailure::Cancelled));
        assert!(client.joined_rooms().is_empty());
        assert!(client.session(session.room_id()).is_none());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_discards_previous_user_session() {
        // テスト項目: 別ユーザーで接続し直すと前ユーザーのルームと保留メッセージは破棄され、リプレイされない
        // given (前提条件):
        let current = Arc::new(Mutex::new(user("alice")));
        let source = Arc::clone(&current);
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_current_user_id()
            .returning(move || source.lock().unwrap().clone());
        let (connector, mut server) = MemoryConnector::new();
        let client = ChatClient::new(
            Arc::new(connector),
            Arc::new(identity),
            SessionConfig::default(),
        );
        client.connect().await.unwrap();
        let mut alice_link = server.accept().await.unwrap();
        let private = RoomId::new("alice-private").unwrap();
        let session = client.join(private.clone());
        alice_link.recv_event().await;
        let secret = client
            .send(&private, Some("secret".to_string()), None)
            .unwrap();
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        client.on_state_change(move |state| sink.lock().unwrap().push(state));

        // when (操作):
        *current.lock().unwrap() = user("bob");
        client.connect().await.unwrap();
        let mut bob_link = server.accept().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // then (期待する結果):
        assert_eq!(bob_link.identity(), &user("bob"));
        assert!(bob_link.drain_events().is_empty());
        let stored = session.message(&secret.local_id).unwrap();
        assert_eq!(stored.failure, Some(DeliveryFailure::Cancelled));
        assert!(client.joined_rooms().is_empty());
        assert!(client.session(&private).is_none());
        assert_eq!(client.user_id(), user("bob"));
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
    async fn test_off_all_removes_ui_subscriptions_only() {
        // テスト項目: off_all は on で登録した購読だけを外し、ルームのセッションは受信を続ける
        // given (前提条件):
        let (client, mut server) = client_for("alice");
        client.connect().await.unwrap();
        let link = server.accept().await.unwrap();
        let session = client.join(RoomId::new("r1").unwrap());
        let calls = Arc::new(Mutex::new(0));
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            client.on(EventKind::NewMessage, move |_| *calls.lock().unwrap() += 1);
        }
        let presence = client.on(EventKind::Presence, |_| {});

        // when (操作):
        let removed = client.off_all(EventKind::NewMessage);
        link.send_event(&ServerEvent::NewMessage(NewMessagePayload {
            remote_id: "srv-1".to_string(),
            room_id: RoomId::new("r1").unwrap(),
            sender_id: user("bob"),
            local_id: None,
            text: Some("hello".to_string()),
            attachment: None,
            timestamp: Timestamp::new(1),
        }))
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // then (期待する結果):
        assert_eq!(removed, 2);
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(client.off_all(EventKind::NewMessage), 0);
        assert!(client.off(presence));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_notifies_server_and_closes_session() {
        // テスト項目: leave で leave_room が送られ、ルームのセッションが閉じられる
        // given (前提条件):
        let (client, mut server) = client_for("alice");
        client.connect().await.unwrap();
        let mut link = server.accept().await.unwrap();
        let room = RoomId::new("r1").unwrap();
        client.join(room.clone());
        link.recv_event().await;

        // when (操作):
        let left = client.leave(&room);

        // then (期待する結果):
        assert!(left);
        assert!(!client.is_joined(&room));
        assert_eq!(
            link.recv_event().await,
            Some(ClientEvent::LeaveRoom(RoomPayload { room_id: room.clone() }))
        );
        assert_eq!(
            client.send(&room, Some("late".to_string()), None),
            Err(SendError::NotJoined(room))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_is_ignored_outside_joined_rooms() {
        // テスト項目: 参加していないルームでの入力通知は送られない
        // given (前提条件):
        let (client, mut server) = client_for("alice");
        client.connect().await.unwrap();
        let mut link = server.accept().await.unwrap();

        // when (操作):
        client.notify_typing(&RoomId::new("r9").unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // then (期待する結果):
        assert!(link.drain_events().is_empty());
        assert!(!client.is_remote_typing(&RoomId::new("r9").unwrap()));
    }
}
