//! In-process transport.
//!
//! The test (or any embedding application) plays the server through a
//! [`ServerPeer`]: it accepts links, reads the client's frames, injects
//! server frames and drops links to simulate network loss. Connect attempts
//! can be scripted to fail or hang.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::UserId,
    infrastructure::{
        dto::wire::{ClientEvent, ServerEvent},
        error::TransportError,
    },
};

use super::{Connector, Transport};

/// What the next connect attempt does
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// Hand out a fresh link (the default once the script is empty)
    Accept,
    /// Fail with the given error
    Fail(TransportError),
    /// Never complete
    Hang,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<ConnectScript>,
    attempts: usize,
}

/// Client side factory of in-memory links
#[derive(Clone)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    accepted: mpsc::UnboundedSender<ServerLink>,
}

impl MemoryConnector {
    /// Create a connector together with the server side handle
    pub fn new() -> (Self, ServerPeer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let script = Arc::new(Mutex::new(Script::default()));
        let connector = Self {
            script: Arc::clone(&script),
            accepted: accepted_tx,
        };
        let peer = ServerPeer {
            script,
            accepted: accepted_rx,
        };
        (connector, peer)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, identity: &UserId) -> Result<Box<dyn Transport>, TransportError> {
        let step = {
            let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
            script.attempts += 1;
            script.steps.pop_front().unwrap_or(ConnectScript::Accept)
        };

        match step {
            ConnectScript::Accept => {}
            ConnectScript::Fail(error) => return Err(error),
            ConnectScript::Hang => std::future::pending::<()>().await,
        }

        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let link = ServerLink {
            identity: identity.clone(),
            from_client: to_server_rx,
            to_client: to_client_tx,
        };
        self.accepted
            .send(link)
            .map_err(|_| TransportError::Unreachable("memory server is gone".to_string()))?;

        Ok(Box::new(MemoryTransport {
            outbound: to_server_tx,
            inbound: to_client_rx,
        }))
    }
}

struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inbound.close();
        Ok(())
    }
}

/// Server side of a [`MemoryConnector`]
pub struct ServerPeer {
    script: Arc<Mutex<Script>>,
    accepted: mpsc::UnboundedReceiver<ServerLink>,
}

impl ServerPeer {
    /// Queue the outcome of upcoming connect attempts, in order
    pub fn script_connects(&self, steps: impl IntoIterator<Item = ConnectScript>) {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.steps.extend(steps);
    }

    /// Number of connect attempts seen so far
    pub fn connect_attempts(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .attempts
    }

    /// Wait for the client to open the next link
    pub async fn accept(&mut self) -> Option<ServerLink> {
        self.accepted.recv().await
    }
}

/// Server side of one link; dropping it (or [`ServerLink::drop_link`]) cuts
/// the connection as seen by the client
pub struct ServerLink {
    identity: UserId,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl ServerLink {
    /// Identity presented when the link was opened
    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Next raw frame written by the client
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next client frame, decoded; undecodable frames are skipped
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        loop {
            let frame = self.from_client.recv().await?;
            match serde_json::from_str(&frame) {
                Ok(event) => return Some(event),
                Err(e) => tracing::warn!(error = %e, %frame, "memory server skipped a frame"),
            }
        }
    }

    /// Client frames already written, without waiting
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            if let Ok(event) = serde_json::from_str(&frame) {
                events.push(event);
            }
        }
        events
    }

    /// Deliver a server event to the client
    pub fn send_event(&self, event: &ServerEvent) -> Result<(), TransportError> {
        let frame = event
            .encode()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.send_raw(frame)
    }

    /// Deliver an arbitrary text frame to the client
    pub fn send_raw(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(frame.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Simulate an abrupt network drop
    pub fn drop_link(self) {}
}
