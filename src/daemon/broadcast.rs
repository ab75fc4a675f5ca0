//! Update broadcaster: fans update events out to every open connection.
//!
//! Fire-and-forget: there are no acknowledgements or retries. A client
//! that is not open when an event goes out simply misses it and picks up
//! the current state from a fresh bootstrap page.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, warn};

use super::protocol::UpdateEvent;
use crate::error::HotpackError;

/// What a connection-level error does to the dev session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocketErrorPolicy {
    /// Any connection error is fatal to the whole session.
    #[default]
    FailFast,
    /// Only the failing connection is dropped.
    Isolate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Open => 0,
            ConnectionState::Closing => 1,
            ConnectionState::Closed => 2,
        }
    }
}

/// One open socket to one browser.
pub struct ClientConnection {
    pub conn_id: u64,
    /// Channel feeding this connection's write loop.
    sender: mpsc::UnboundedSender<String>,
    state: AtomicU8,
    pub connected_at: Instant,
}

impl ClientConnection {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a serialized frame. Returns `false` if the write loop is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("conn_id", &self.conn_id)
            .field("state", &self.state())
            .finish()
    }
}

pub struct Broadcaster {
    clients: RwLock<HashMap<u64, Arc<ClientConnection>>>,
    next_id: AtomicU64,
    policy: SocketErrorPolicy,
    client_side_logs: bool,
    fatal: mpsc::UnboundedSender<HotpackError>,
}

impl Broadcaster {
    /// Create a broadcaster and the receiver on which fatal socket errors
    /// are reported under [`SocketErrorPolicy::FailFast`].
    pub fn new(
        policy: SocketErrorPolicy,
        client_side_logs: bool,
    ) -> (Self, mpsc::UnboundedReceiver<HotpackError>) {
        let (fatal, fatal_rx) = mpsc::unbounded_channel();
        (
            Self {
                clients: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                policy,
                client_side_logs,
                fatal,
            },
            fatal_rx,
        )
    }

    /// Register a new connection whose frames go to `sender`.
    ///
    /// Connections that closed since the last registration are pruned here
    /// rather than at disconnect time.
    pub async fn on_connect(&self, sender: mpsc::UnboundedSender<String>) -> Arc<ClientConnection> {
        let conn = Arc::new(ClientConnection {
            conn_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sender,
            state: AtomicU8::new(ConnectionState::Open.as_u8()),
            connected_at: Instant::now(),
        });

        let mut clients = self.clients.write().await;
        clients.retain(|_, c| c.state() != ConnectionState::Closed);
        clients.insert(conn.conn_id, Arc::clone(&conn));
        debug!(conn_id = conn.conn_id, clients = clients.len(), "client connected");
        conn
    }

    pub fn on_disconnect(&self, conn: &ClientConnection) {
        conn.set_state(ConnectionState::Closed);
        debug!(conn_id = conn.conn_id, "client disconnected");
    }

    /// Apply the socket error policy to a failing connection.
    pub fn on_error(&self, conn: &ClientConnection, reason: &str) {
        conn.set_state(ConnectionState::Closed);
        match self.policy {
            SocketErrorPolicy::FailFast => {
                error!(conn_id = conn.conn_id, error = %reason, "socket error, shutting down");
                let _ = self.fatal.send(HotpackError::Socket(reason.to_string()));
            }
            SocketErrorPolicy::Isolate => {
                warn!(conn_id = conn.conn_id, error = %reason, "socket error, dropping connection");
            }
        }
    }

    /// Serialize `event` and send it to every open connection.
    /// Returns how many connections it was queued for.
    pub async fn broadcast(&self, event: &UpdateEvent) -> usize {
        if event.is_client_log() && !self.client_side_logs {
            return 0;
        }

        let json = match event.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize update event");
                return 0;
            }
        };

        let clients = self.clients.read().await;
        debug!(kind = event.kind(), clients = clients.len(), "broadcasting");

        let mut delivered = 0;
        for client in clients.values() {
            if !client.is_open() {
                continue;
            }
            if client.send(&json) {
                delivered += 1;
            } else {
                client.set_state(ConnectionState::Closed);
            }
        }
        delivered
    }

    /// Close and forget every connection. Dropping the senders ends each
    /// connection's write loop.
    pub async fn close_all(&self) -> usize {
        let mut clients = self.clients.write().await;
        for client in clients.values() {
            client.set_state(ConnectionState::Closed);
        }
        let closed = clients.len();
        clients.clear();
        closed
    }

    pub async fn open_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.is_open()).count()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
