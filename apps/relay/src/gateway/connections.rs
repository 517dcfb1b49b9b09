//! Connection-handle table.
//!
//! The relay core never owns a socket. Each WebSocket connection is
//! represented by a [`ConnectionHandle`] whose bounded channel feeds the
//! connection's writer task; the channel registry refers to connections by
//! ID only and resolves them here at dispatch time.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Capacity of a connection's outbound queue. A client that falls this far
/// behind starts losing messages rather than stalling the fanout.
pub const OUTBOUND_BUFFER: usize = 256;

/// Why a send to a connection failed. Failures are isolated per connection
/// and never unwind the subscription — removal only happens on close or an
/// explicit leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The writer task is gone; the connection is closing.
    Closed,
    /// The outbound queue is full (slow client).
    Backpressure,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "connection closed"),
            SendError::Backpressure => write!(f, "outbound queue full"),
        }
    }
}

impl std::error::Error for SendError {}

/// Send capability for one connection.
pub struct ConnectionHandle {
    id: String,
    tx: mpsc::Sender<Arc<String>>,
}

impl ConnectionHandle {
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a payload for the writer task. Never blocks: registry and
    /// fanout code runs under locks and must not suspend.
    pub fn send(&self, payload: Arc<String>) -> Result<(), SendError> {
        self.tx.try_send(payload).map_err(|err| match err {
            TrySendError::Closed(_) => SendError::Closed,
            TrySendError::Full(_) => SendError::Backpressure,
        })
    }
}

/// All live connections on this process, keyed by connection ID.
pub struct ConnectionRegistry {
    inner: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn add(&self, handle: Arc<ConnectionHandle>) {
        self.inner.insert(handle.id().to_string(), handle);
    }

    pub fn remove(&self, conn_id: &str) {
        self.inner.remove(conn_id);
    }

    pub fn get(&self, conn_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.inner.get(conn_id).map(|entry| Arc::clone(&entry))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
