//! Channel history: an opaque ordered log with push and range-read,
//! replayed to joining connections.
//!
//! Backed by Redis lists in production and an in-memory map in tests.
//! History is a convenience, not a correctness requirement: a failed append
//! never blocks the publish path and a failed read yields an empty replay,
//! not a join failure.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::connections::ConnectionHandle;

/// A history append or range-read failure.
#[derive(Debug)]
pub struct LogError {
    message: String,
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LogError {}

impl From<redis::RedisError> for LogError {
    fn from(err: redis::RedisError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Ordered append/range-read store for per-channel message history.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(&self, channel: &str, entry: &str) -> Result<(), LogError>;
    /// The most recent `limit` entries for `channel`, oldest first.
    async fn recent(&self, channel: &str, limit: usize) -> Result<Vec<String>, LogError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

pub struct RedisHistory {
    conn: redis::aio::ConnectionManager,
}

impl RedisHistory {
    pub async fn connect(url: &str) -> Result<Self, LogError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn key(channel: &str) -> String {
        format!("chorus:history:{channel}")
    }
}

#[async_trait]
impl HistoryLog for RedisHistory {
    async fn append(&self, channel: &str, entry: &str) -> Result<(), LogError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(Self::key(channel), entry).await?;
        Ok(())
    }

    async fn recent(&self, channel: &str, limit: usize) -> Result<Vec<String>, LogError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        // LPUSH stores newest-first; reverse so the replay runs oldest-first.
        let mut entries: Vec<String> = conn
            .lrange(Self::key(channel), 0, limit as isize - 1)
            .await?;
        entries.reverse();
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and single-node mode)
// ---------------------------------------------------------------------------

pub struct MemoryHistory {
    data: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryLog for MemoryHistory {
    async fn append(&self, channel: &str, entry: &str) -> Result<(), LogError> {
        self.data
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(entry.to_string());
        Ok(())
    }

    async fn recent(&self, channel: &str, limit: usize) -> Result<Vec<String>, LogError> {
        let data = self.data.lock().unwrap();
        let entries = match data.get(channel) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Fetches and replays channel history to joining connections.
pub struct HistoryService {
    log: Arc<dyn HistoryLog>,
    limit: usize,
}

impl HistoryService {
    pub fn new(log: Arc<dyn HistoryLog>, limit: usize) -> Self {
        Self { log, limit }
    }

    pub async fn append(&self, channel: &str, entry: &str) -> Result<(), LogError> {
        self.log.append(channel, entry).await
    }

    /// Replays up to `limit` entries to `conn`, oldest first. Returns the
    /// number of entries sent. A failed range-read degrades to an empty
    /// replay.
    pub async fn replay(&self, conn: &ConnectionHandle, channel: &str) -> usize {
        let entries = match self.log.recent(channel, self.limit).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(%channel, %err, "history read failed; replaying nothing");
                return 0;
            }
        };

        let mut sent = 0;
        for entry in entries {
            if let Err(err) = conn.send(Arc::new(entry)) {
                tracing::debug!(conn_id = %conn.id(), %channel, %err, "history replay cut short");
                break;
            }
            sent += 1;
        }
        sent
    }
}
