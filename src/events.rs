//! Engine-to-UI contract: segment mutation events, progress counters,
//! and a bounded log ring buffer. Subscribers re-read through these
//! channels; nothing here is authoritative state.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::store::SegmentStatus;

/// Maximum retained log records; older entries are dropped.
pub const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SegmentEvent {
    pub id: String,
    pub status: SegmentStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectStats {
    pub total: usize,
    pub translated: usize,
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Bounded ring of log records with a live broadcast feed. Slow or
/// absent subscribers never block the engine; broadcast drops their
/// backlog instead.
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogRecord>>,
    tx: broadcast::Sender<LogRecord>,
}

impl LogBuffer {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_CAPACITY);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
            tx,
        }
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        let record = LogRecord {
            level,
            message: message.into(),
            timestamp_ms: epoch_ms(),
        };

        {
            let mut entries = self.entries.lock().expect("log buffer lock poisoned");
            if entries.len() == LOG_CAPACITY {
                entries.pop_front();
            }
            entries.push_back(record.clone());
        }

        let _ = self.tx.send(record);
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.entries
            .lock()
            .expect("log buffer lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
