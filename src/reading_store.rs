use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use serde::Serialize;
use serde::Serializer;

use crate::glucose_reading::Reading;
use crate::persistence::PersistenceSink;

/// What the acquisition engine is doing right now, as shown to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Initializing,
    Scanning,
    Connecting(String),
    WaitingForData,
    Error(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing..."),
            Self::Scanning => write!(f, "Scanning..."),
            Self::Connecting(name) => write!(f, "Connecting to {name}..."),
            Self::WaitingForData => write!(f, "Connected! Waiting for Data..."),
            Self::Error(text) => write!(f, "Error: {text}"),
        }
    }
}

impl Serialize for ConnectionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A consistent copy of the store's contents. Readings are most recent first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub readings: Vec<Reading>,
}

#[derive(Debug)]
struct State {
    status: ConnectionStatus,
    readings: VecDeque<Reading>,
}

/// The latest connection status and the most recent readings, shared between
/// the acquisition engine (the only writer) and any number of readers.
pub struct ReadingStore {
    state: RwLock<State>,
    capacity: usize,
    sink: Option<Arc<dyn PersistenceSink>>,
}

impl ReadingStore {
    /// Keep the single most recent reading.
    pub const DEFAULT_CAPACITY: usize = 1;

    /// Create a store which retains up to `capacity` readings (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(State {
                status: ConnectionStatus::Initializing,
                readings: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            sink: None,
        }
    }

    /// Hand every committed reading to `sink` as well.
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Seed the store with previously persisted readings, most recent first.
    ///
    /// Restored readings are not passed to the sink again.
    pub fn restore(&self, readings: impl IntoIterator<Item = Reading>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.readings = readings.into_iter().take(self.capacity).collect();
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        tracing::debug!(%status, "status");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.status = status;
    }

    /// Record a new reading and pass it on to the persistence sink.
    ///
    /// The sink is called while the write lock is held, so it sees readings in
    /// the same order as the store. A sink failure is logged and otherwise ignored.
    pub fn commit_reading(&self, reading: Reading) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.readings.push_front(reading);
        state.readings.truncate(self.capacity);

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.persist(&reading) {
                tracing::warn!(%err, "failed to persist reading");
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            status: state.status.clone(),
            readings: state.readings.iter().copied().collect(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.read().unwrap_or_else(PoisonError::into_inner).status.clone()
    }

    pub fn latest(&self) -> Option<Reading> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .readings
            .front()
            .copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
fn reading(mgdl: i32) -> Reading {
    let timestamp = chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap();
    Reading::from_mgdl(timestamp, mgdl)
}

#[test]
fn test_new_store_is_initializing_and_empty() {
    let store = ReadingStore::default();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Initializing);
    assert!(snapshot.readings.is_empty());
}

#[test]
fn test_default_keeps_only_latest() {
    let store = ReadingStore::default();
    store.commit_reading(reading(100));
    store.commit_reading(reading(120));
    assert_eq!(store.snapshot().readings, vec![reading(120)]);
}

#[test]
fn test_most_recent_first() {
    let store = ReadingStore::new(3);
    for mgdl in [100, 110, 120, 130] {
        store.commit_reading(reading(mgdl));
    }
    assert_eq!(
        store.snapshot().readings,
        vec![reading(130), reading(120), reading(110)]
    );
    assert_eq!(store.latest(), Some(reading(130)));
}

#[test]
fn test_restore_respects_capacity() {
    let store = ReadingStore::new(2);
    store.restore([reading(130), reading(120), reading(110)]);
    assert_eq!(store.snapshot().readings, vec![reading(130), reading(120)]);
}

#[test]
fn test_zero_capacity_still_keeps_one() {
    let store = ReadingStore::new(0);
    store.commit_reading(reading(100));
    assert_eq!(store.capacity(), 1);
    assert_eq!(store.latest(), Some(reading(100)));
}

#[test]
fn test_status_text() {
    assert_eq!(ConnectionStatus::Scanning.to_string(), "Scanning...");
    assert_eq!(
        ConnectionStatus::Connecting("Accu-Chek".to_string()).to_string(),
        "Connecting to Accu-Chek..."
    );
    assert_eq!(
        ConnectionStatus::WaitingForData.to_string(),
        "Connected! Waiting for Data..."
    );
}

#[test]
fn test_snapshot_json() {
    let store = ReadingStore::default();
    store.set_status(ConnectionStatus::Scanning);
    store.commit_reading(reading(104));
    assert_eq!(
        serde_json::to_value(store.snapshot()).unwrap(),
        serde_json::json!({
            "status": "Scanning...",
            "readings": [{"timestamp": "2024-03-15 08:30:00", "mgdl": 104, "mmol": 5.8}],
        })
    );
}
