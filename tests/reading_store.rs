use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use glucoread::ConnectionStatus;
use glucoread::PersistenceSink;
use glucoread::Reading;
use glucoread::ReadingStore;
use glucoread::SinkError;

fn at_minute(minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(8, minute % 60, 0)
        .unwrap()
}

#[derive(Default)]
struct RecordingSink {
    persisted: Mutex<Vec<Reading>>,
    calls: AtomicUsize,
}

impl PersistenceSink for RecordingSink {
    fn persist(&self, reading: &Reading) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.persisted.lock().unwrap().push(*reading);
        Ok(())
    }
}

struct FailingSink;

impl PersistenceSink for FailingSink {
    fn persist(&self, _reading: &Reading) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

#[test]
fn test_commit_calls_sink_once() {
    let sink = Arc::new(RecordingSink::default());
    let store = ReadingStore::default().with_sink(sink.clone());

    let reading = Reading::from_mgdl(at_minute(30), 104);
    store.commit_reading(reading);

    assert_eq!(*sink.persisted.lock().unwrap(), vec![reading]);
}

#[test]
fn test_restore_does_not_persist() {
    let sink = Arc::new(RecordingSink::default());
    let store = ReadingStore::default().with_sink(sink.clone());

    store.restore([Reading::from_mgdl(at_minute(30), 104)]);

    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.latest().map(|r| r.glucose_mgdl()), Some(104));
}

#[test]
fn test_sink_failure_does_not_affect_commit() {
    let store = ReadingStore::default().with_sink(Arc::new(FailingSink));
    store.commit_reading(Reading::from_mgdl(at_minute(30), 104));
    assert_eq!(store.latest().map(|r| r.glucose_mgdl()), Some(104));
}

#[test]
fn test_concurrent_commits_and_snapshots() {
    const WRITERS: usize = 4;
    const COMMITS: usize = 500;

    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(ReadingStore::new(5).with_sink(sink.clone()));

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..COMMITS {
                    let mgdl = 40 + ((writer * COMMITS + i) % 460) as i32;
                    store.commit_reading(Reading::from_mgdl(at_minute(i as u32), mgdl));
                    if i % 50 == 0 {
                        store.set_status(ConnectionStatus::WaitingForData);
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..COMMITS {
                    let snapshot = store.snapshot();
                    assert!(snapshot.readings.len() <= 5);
                    for reading in snapshot.readings {
                        let derived = Reading::from_mgdl(reading.timestamp(), reading.glucose_mgdl());
                        assert_eq!(reading.glucose_mmol_tenths(), derived.glucose_mmol_tenths());
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    assert_eq!(sink.calls.load(Ordering::SeqCst), WRITERS * COMMITS);
    assert_eq!(store.snapshot().readings.len(), 5);
}

#[test]
fn test_sink_sees_commits_in_store_order() {
    const WRITERS: usize = 8;
    const COMMITS: usize = 200;

    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(ReadingStore::new(WRITERS * COMMITS).with_sink(sink.clone()));

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..COMMITS {
                    let mgdl = (writer * COMMITS + i) as i32;
                    store.commit_reading(Reading::from_mgdl(at_minute(i as u32), mgdl));
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }

    let persisted = sink.persisted.lock().unwrap().clone();
    let mut stored = store.snapshot().readings;
    stored.reverse();
    assert_eq!(persisted, stored);
    assert_eq!(persisted.last().copied(), store.latest());
}
