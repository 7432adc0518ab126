//! Durable storage of committed readings in a small CSV file.
//!
//! The file always holds a header and the most recent readings, newest first.
//! It is rewritten as a whole on each commit by a background task, so handing a
//! reading to the sink never waits on the disk.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device_time::DeviceTime;
use crate::error::SinkError;
use crate::glucose_reading::Reading;

/// Receives every reading committed to the store.
///
/// Implementations must return promptly. The caller only logs a failure.
pub trait PersistenceSink: Send + Sync {
    fn persist(&self, reading: &Reading) -> Result<(), SinkError>;
}

const HEADER: &str = "Timestamp,Glucose (mg/dL),Glucose (mmol/L)";

/// A sink that keeps the latest readings in a CSV file.
pub struct CsvFileSink {
    tx: mpsc::UnboundedSender<Reading>,
}

impl CsvFileSink {
    /// Start the writer task. `seed` is what the file currently holds, most recent first.
    ///
    /// The task ends once the sink is dropped and every queued reading is written.
    pub fn spawn(path: impl Into<PathBuf>, keep: usize, seed: Vec<Reading>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let keep = keep.max(1);
        let rows: VecDeque<Reading> = seed.into_iter().take(keep).collect();
        let writer = tokio::spawn(Self::write_loop(path.into(), keep, rows, rx));
        (Self { tx }, writer)
    }

    async fn write_loop(
        path: PathBuf,
        keep: usize,
        mut rows: VecDeque<Reading>,
        mut rx: mpsc::UnboundedReceiver<Reading>,
    ) {
        while let Some(reading) = rx.recv().await {
            rows.push_front(reading);
            rows.truncate(keep);

            let text = render(rows.iter());
            match tokio::fs::write(&path, text).await {
                Ok(()) => tracing::info!(
                    mgdl = reading.glucose_mgdl(),
                    path = %path.display(),
                    "saved reading"
                ),
                Err(err) => tracing::error!(%err, path = %path.display(), "failed to write readings file"),
            }
        }
    }
}

impl PersistenceSink for CsvFileSink {
    fn persist(&self, reading: &Reading) -> Result<(), SinkError> {
        self.tx.send(*reading).map_err(|_| SinkError::Closed)
    }
}

/// Load readings from `path`. A missing file holds no readings.
pub async fn load(path: &Path) -> Result<Vec<Reading>, SinkError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => parse(&text),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

pub fn render<'a>(readings: impl IntoIterator<Item = &'a Reading>) -> String {
    let mut text = String::from(HEADER);
    text.push('\n');
    for reading in readings {
        text.push_str(&format!(
            "{},{},{}\n",
            reading.timestamp_text(),
            reading.glucose_mgdl(),
            reading.glucose_mmol_text()
        ));
    }
    text
}

pub fn parse(text: &str) -> Result<Vec<Reading>, SinkError> {
    let mut lines = text.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());

    match lines.next() {
        None => return Ok(Vec::new()),
        Some((_, header)) if header.trim() == HEADER => {}
        Some((n, _)) => return Err(malformed(n, "unexpected header")),
    }

    lines.map(|(n, line)| parse_row(n, line)).collect()
}

fn parse_row(n: usize, line: &str) -> Result<Reading, SinkError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [timestamp, mgdl, mmol] = fields.as_slice() else {
        return Err(malformed(n, "expected 3 fields"));
    };

    let timestamp: DeviceTime = timestamp
        .parse()
        .map_err(|err| malformed(n, &format!("timestamp: {err}")))?;
    let mgdl: i32 = mgdl
        .parse()
        .map_err(|err| malformed(n, &format!("mg/dL: {err}")))?;
    let mmol: f64 = mmol
        .parse()
        .map_err(|err| malformed(n, &format!("mmol/L: {err}")))?;
    let mmol_tenths = (mmol * 10.0).round() as i32;

    Reading::restore(timestamp, mgdl, mmol_tenths)
        .ok_or_else(|| malformed(n, "mg/dL and mmol/L disagree"))
}

fn malformed(index: usize, reason: &str) -> SinkError {
    SinkError::Malformed {
        line: index + 1,
        reason: reason.to_string(),
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

#[cfg(test)]
fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("glucoread-{}-{name}.csv", std::process::id()))
}

#[test]
fn test_render() {
    assert_eq!(
        render(&[reading(104)]),
        "Timestamp,Glucose (mg/dL),Glucose (mmol/L)\n2024-03-15 08:30:00,104,5.8\n"
    );
}

#[test]
fn test_parse() {
    let text = "Timestamp,Glucose (mg/dL),Glucose (mmol/L)\r\n2024-03-15 08:30:00,104,5.8\r\n2024-03-15 08:30:00,126,7.0\r\n";
    assert_eq!(parse(text).unwrap(), vec![reading(104), reading(126)]);
}

#[test]
fn test_unset_clock_survives_reload() {
    let unset = Reading::from_mgdl(DeviceTime::from_le_bytes([0; 7]), 104);
    let text = render(&[unset]);
    assert_eq!(text.lines().nth(1), Some("0000-00-00 00:00:00,104,5.8"));
    assert_eq!(parse(&text).unwrap(), vec![unset]);
}

#[test]
fn test_parse_empty() {
    assert!(parse("").unwrap().is_empty());
    assert!(parse("Timestamp,Glucose (mg/dL),Glucose (mmol/L)\n").unwrap().is_empty());
}

#[test]
fn test_parse_inconsistent_units() {
    let text = "Timestamp,Glucose (mg/dL),Glucose (mmol/L)\n2024-03-15 08:30:00,104,9.9\n";
    assert!(matches!(parse(text), Err(SinkError::Malformed { line: 2, .. })));
}

#[test]
fn test_parse_bad_header() {
    assert!(matches!(parse("when,what\n"), Err(SinkError::Malformed { line: 1, .. })));
}

#[test]
fn test_parse_bad_row() {
    let text = "Timestamp,Glucose (mg/dL),Glucose (mmol/L)\n2024-03-15 08:30:00,104\n";
    assert!(matches!(parse(text), Err(SinkError::Malformed { line: 2, .. })));
}

#[tokio::test]
async fn test_load_missing_file() {
    let path = temp_path("missing");
    let _ = tokio::fs::remove_file(&path).await;
    assert!(load(&path).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sink_writes_latest_readings() {
    let path = temp_path("sink");
    let (sink, writer) = CsvFileSink::spawn(&path, 2, vec![reading(90)]);
    sink.persist(&reading(104)).unwrap();
    sink.persist(&reading(126)).unwrap();
    drop(sink);
    writer.await.unwrap();

    assert_eq!(load(&path).await.unwrap(), vec![reading(126), reading(104)]);
    tokio::fs::remove_file(&path).await.unwrap();
}

#[tokio::test]
async fn test_sink_after_writer_stopped() {
    let (sink, writer) = CsvFileSink::spawn(temp_path("aborted"), 1, Vec::new());
    writer.abort();
    let _ = writer.await;
    assert!(matches!(sink.persist(&reading(104)), Err(SinkError::Closed)));
}
