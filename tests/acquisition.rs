use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use glucoread::transport::DeviceHandle;
use glucoread::transport::DiscoveryFilter;
use glucoread::transport::Subscription;
use glucoread::transport::Transport;
use glucoread::AcquisitionConfig;
use glucoread::AcquisitionEngine;
use glucoread::AcquisitionError;
use glucoread::ConnectionStatus;
use glucoread::ReadingStore;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Instant;

/// 104 mg/dL at 2024-03-15 08:30:00
const READING_104: &str = "000100e807030f081e0068b0";
/// 126 mg/dL at 2024-03-15 08:35:00
const READING_126: &str = "000200e807030f0823007eb0";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Discover(DiscoveryFilter),
    Connect,
    Subscribe,
    Disconnect,
}

#[derive(Default)]
struct Script {
    advertises_service: bool,
    advertises_name: bool,
    connect_fails: bool,
    subscribe_fails: bool,
    payloads: Vec<Vec<u8>>,
    /// Keep notifications open after the payloads so the dwell window ends the sync
    keep_open: bool,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<(Instant, Call, ConnectionStatus)>,
    open_sender: Option<mpsc::Sender<Vec<u8>>>,
}

/// A transport driven by a fixed script, recording each call with the store's status at that moment.
struct FakeTransport {
    script: Script,
    store: Arc<ReadingStore>,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeTransport {
    fn record(&self, call: Call) {
        let status = self.store.status();
        self.recorded.lock().unwrap().calls.push((Instant::now(), call, status));
    }
}

impl Transport for FakeTransport {
    type Peer = ();

    async fn discover(
        &self,
        filter: &DiscoveryFilter,
        timeout: Duration,
    ) -> Result<DeviceHandle<()>, AcquisitionError> {
        self.record(Call::Discover(filter.clone()));
        let found = match filter {
            DiscoveryFilter::Service(_) => self.script.advertises_service,
            DiscoveryFilter::NameContains(_) => self.script.advertises_name,
        };
        if found {
            Ok(DeviceHandle::new((), "60:77:71:00:00:01", Some("meter 1234".to_string())))
        } else {
            tokio::time::sleep(timeout).await;
            Err(AcquisitionError::DiscoveryTimeout(timeout))
        }
    }

    async fn connect(&self, device: &DeviceHandle<()>, _timeout: Duration) -> Result<(), AcquisitionError> {
        self.record(Call::Connect);
        if self.script.connect_fails {
            return Err(AcquisitionError::Connection {
                device: device.name.clone(),
                source: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        device: &DeviceHandle<()>,
        _service: uuid::Uuid,
        _characteristic: uuid::Uuid,
    ) -> Result<Subscription, AcquisitionError> {
        self.record(Call::Subscribe);
        if self.script.subscribe_fails {
            return Err(AcquisitionError::Subscription {
                device: device.name.clone(),
                source: "characteristic not found".into(),
            });
        }

        let (tx, rx) = mpsc::channel(16);
        for payload in &self.script.payloads {
            tx.try_send(payload.clone()).unwrap();
        }
        if self.script.keep_open {
            self.recorded.lock().unwrap().open_sender = Some(tx);
        }
        Ok(Subscription::new(rx))
    }

    async fn disconnect(&self, _device: &DeviceHandle<()>) -> Result<(), AcquisitionError> {
        self.record(Call::Disconnect);
        Ok(())
    }
}

fn engine(script: Script, capacity: usize) -> (AcquisitionEngine<FakeTransport>, Arc<Mutex<Recorded>>) {
    let store = Arc::new(ReadingStore::new(capacity));
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let transport = FakeTransport {
        script,
        store: store.clone(),
        recorded: recorded.clone(),
    };
    (
        AcquisitionEngine::new(transport, store, AcquisitionConfig::default()),
        recorded,
    )
}

fn calls(recorded: &Mutex<Recorded>) -> Vec<Call> {
    recorded.lock().unwrap().calls.iter().map(|(_, call, _)| call.clone()).collect()
}

fn payload(text: &str) -> Vec<u8> {
    hex::decode(text).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_sync_commits_decoded_readings() {
    let script = Script {
        advertises_service: true,
        payloads: vec![payload(READING_104), payload("00010203"), payload(READING_126)],
        ..Default::default()
    };
    let (engine, recorded) = engine(script, 3);
    let (_stop, mut shutdown) = watch::channel(false);

    let committed = engine.run_cycle(&mut shutdown).await.unwrap();

    assert_eq!(committed, 2);
    let readings = engine.store().snapshot().readings;
    let mgdl: Vec<i32> = readings.iter().map(|r| r.glucose_mgdl()).collect();
    assert_eq!(mgdl, vec![126, 104]);
    assert_eq!(readings[0].timestamp_text(), "2024-03-15 08:35:00");
    assert_eq!(
        calls(&recorded),
        vec![
            Call::Discover(DiscoveryFilter::Service(glucoread::config::GLUCOSE_SERVICE_UUID)),
            Call::Connect,
            Call::Subscribe,
            Call::Disconnect,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_status_follows_the_cycle() {
    let script = Script {
        advertises_service: true,
        ..Default::default()
    };
    let (engine, recorded) = engine(script, 1);
    let (_stop, mut shutdown) = watch::channel(false);

    engine.run_cycle(&mut shutdown).await.unwrap();

    let statuses: Vec<ConnectionStatus> = recorded
        .lock()
        .unwrap()
        .calls
        .iter()
        .map(|(_, _, status)| status.clone())
        .collect();
    assert_eq!(
        statuses,
        vec![
            ConnectionStatus::Scanning,
            ConnectionStatus::Connecting("meter 1234".to_string()),
            ConnectionStatus::WaitingForData,
            ConnectionStatus::WaitingForData,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_name_after_service_scan_times_out() {
    let script = Script {
        advertises_name: true,
        ..Default::default()
    };
    let (engine, recorded) = engine(script, 1);
    let (_stop, mut shutdown) = watch::channel(false);

    engine.run_cycle(&mut shutdown).await.unwrap();

    let recorded = recorded.lock().unwrap();
    let (service_at, service_scan, _) = &recorded.calls[0];
    let (name_at, name_scan, _) = &recorded.calls[1];
    assert!(matches!(service_scan, Call::Discover(DiscoveryFilter::Service(_))));
    assert_eq!(name_scan, &Call::Discover(DiscoveryFilter::NameContains("Accu".to_string())));
    assert_eq!(*name_at - *service_at, Duration::from_secs(5));
    assert_eq!(recorded.calls[2].1, Call::Connect);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_in_range_keeps_scanning() {
    let (engine, recorded) = engine(Script::default(), 1);
    let (_stop, mut shutdown) = watch::channel(false);
    let started = Instant::now();

    let result = engine.run_cycle(&mut shutdown).await;

    assert!(matches!(result, Err(AcquisitionError::DiscoveryTimeout(timeout)) if timeout == Duration::from_secs(2)));
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(engine.store().status(), ConnectionStatus::Scanning);
    assert_eq!(calls(&recorded).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_returns_to_scanning_after_idle_delay() {
    let script = Script {
        advertises_service: true,
        connect_fails: true,
        ..Default::default()
    };
    let (engine, recorded) = engine(script, 1);
    let store = engine.store().clone();
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(engine.run(shutdown));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(store.status(), ConnectionStatus::Error(text) if text.contains("connection refused")));

    tokio::time::sleep(Duration::from_secs(5)).await;
    stop.send(true).unwrap();
    running.await.unwrap();

    let recorded = recorded.lock().unwrap();
    let connects: Vec<Instant> = recorded
        .calls
        .iter()
        .filter(|(_, call, _)| *call == Call::Connect)
        .map(|(at, _, _)| *at)
        .collect();
    let scans: Vec<(Instant, ConnectionStatus)> = recorded
        .calls
        .iter()
        .filter(|(_, call, _)| matches!(call, Call::Discover(_)))
        .map(|(at, _, status)| (*at, status.clone()))
        .collect();

    assert!(connects.len() >= 2);
    assert!(scans.iter().all(|(_, status)| *status == ConnectionStatus::Scanning));
    assert_eq!(scans[1].0 - connects[0], Duration::from_secs(2));
    assert!(!calls_contain(&recorded.calls, Call::Subscribe));
}

fn calls_contain(calls: &[(Instant, Call, ConnectionStatus)], wanted: Call) -> bool {
    calls.iter().any(|(_, call, _)| *call == wanted)
}

#[tokio::test(start_paused = true)]
async fn test_subscription_failure_still_disconnects() {
    let script = Script {
        advertises_service: true,
        subscribe_fails: true,
        ..Default::default()
    };
    let (engine, recorded) = engine(script, 1);
    let (_stop, mut shutdown) = watch::channel(false);

    let result = engine.run_cycle(&mut shutdown).await;

    assert!(matches!(result, Err(AcquisitionError::Subscription { .. })));
    assert_eq!(calls(&recorded).last(), Some(&Call::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn test_dwell_window_bounds_the_sync() {
    let script = Script {
        advertises_service: true,
        payloads: vec![payload(READING_104)],
        keep_open: true,
        ..Default::default()
    };
    let (engine, recorded) = engine(script, 1);
    let (_stop, mut shutdown) = watch::channel(false);
    let started = Instant::now();

    let committed = engine.run_cycle(&mut shutdown).await.unwrap();

    assert_eq!(committed, 1);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(calls(&recorded).last(), Some(&Call::Disconnect));
    let sender = recorded.lock().unwrap().open_sender.take().unwrap();
    assert!(sender.is_closed(), "unsubscribed after the dwell window");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_dwell_early_and_disconnects() {
    let script = Script {
        advertises_service: true,
        keep_open: true,
        ..Default::default()
    };
    let (engine, recorded) = engine(script, 1);
    let (stop, shutdown) = watch::channel(false);
    let started = Instant::now();
    let running = tokio::spawn(engine.run(shutdown));

    tokio::time::sleep(Duration::from_secs(3)).await;
    stop.send(true).unwrap();
    running.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(calls(&recorded).last(), Some(&Call::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_payload_is_dropped() {
    let (engine, _recorded) = engine(Script::default(), 1);

    assert!(!engine.handle_notification(&[0x00, 0x01, 0x00]));
    assert!(engine.store().snapshot().readings.is_empty());

    assert!(engine.handle_notification(&payload(READING_104)));
    assert_eq!(engine.store().latest().map(|r| r.glucose_mgdl()), Some(104));
}
