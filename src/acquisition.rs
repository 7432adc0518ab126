//! The acquisition cycle: scan for the meter, connect, subscribe to glucose
//! measurements, collect whatever the meter pushes during the dwell window,
//! disconnect, and start over.
//!
//! Nothing the peer does ends the loop. Every transport failure is logged,
//! published as the status and followed by a fresh scan after the idle delay.
//! Only the shutdown signal stops it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::AcquisitionConfig;
use crate::error::AcquisitionError;
use crate::message::GlucoseMeasurement;
use crate::reading_store::ConnectionStatus;
use crate::reading_store::ReadingStore;
use crate::transport::DeviceHandle;
use crate::transport::DiscoveryFilter;
use crate::transport::Transport;

/// How many leading payload bytes to log when a notification fails to decode
const LOGGED_PAYLOAD_BYTES: usize = 16;

pub struct AcquisitionEngine<T: Transport> {
    transport: T,
    store: Arc<ReadingStore>,
    config: AcquisitionConfig,
}

impl<T: Transport> AcquisitionEngine<T> {
    pub fn new(transport: T, store: Arc<ReadingStore>, config: AcquisitionConfig) -> Self {
        Self {
            transport,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<ReadingStore> {
        &self.store
    }

    /// Run acquisition cycles until `shutdown` turns `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("glucose acquisition started");

        while !*shutdown.borrow() {
            match self.run_cycle(&mut shutdown).await {
                Ok(committed) => tracing::info!(committed, "sync complete"),
                Err(AcquisitionError::DiscoveryTimeout(_)) => tracing::debug!("no glucose meter in range"),
                Err(err) => {
                    tracing::warn!(%err, "acquisition cycle failed");
                    self.store.set_status(ConnectionStatus::Error(err.to_string()));
                }
            }

            tokio::select! {
                _ = sleep(self.config.idle_delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        tracing::info!("glucose acquisition stopped");
    }

    /// One pass from scanning to disconnecting. Returns the number of readings committed.
    ///
    /// A shutdown request ends the dwell window early; the meter is still disconnected.
    pub async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<usize, AcquisitionError> {
        self.store.set_status(ConnectionStatus::Scanning);
        let device = self.discover().await?;

        tracing::info!(device = %device.name, id = %device.id, "found glucose meter, connecting");
        self.store.set_status(ConnectionStatus::Connecting(device.name.clone()));
        self.transport
            .connect(&device, self.config.connect_timeout)
            .await?;

        let result = self.sync(&device, shutdown).await;

        if let Err(err) = self.transport.disconnect(&device).await {
            tracing::warn!(%err, device = %device.name, "failed to disconnect");
        }

        result
    }

    /// Look for the glucose service first, then fall back to the advertised name.
    async fn discover(&self) -> Result<DeviceHandle<T::Peer>, AcquisitionError> {
        let by_service = DiscoveryFilter::Service(self.config.service_uuid);
        match self
            .transport
            .discover(&by_service, self.config.service_scan_timeout)
            .await
        {
            Err(AcquisitionError::DiscoveryTimeout(_)) => {}
            found => return found,
        }

        tracing::debug!(hint = %self.config.name_hint, "glucose service not advertised, trying name");
        let by_name = DiscoveryFilter::NameContains(self.config.name_hint.clone());
        self.transport
            .discover(&by_name, self.config.name_scan_timeout)
            .await
    }

    async fn sync(
        &self,
        device: &DeviceHandle<T::Peer>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<usize, AcquisitionError> {
        self.store.set_status(ConnectionStatus::WaitingForData);
        let mut subscription = self
            .transport
            .subscribe(device, self.config.service_uuid, self.config.measurement_uuid)
            .await?;
        tracing::info!(device = %device.name, "subscribed, waiting for data");

        let mut committed = 0;
        let dwell = sleep(self.config.dwell);
        tokio::pin!(dwell);

        loop {
            tokio::select! {
                _ = &mut dwell => break,
                _ = shutdown_requested(shutdown) => break,
                payload = subscription.next_payload() => match payload {
                    Some(payload) => {
                        if self.handle_notification(&payload) {
                            committed += 1;
                        }
                    }
                    None => {
                        tracing::debug!(device = %device.name, "notifications ended");
                        break;
                    }
                },
            }
        }

        subscription.unsubscribe();
        Ok(committed)
    }

    /// Decode and commit one notification. A payload that fails to decode is dropped.
    pub fn handle_notification(&self, payload: &[u8]) -> bool {
        let decoded = GlucoseMeasurement::parse(payload)
            .and_then(|measurement| Ok((measurement.sequence_number, measurement.to_reading()?)));

        match decoded {
            Ok((sequence_number, reading)) => {
                tracing::info!(
                    sequence_number,
                    mgdl = reading.glucose_mgdl(),
                    mmol = %reading.glucose_mmol_text(),
                    timestamp = %reading.timestamp_text(),
                    "new reading"
                );
                self.store.commit_reading(reading);
                true
            }
            Err(err) => {
                let head = &payload[..payload.len().min(LOGGED_PAYLOAD_BYTES)];
                tracing::warn!(%err, len = payload.len(), head = %hex::encode(head), "dropping glucose measurement");
                false
            }
        }
    }
}

/// Resolves once `shutdown` is `true`. Never resolves if the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::test]
async fn test_shutdown_requested() {
    let (tx, mut rx) = watch::channel(false);
    let waiter = tokio::spawn(async move { shutdown_requested(&mut rx).await });
    tx.send(true).unwrap();
    waiter.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_never_fires_without_sender() {
    let (tx, mut rx) = watch::channel(false);
    drop(tx);
    let waited = tokio::time::timeout(std::time::Duration::from_secs(60), shutdown_requested(&mut rx)).await;
    assert!(waited.is_err());
}
