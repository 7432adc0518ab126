//! [`Transport`] over the host's default Bluetooth adapter, using `bluest`.

use std::time::Duration;

use anyhow::anyhow;
use bluest::Adapter;
use bluest::Device;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::AcquisitionError;
use crate::error::BoxError;
use crate::transport::DeviceHandle;
use crate::transport::DiscoveryFilter;
use crate::transport::Subscription;
use crate::transport::Transport;

pub struct BluestTransport {
    adapter: Adapter,
}

impl BluestTransport {
    /// How many undelivered notifications to buffer before the forwarder waits
    const NOTIFICATION_BUFFER: usize = 64;

    /// Open the default adapter and wait until it is powered on.
    pub async fn new() -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;
        Ok(Self { adapter })
    }

    async fn scan(&self, filter: &DiscoveryFilter) -> Result<DeviceHandle<Device>, AcquisitionError> {
        let services = filter.services();
        let mut advertisements = self
            .adapter
            .scan(&services)
            .await
            .map_err(|err| AcquisitionError::Discovery(err.into()))?;

        while let Some(found) = advertisements.next().await {
            let name = found
                .adv_data
                .local_name
                .clone()
                .or_else(|| found.device.name().ok());
            tracing::trace!(name = ?name, rssi = ?found.rssi, "advertisement");

            if filter.matches(&found.adv_data.services, name.as_deref()) {
                let id = format!("{:?}", found.device.id());
                return Ok(DeviceHandle::new(found.device, id, name));
            }
        }

        Err(AcquisitionError::Discovery("advertisement stream ended".into()))
    }
}

impl Transport for BluestTransport {
    type Peer = Device;

    async fn discover(
        &self,
        filter: &DiscoveryFilter,
        within: Duration,
    ) -> Result<DeviceHandle<Device>, AcquisitionError> {
        timeout(within, self.scan(filter))
            .await
            .map_err(|_| AcquisitionError::DiscoveryTimeout(within))?
    }

    async fn connect(&self, device: &DeviceHandle<Device>, within: Duration) -> Result<(), AcquisitionError> {
        let connection_error = |source: BoxError| AcquisitionError::Connection {
            device: device.name.clone(),
            source,
        };

        timeout(within, self.adapter.connect_device(&device.peer))
            .await
            .map_err(|elapsed| connection_error(elapsed.into()))?
            .map_err(|err| connection_error(err.into()))
    }

    async fn subscribe(
        &self,
        device: &DeviceHandle<Device>,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Subscription, AcquisitionError> {
        let subscription_error = |source: BoxError| AcquisitionError::Subscription {
            device: device.name.clone(),
            source,
        };

        let service = device
            .peer
            .discover_services_with_uuid(service)
            .await
            .map_err(|err| subscription_error(err.into()))?
            .first()
            .ok_or_else(|| subscription_error("The device does not support the glucose service.".into()))?
            .clone();
        let characteristic = service
            .discover_characteristics_with_uuid(characteristic)
            .await
            .map_err(|err| subscription_error(err.into()))?
            .first()
            .ok_or_else(|| subscription_error("The device does not support the glucose measurement characteristic.".into()))?
            .clone();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(Self::NOTIFICATION_BUFFER);
        let forwarder = tokio::spawn(async move {
            let mut notifications = match characteristic.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    notifications
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                match notification {
                    Ok(payload) => {
                        tracing::trace!(payload = %hex::encode(&payload), "notification");
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, "notification stream failed");
                        break;
                    }
                }
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Subscription::with_forwarder(rx, forwarder)),
            Ok(Err(err)) => Err(subscription_error(err.into())),
            Err(_) => Err(subscription_error("notification task ended before subscribing".into())),
        }
    }

    async fn disconnect(&self, device: &DeviceHandle<Device>) -> Result<(), AcquisitionError> {
        self.adapter
            .disconnect_device(&device.peer)
            .await
            .map_err(|err| AcquisitionError::Connection {
                device: device.name.clone(),
                source: err.into(),
            })
    }
}
