//! The BLE operations the acquisition engine needs from its environment.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AcquisitionError;

/// What a scan is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryFilter {
    /// A peer advertising this service.
    Service(Uuid),
    /// A peer whose advertised name contains this text.
    NameContains(String),
}

impl DiscoveryFilter {
    pub fn matches(&self, advertised_services: &[Uuid], name: Option<&str>) -> bool {
        match self {
            Self::Service(uuid) => advertised_services.contains(uuid),
            Self::NameContains(hint) => name.is_some_and(|name| name.contains(hint.as_str())),
        }
    }

    /// The services to ask the adapter to filter on, if any.
    pub fn services(&self) -> Vec<Uuid> {
        match self {
            Self::Service(uuid) => vec![*uuid],
            Self::NameContains(_) => Vec::new(),
        }
    }
}

/// A discovered peer, valid for one connection attempt.
#[derive(Debug)]
pub struct DeviceHandle<P> {
    pub peer: P,
    pub id: String,
    pub name: String,
}

impl<P> DeviceHandle<P> {
    pub fn new(peer: P, id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            peer,
            id: id.into(),
            name: name.filter(|name| !name.is_empty()).unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Notification payloads from one characteristic. Dropping it unsubscribes.
pub struct Subscription {
    payloads: mpsc::Receiver<Vec<u8>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(payloads: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            payloads,
            forwarder: None,
        }
    }

    /// A subscription fed by `forwarder`, which is stopped on unsubscribe.
    pub fn with_forwarder(payloads: mpsc::Receiver<Vec<u8>>, forwarder: JoinHandle<()>) -> Self {
        Self {
            payloads,
            forwarder: Some(forwarder),
        }
    }

    /// The next payload, or `None` once the peer stops sending for good.
    pub async fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.payloads.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.payloads.close();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Discovery, connection and notification primitives of a BLE stack.
///
/// Every timeout is enforced by the implementation.
pub trait Transport: Send + Sync {
    type Peer: Send + Sync;

    /// Scan until a peer matches `filter`, giving up after `timeout` with
    /// [`AcquisitionError::DiscoveryTimeout`].
    fn discover(
        &self,
        filter: &DiscoveryFilter,
        timeout: Duration,
    ) -> impl Future<Output = Result<DeviceHandle<Self::Peer>, AcquisitionError>> + Send;

    fn connect(
        &self,
        device: &DeviceHandle<Self::Peer>,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AcquisitionError>> + Send;

    /// Enable notifications on `characteristic` of `service`.
    fn subscribe(
        &self,
        device: &DeviceHandle<Self::Peer>,
        service: Uuid,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<Subscription, AcquisitionError>> + Send;

    fn disconnect(
        &self,
        device: &DeviceHandle<Self::Peer>,
    ) -> impl Future<Output = Result<(), AcquisitionError>> + Send;
}

#[cfg(test)]
const SERVICE: Uuid = Uuid::from_u128(0x00001808_0000_1000_8000_00805f9b34fb);

#[test]
fn test_service_filter() {
    let filter = DiscoveryFilter::Service(SERVICE);
    assert!(filter.matches(&[Uuid::nil(), SERVICE], None));
    assert!(!filter.matches(&[], Some("Accu-Chek Guide")));
    assert_eq!(filter.services(), vec![SERVICE]);
}

#[test]
fn test_name_filter() {
    let filter = DiscoveryFilter::NameContains("Accu".to_string());
    assert!(filter.matches(&[], Some("meter Accu-Chek")));
    assert!(!filter.matches(&[SERVICE], Some("Contour")));
    assert!(!filter.matches(&[SERVICE], None));
    assert!(filter.services().is_empty());
}

#[test]
fn test_device_name_fallback() {
    assert_eq!(DeviceHandle::new((), "a", None).name, "Unknown");
    assert_eq!(DeviceHandle::new((), "a", Some(String::new())).name, "Unknown");
    assert_eq!(DeviceHandle::new((), "a", Some("Accu-Chek".to_string())).name, "Accu-Chek");
}

#[tokio::test]
async fn test_subscription_ends_when_sender_drops() {
    let (tx, rx) = mpsc::channel(4);
    let mut subscription = Subscription::new(rx);
    tx.send(vec![1, 2]).await.unwrap();
    drop(tx);
    assert_eq!(subscription.next_payload().await, Some(vec![1, 2]));
    assert_eq!(subscription.next_payload().await, None);
}

#[tokio::test]
async fn test_unsubscribe_closes_channel() {
    let (tx, rx) = mpsc::channel(4);
    Subscription::new(rx).unsubscribe();
    assert!(tx.send(vec![1]).await.is_err());
}
