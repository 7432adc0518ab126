//! Sync blood glucose readings from a Bluetooth Low Energy glucose meter.
//!
//! Tested with Accu-Chek meters, but any meter implementing the Bluetooth SIG
//! Glucose Profile and pushing its records on connect should work.
//!
//! The meter only advertises for a short while after a measurement, so the
//! [`AcquisitionEngine`] keeps cycling: scan for the glucose service (falling back
//! to a name match), connect, subscribe to the Glucose Measurement characteristic,
//! collect whatever arrives during a dwell window, disconnect and scan again.
//!
//! Each notification is an IEEE 11073-20601 encoded measurement, decoded by
//! [`message::decode`] into a [`Reading`] carrying both mg/dL and mmol/L.
//! Readings and the current connection status live in a [`ReadingStore`] shared
//! with consumers, and committed readings are handed to a [`PersistenceSink`].
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! #
//! # #[tokio::main]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(glucoread::ReadingStore::default());
//!     let transport = glucoread::BluestTransport::new().await?;
//!     let engine = glucoread::AcquisitionEngine::new(transport, store.clone(), Default::default());
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     tokio::spawn(engine.run(shutdown));
//!
//!     loop {
//!         let snapshot = store.snapshot();
//!         println!("{}: {:?}", snapshot.status, snapshot.readings.first());
//!         tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     }
//! # }
//! ```

pub mod acquisition;
pub mod ble_transport;
pub mod browser;
pub mod config;
pub mod device_time;
pub mod error;
mod glucose_reading;
pub mod http;
pub mod message;
pub mod persistence;
mod reading_store;
pub mod transport;

pub use acquisition::AcquisitionEngine;
pub use ble_transport::BluestTransport;
pub use config::AcquisitionConfig;
pub use device_time::DeviceTime;
pub use error::AcquisitionError;
pub use error::DecodeError;
pub use error::SinkError;
pub use glucose_reading::Reading;
pub use persistence::CsvFileSink;
pub use persistence::PersistenceSink;
pub use reading_store::ConnectionStatus;
pub use reading_store::ReadingStore;
pub use reading_store::Snapshot;
