// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `HubRelay` - Durable webhook subscriptions for a home-automation hub.
//!
//! This library relays the status of local devices to a home-automation hub.
//! The hub subscribes to a device with a UPnP-style `SUBSCRIBE` request and
//! receives the device's status as JSON on its callback URI whenever it
//! changes.
//!
//! # Supported Features
//!
//! - **Crash-safe storage**: Transactional whole-value store on the file system
//! - **Default values**: Decorator normalizing absent and default values
//! - **Observation**: Stream of committed values, current value first
//! - **Callback registry**: Persisted callbacks per device with expiration
//! - **Tracking**: Live status per device, deduplicated and refreshed
//! - **Delivery**: HTTP notifications retried per callback
//!
//! # Quick Start
//!
//! ```no_run
//! use chrono::Utc;
//! use hubrelay::device::{DeviceDescriptor, DeviceId, PresenceStatus, ProviderSet, PushProvider};
//! use hubrelay::subscription::{CallbackManager, HttpNotificationSender, SubscribeRequest, SubscribeResponse};
//! use hubrelay::{RelayConfig, relay};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> hubrelay::Result<()> {
//!     let config = RelayConfig::default();
//!
//!     // Devices known to this relay
//!     let presence = Arc::new(PushProvider::new());
//!     presence.set_devices(vec![DeviceDescriptor::new("phone", "Phone", "torick", "presence")]);
//!
//!     let manager = CallbackManager::new(
//!         relay::build_registry_store("/var/lib/hubrelay/callbacks.json"),
//!         ProviderSet::builder().with_shared_provider(presence.clone()).build(),
//!         HttpNotificationSender::from_config(&config)?,
//!     )
//!     .with_config(config);
//!     manager.start();
//!
//!     // The hub subscribes
//!     let device = DeviceId::new("phone");
//!     let request = SubscribeRequest::parse(Some("<http://192.168.1.10:39500/notify>"), Some("Second-3600"))?;
//!     let callback = request.into_callback(Utc::now());
//!     let response = SubscribeResponse::new(device.clone(), &callback);
//!     manager.add_callback(&CancellationToken::new(), device.clone(), callback).await?;
//!     println!("{:?}", response.headers());
//!
//!     // The device reports, and the hub is notified
//!     presence.publish(&device, PresenceStatus::new(device.clone(), true.into()).into());
//!     Ok(())
//! }
//! ```
//!
//! # Storage
//!
//! The registry store is a chain of decorators over a locked file, built by
//! [`relay::build_registry_store`]. See [`persistence`] for the contract
//! every store follows.

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod persistence;
pub mod relay;
pub mod subscription;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RelayConfig, RetryPolicy};
pub use error::{
    DeliveryError, Error, Result, SerializationError, StatusError, StoreError, SubscriptionError,
};
