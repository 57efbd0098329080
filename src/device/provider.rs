// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device providers and their composition.

use std::sync::Arc;

use futures::future::select_all;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{DeviceId, DeviceStatus};
use crate::error::StatusError;

/// Live status of one device.
///
/// Yields the current status first, then every change. An `Err` item makes
/// the consumer drop the stream and ask for a new one after a delay.
pub type StatusStream = BoxStream<'static, Result<DeviceStatus, StatusError>>;

/// Description of a device published to the hub.
///
/// # Examples
///
/// ```
/// use hubrelay::device::DeviceDescriptor;
///
/// let device = DeviceDescriptor::new("phone-alice", "Alice's phone", "torick", "presence")
///     .with_manufacturer("Ubiquiti");
///
/// assert_eq!(device.id.as_str(), "phone-alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Unique identifier of the device.
    pub id: DeviceId,
    /// Name shown in the hub's device list.
    pub display_name: String,
    /// Namespace of the hub-side device handler.
    pub device_namespace: String,
    /// Type of the hub-side device handler.
    pub device_type: String,
    /// Manufacturer, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Model name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl DeviceDescriptor {
    /// Creates a descriptor with the required fields.
    #[must_use]
    pub fn new(
        id: impl Into<DeviceId>,
        display_name: impl Into<String>,
        device_namespace: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            device_namespace: device_namespace.into(),
            device_type: device_type.into(),
            manufacturer: None,
            model_name: None,
        }
    }

    /// Sets the manufacturer.
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }
}

/// A source of devices and of their live status.
pub trait DeviceProvider: Send + Sync {
    /// Returns the devices currently available, updated as they change.
    fn observe_devices(&self) -> watch::Receiver<Vec<DeviceDescriptor>>;

    /// Returns the live status of a device, or `None` if this provider does
    /// not know it.
    fn try_observe_status(&self, id: &DeviceId) -> Option<StatusStream>;
}

impl<P: DeviceProvider + ?Sized> DeviceProvider for Arc<P> {
    fn observe_devices(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        (**self).observe_devices()
    }

    fn try_observe_status(&self, id: &DeviceId) -> Option<StatusStream> {
        (**self).try_observe_status(id)
    }
}

/// An ordered set of providers, queried as one.
///
/// # Examples
///
/// ```
/// use hubrelay::device::{DeviceDescriptor, ProviderSet, PushProvider};
///
/// let screens = PushProvider::new();
/// screens.set_devices(vec![DeviceDescriptor::new("screen", "Screen", "torick", "switch")]);
///
/// let providers = ProviderSet::builder()
///     .with_provider(screens)
///     .build();
///
/// assert_eq!(providers.devices().len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: Arc<[Arc<dyn DeviceProvider>]>,
}

impl ProviderSet {
    /// Starts building a provider set.
    #[must_use]
    pub fn builder() -> ProviderSetBuilder {
        ProviderSetBuilder::default()
    }

    /// Returns the number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if the set holds no provider.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Returns the live status of a device from the first provider knowing
    /// it, in registration order.
    #[must_use]
    pub fn try_observe_status(&self, id: &DeviceId) -> Option<StatusStream> {
        self.providers
            .iter()
            .find_map(|provider| provider.try_observe_status(id))
    }

    /// Returns the devices currently published by all providers.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.providers
            .iter()
            .flat_map(|provider| provider.observe_devices().borrow().clone())
            .collect()
    }

    /// Returns the devices of all providers, updated whenever one changes.
    ///
    /// Must be called from within a Tokio runtime. The merging task ends
    /// once every receiver is dropped.
    #[must_use]
    pub fn observe_devices(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        let mut sources: Vec<_> = self
            .providers
            .iter()
            .map(|provider| Some(provider.observe_devices()))
            .collect();
        let mut latest: Vec<Vec<DeviceDescriptor>> = sources
            .iter_mut()
            .flatten()
            .map(|source| source.borrow_and_update().clone())
            .collect();

        let (sender, receiver) = watch::channel(latest.concat());
        if sources.is_empty() {
            return receiver;
        }

        tokio::spawn(async move {
            loop {
                let pending: Vec<_> = sources
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(index, source)| {
                        let source = source.as_mut()?;
                        Some(Box::pin(async move { (index, source.changed().await.is_ok()) }))
                    })
                    .collect();
                if pending.is_empty() {
                    break;
                }

                let ((index, alive), _, _) = tokio::select! {
                    () = sender.closed() => break,
                    changed = select_all(pending) => changed,
                };

                // A provider that went away keeps its last published devices.
                let refreshed = sources[index]
                    .as_mut()
                    .filter(|_| alive)
                    .map(|source| source.borrow_and_update().clone());
                match refreshed {
                    Some(devices) => latest[index] = devices,
                    None => sources[index] = None,
                }
                sender.send_replace(latest.concat());
            }
        });

        receiver
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("providers", &self.providers.len())
            .finish()
    }
}

/// Builder for [`ProviderSet`].
#[derive(Default)]
pub struct ProviderSetBuilder {
    providers: Vec<Arc<dyn DeviceProvider>>,
}

impl ProviderSetBuilder {
    /// Appends a provider. Earlier providers take precedence.
    #[must_use]
    pub fn with_provider(mut self, provider: impl DeviceProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Appends a provider that is shared with other owners.
    #[must_use]
    pub fn with_shared_provider(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Builds the provider set.
    #[must_use]
    pub fn build(self) -> ProviderSet {
        ProviderSet {
            providers: self.providers.into(),
        }
    }
}
