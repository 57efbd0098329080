// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provider fed by explicit status pushes.

use std::collections::HashMap;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::provider::{DeviceDescriptor, DeviceProvider, StatusStream};
use super::{DeviceId, DeviceStatus};
use crate::error::StatusError;

type StatusSender = mpsc::UnboundedSender<Result<DeviceStatus, StatusError>>;

/// A [`DeviceProvider`] whose devices and statuses are pushed by its owner.
///
/// Suits devices that report on their own (a webhook, a local sensor)
/// rather than being polled. A device is known once it appears in
/// [`set_devices`](Self::set_devices); new status streams start with the
/// last published status.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use hubrelay::device::{DeviceDescriptor, DeviceId, DeviceProvider, PushProvider};
///
/// # #[tokio::main]
/// # async fn main() {
/// let provider = PushProvider::new();
/// let id = DeviceId::new("screen");
/// provider.set_devices(vec![DeviceDescriptor::new(id.clone(), "Screen", "torick", "switch")]);
/// provider.publish(&id, serde_json::json!({"switch": "on"}));
///
/// let mut status = provider.try_observe_status(&id).unwrap();
/// assert_eq!(status.next().await.unwrap().unwrap()["switch"], "on");
/// # }
/// ```
#[derive(Debug)]
pub struct PushProvider {
    devices: watch::Sender<Vec<DeviceDescriptor>>,
    channels: Mutex<HashMap<DeviceId, Channel>>,
}

#[derive(Debug, Default)]
struct Channel {
    last: Option<DeviceStatus>,
    subscribers: Vec<StatusSender>,
}

impl PushProvider {
    /// Creates a provider without devices.
    #[must_use]
    pub fn new() -> Self {
        let (devices, _) = watch::channel(Vec::new());
        Self {
            devices,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the set of published devices.
    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        self.devices.send_replace(devices);
    }

    /// Publishes the status of a device to every open stream.
    pub fn publish(&self, id: &DeviceId, status: DeviceStatus) {
        let mut channels = self.channels.lock();
        let channel = channels.entry(id.clone()).or_default();

        channel
            .subscribers
            .retain(|subscriber| subscriber.send(Ok(status.clone())).is_ok());
        channel.last = Some(status);
    }

    /// Fails every open stream of a device.
    ///
    /// Consumers are expected to subscribe again.
    pub fn fail(&self, id: &DeviceId, cause: impl std::fmt::Display) {
        let error = StatusError::failed(cause);
        if let Some(channel) = self.channels.lock().get_mut(id) {
            for subscriber in channel.subscribers.drain(..) {
                let _ = subscriber.send(Err(error.clone()));
            }
        }
    }

    /// Returns the number of open status streams of a device.
    #[must_use]
    pub fn subscriber_count(&self, id: &DeviceId) -> usize {
        self.channels.lock().get(id).map_or(0, |channel| {
            channel
                .subscribers
                .iter()
                .filter(|subscriber| !subscriber.is_closed())
                .count()
        })
    }

    fn is_known(&self, id: &DeviceId) -> bool {
        self.devices.borrow().iter().any(|device| &device.id == id)
    }
}

impl Default for PushProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for PushProvider {
    fn observe_devices(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        self.devices.subscribe()
    }

    fn try_observe_status(&self, id: &DeviceId) -> Option<StatusStream> {
        if !self.is_known(id) {
            return None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock();
        let channel = channels.entry(id.clone()).or_default();
        if let Some(last) = &channel.last {
            let _ = sender.send(Ok(last.clone()));
        }
        channel.subscribers.push(sender);

        Some(
            futures::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|item| (item, receiver))
            })
            .boxed(),
        )
    }
}
