// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Directory of published devices.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::debug;

use super::DeviceId;
use super::provider::{DeviceDescriptor, ProviderSet};

/// Devices added and removed by a [`DeviceDirectory::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryChanges {
    /// Devices that were not in the directory before.
    pub added: Vec<DeviceId>,
    /// Devices that are no longer published.
    pub removed: Vec<DeviceId>,
}

impl DirectoryChanges {
    /// Returns true if nothing was added or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Stable map from device id to its published descriptor.
///
/// Entries are inserted and removed explicitly; a descriptor stays in the
/// directory until a sync no longer lists it.
///
/// # Examples
///
/// ```
/// use hubrelay::device::{DeviceDescriptor, DeviceDirectory, DeviceId};
///
/// let mut directory = DeviceDirectory::new();
/// let changes = directory.sync([
///     DeviceDescriptor::new("tv", "TV", "torick", "switch"),
///     DeviceDescriptor::new("phone", "Phone", "torick", "presence"),
/// ]);
///
/// assert_eq!(changes.added.len(), 2);
/// assert!(directory.get(&DeviceId::new("TV")).is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    devices: BTreeMap<DeviceId, DeviceDescriptor>,
}

impl DeviceDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a device, returning the previous descriptor.
    pub fn insert(&mut self, device: DeviceDescriptor) -> Option<DeviceDescriptor> {
        self.devices.insert(device.id.clone(), device)
    }

    /// Removes a device.
    pub fn remove(&mut self, id: &DeviceId) -> Option<DeviceDescriptor> {
        self.devices.remove(id)
    }

    /// Returns a device.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.get(id)
    }

    /// Returns true if the device is published.
    #[must_use]
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Iterates devices ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.values()
    }

    /// Returns the number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Makes the directory hold exactly the given devices.
    ///
    /// Known devices keep their slot and get the new descriptor. When the
    /// same id is listed twice the first listing wins.
    pub fn sync(&mut self, devices: impl IntoIterator<Item = DeviceDescriptor>) -> DirectoryChanges {
        let mut next = BTreeMap::new();
        for device in devices {
            if let Entry::Vacant(slot) = next.entry(device.id.clone()) {
                slot.insert(device);
            }
        }

        let removed = self
            .devices
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        let added = next
            .keys()
            .filter(|id| !self.devices.contains_key(*id))
            .cloned()
            .collect();

        self.devices = next;
        let changes = DirectoryChanges { added, removed };
        if !changes.is_empty() {
            debug!(
                added = changes.added.len(),
                removed = changes.removed.len(),
                "Device directory changed"
            );
        }
        changes
    }

    /// Syncs the directory with what the providers currently publish.
    pub fn refresh(&mut self, providers: &ProviderSet) -> DirectoryChanges {
        self.sync(providers.devices())
    }
}
