// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Devices, their status and the providers publishing them.
//!
//! The relay does not talk to devices itself. Providers implement
//! [`DeviceProvider`] to publish a set of devices and a live status stream
//! per device; a [`ProviderSet`] composes them in a fixed order.
//!
//! # Examples
//!
//! ```
//! use hubrelay::device::{DeviceDescriptor, DeviceDirectory, ProviderSet, PushProvider};
//!
//! let presence = PushProvider::new();
//! presence.set_devices(vec![DeviceDescriptor::new(
//!     "phone-alice",
//!     "Alice's phone",
//!     "torick",
//!     "presence",
//! )]);
//!
//! let providers = ProviderSet::builder().with_provider(presence).build();
//!
//! let mut directory = DeviceDirectory::new();
//! directory.refresh(&providers);
//! assert_eq!(directory.len(), 1);
//! ```

mod directory;
mod id;
mod provider;
mod push;
mod status;

pub use directory::{DeviceDirectory, DirectoryChanges};
pub use id::DeviceId;
pub use provider::{
    DeviceDescriptor, DeviceProvider, ProviderSet, ProviderSetBuilder, StatusStream,
};
pub use push::PushProvider;
pub use status::{DeviceStatus, PresenceState, PresenceStatus};

/// Header carrying the device id on every notification.
pub const DEVICE_HEADER: &str = "Smartthings-Device";
