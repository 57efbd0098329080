// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback subscriptions on device status.
//!
//! The hub subscribes to a device with a UPnP-style `SUBSCRIBE` request and
//! expects the device's status to be posted to its callback URI whenever it
//! changes, until the subscription expires.
//!
//! # Overview
//!
//! - [`SubscribeRequest`] / [`SubscribeResponse`] - Parsing of the request
//!   headers and the headers answering it
//! - [`Callback`] / [`CallbackRegistry`] - Registered callbacks per device,
//!   persisted as JSON
//! - [`NotificationSender`] / [`HttpNotificationSender`] - Posting of one
//!   notification, with [`deliver`] retrying each callback on its own
//! - [`CallbackManager`] - Keeps one tracking subscription per registered
//!   device and removes expired callbacks
//!
//! # Tracking
//!
//! Each registered device has a tracking subscription following its live
//! status. Distinct statuses are posted to every callback, and the last
//! status is posted again every refresh interval so the hub sees the device
//! alive. A status stream that fails is subscribed again after a delay.

mod callback;
mod delivery;
mod manager;
mod request;
mod tracking;

pub use callback::{Callback, CallbackRegistry};
pub use delivery::{HttpNotificationSender, NotificationSender, deliver, deliver_with_retry};
pub use manager::CallbackManager;
pub use request::{CALLBACK_HEADER, SID_HEADER, SubscribeRequest, SubscribeResponse, TIMEOUT_HEADER};
pub use tracking::TrackingState;
