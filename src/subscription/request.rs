// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UPnP `SUBSCRIBE` request parsing.
//!
//! The hub subscribes to a device with:
//!
//! ```text
//! SUBSCRIBE /api/devices/phone-alice HTTP/1.1
//! CALLBACK: <http://192.168.1.10:39500/notify>
//! TIMEOUT: Second-3600
//! ```
//!
//! and expects `SID`, `TIMEOUT` and the device header back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use super::Callback;
use crate::device::{DEVICE_HEADER, DeviceId};
use crate::error::SubscriptionError;

/// Name of the callback header.
pub const CALLBACK_HEADER: &str = "CALLBACK";
/// Name of the timeout header.
pub const TIMEOUT_HEADER: &str = "TIMEOUT";
/// Name of the subscription id header.
pub const SID_HEADER: &str = "SID";

const TIMEOUT_PREFIX: &str = "Second-";

/// A parsed subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Where notifications are posted.
    pub uri: Url,
    /// How long the subscription lasts.
    pub duration: Duration,
}

impl SubscribeRequest {
    /// Parses the `CALLBACK` and `TIMEOUT` header values.
    ///
    /// When the callback header lists several URIs only the first is kept.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError` if a header is missing or blank, if the
    /// callback is not an absolute URI, or if the timeout is not
    /// `Second-<n>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use hubrelay::subscription::SubscribeRequest;
    ///
    /// let request = SubscribeRequest::parse(
    ///     Some("<http://192.168.1.10:39500/notify>"),
    ///     Some("second-300"),
    /// )?;
    ///
    /// assert_eq!(request.uri.as_str(), "http://192.168.1.10:39500/notify");
    /// assert_eq!(request.duration, Duration::from_secs(300));
    /// # Ok::<(), hubrelay::error::SubscriptionError>(())
    /// ```
    pub fn parse(
        callback: Option<&str>,
        timeout: Option<&str>,
    ) -> Result<Self, SubscriptionError> {
        let callback = non_blank(callback).ok_or(SubscriptionError::MissingHeader(CALLBACK_HEADER))?;
        let timeout = non_blank(timeout).ok_or(SubscriptionError::MissingHeader(TIMEOUT_HEADER))?;

        Ok(Self {
            uri: parse_callback(callback)?,
            duration: parse_timeout(timeout)?,
        })
    }

    /// Turns the request into a callback registered at `now`.
    #[must_use]
    pub fn into_callback(self, now: DateTime<Utc>) -> Callback {
        Callback::new(self.uri, self.duration, now)
    }
}

/// Headers answering an accepted subscription.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use hubrelay::device::DeviceId;
/// use hubrelay::subscription::{Callback, SubscribeResponse};
///
/// let callback = Callback::new("http://hub.local/notify".parse()?, Duration::from_secs(60), Utc::now());
/// let response = SubscribeResponse::new(DeviceId::new("tv"), &callback);
///
/// assert_eq!(response.timeout(), "Second-60");
/// assert!(response.sid().starts_with("uuid:"));
/// # Ok::<(), url::ParseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponse {
    device: DeviceId,
    sid: String,
    timeout: String,
}

impl SubscribeResponse {
    /// Builds the response for a registered callback.
    #[must_use]
    pub fn new(device: DeviceId, callback: &Callback) -> Self {
        Self {
            device,
            sid: format!("uuid:{}", callback.id()),
            timeout: format!("{TIMEOUT_PREFIX}{}", callback.duration().as_secs()),
        }
    }

    /// Returns the `SID` header value.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Returns the `TIMEOUT` header value.
    #[must_use]
    pub fn timeout(&self) -> &str {
        &self.timeout
    }

    /// Returns the headers to send, as name/value pairs.
    #[must_use]
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            (SID_HEADER, self.sid.as_str()),
            (TIMEOUT_HEADER, self.timeout.as_str()),
            (DEVICE_HEADER, self.device.as_str()),
        ]
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn parse_callback(value: &str) -> Result<Url, SubscriptionError> {
    let first = match value.strip_prefix('<') {
        Some(rest) => rest.split('>').next().unwrap_or(rest),
        None => value,
    };

    let uri = Url::parse(first.trim())
        .map_err(|e| SubscriptionError::InvalidCallback(format!("{value}: {e}")))?;
    if uri.cannot_be_a_base() {
        return Err(SubscriptionError::InvalidCallback(value.to_string()));
    }
    Ok(uri)
}

fn parse_timeout(value: &str) -> Result<Duration, SubscriptionError> {
    let invalid = || SubscriptionError::InvalidTimeout(value.to_string());

    let seconds = value
        .get(..TIMEOUT_PREFIX.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(TIMEOUT_PREFIX))
        .map(|_| &value[TIMEOUT_PREFIX.len()..])
        .ok_or_else(invalid)?;

    seconds
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| invalid())
}
