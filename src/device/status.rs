// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device status payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DeviceId;

/// Status of a device as posted to callbacks.
///
/// The relay never looks inside a status: it only compares two statuses for
/// equality and posts them as JSON. Providers pick their own shape.
pub type DeviceStatus = serde_json::Value;

/// Whether a presence sensor detects its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceState {
    /// The target is not detected.
    #[serde(rename = "not present")]
    NotPresent,
    /// The target is detected.
    #[serde(rename = "present")]
    Present,
}

impl PresenceState {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotPresent => "not present",
            Self::Present => "present",
        }
    }
}

impl From<bool> for PresenceState {
    fn from(present: bool) -> Self {
        if present {
            Self::Present
        } else {
            Self::NotPresent
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status payload of a presence sensor.
///
/// # Examples
///
/// ```
/// use hubrelay::device::{DeviceId, DeviceStatus, PresenceState, PresenceStatus};
///
/// let status = PresenceStatus::new(DeviceId::new("phone"), PresenceState::Present);
/// let json = DeviceStatus::from(status);
///
/// assert_eq!(json["presence"], "present");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStatus {
    /// The device reporting the status.
    pub id: DeviceId,
    /// The detected presence.
    pub presence: PresenceState,
}

impl PresenceStatus {
    /// Creates a presence status.
    #[must_use]
    pub fn new(id: DeviceId, presence: PresenceState) -> Self {
        Self { id, presence }
    }
}

impl From<PresenceStatus> for DeviceStatus {
    fn from(status: PresenceStatus) -> Self {
        serde_json::json!({
            "id": status.id.as_str(),
            "presence": status.presence.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_wire_format() {
        let status = PresenceStatus::new(DeviceId::new("Phone"), PresenceState::NotPresent);

        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"id":"Phone","presence":"not present"}"#
        );
        assert_eq!(
            DeviceStatus::from(status),
            serde_json::json!({"id": "Phone", "presence": "not present"})
        );
    }

    #[test]
    fn presence_parses() {
        let status: PresenceStatus =
            serde_json::from_str(r#"{"id":"tablet","presence":"present"}"#).unwrap();

        assert_eq!(status.id, DeviceId::new("TABLET"));
        assert_eq!(status.presence, PresenceState::Present);
    }

    #[test]
    fn presence_from_bool() {
        assert_eq!(PresenceState::from(true), PresenceState::Present);
        assert_eq!(PresenceState::from(false).to_string(), "not present");
    }
}
