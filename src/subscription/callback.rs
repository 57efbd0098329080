// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registered callbacks and the persisted registry.
//!
//! - [`Callback`] - One webhook registration with its expiration
//! - [`CallbackRegistry`] - Immutable snapshot of the callbacks of every device

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;
use uuid::Uuid;

use crate::device::DeviceId;

/// A webhook registered for a device.
///
/// Immutable once created. Serialized as
/// `{"id", "uri", "duration" (seconds), "expiration" (RFC 3339)}`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use hubrelay::subscription::Callback;
///
/// let now = Utc::now();
/// let callback = Callback::new("http://hub.local:39500/notify".parse()?, Duration::from_secs(60), now);
///
/// assert_eq!(callback.id().len(), 32);
/// assert!(!callback.is_expired(now));
/// # Ok::<(), url::ParseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callback {
    id: String,
    uri: Url,
    #[serde(with = "seconds")]
    duration: Duration,
    expiration: DateTime<Utc>,
}

impl Callback {
    /// Creates a callback with a fresh id, expiring `duration` after `now`.
    #[must_use]
    pub fn new(uri: Url, duration: Duration, now: DateTime<Utc>) -> Self {
        let expiration = TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self::with_id(Uuid::new_v4().simple().to_string(), uri, duration, expiration)
    }

    /// Creates a callback from all its parts.
    #[must_use]
    pub fn with_id(
        id: impl Into<String>,
        uri: Url,
        duration: Duration,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            uri,
            duration,
            expiration,
        }
    }

    /// Returns the registration id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the target URI.
    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Returns the requested duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the absolute expiration.
    #[must_use]
    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// Returns true if the callback expired strictly before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration < now
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// The callbacks of every device, as persisted.
///
/// A snapshot is never mutated: every change produces a new registry that
/// shares the untouched per-device collections with the previous one. A
/// device never maps to an empty collection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use hubrelay::device::DeviceId;
/// use hubrelay::subscription::{Callback, CallbackRegistry};
///
/// let now = Utc::now();
/// let callback = Callback::new("http://hub.local/notify".parse()?, Duration::from_secs(60), now);
///
/// let registry = CallbackRegistry::new().with_callback(DeviceId::new("tv"), callback);
/// assert_eq!(registry.get(&DeviceId::new("TV")).map(|c| c.len()), Some(1));
/// # Ok::<(), url::ParseError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackRegistry {
    devices: BTreeMap<DeviceId, Arc<[Callback]>>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of devices with callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no device has callbacks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Returns the total number of callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.devices.values().map(|callbacks| callbacks.len()).sum()
    }

    /// Returns the callbacks of a device.
    #[must_use]
    pub fn get(&self, device: &DeviceId) -> Option<&Arc<[Callback]>> {
        self.devices.get(device)
    }

    /// Iterates devices and their callbacks, ordered by device id.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &Arc<[Callback]>)> {
        self.devices.iter()
    }

    /// Returns a registry with `callback` appended to the device's
    /// collection.
    #[must_use]
    pub fn with_callback(&self, device: DeviceId, callback: Callback) -> Self {
        let mut devices = self.devices.clone();
        let callbacks: Arc<[Callback]> = match devices.get(&device) {
            Some(existing) => existing.iter().cloned().chain([callback]).collect(),
            None => Arc::from([callback]),
        };
        devices.insert(device, callbacks);
        Self { devices }
    }

    /// Returns a registry without the callbacks expired before `now`, and
    /// the number of callbacks removed.
    ///
    /// Devices left without callbacks are dropped. Devices without expired
    /// callbacks keep their collection.
    #[must_use]
    pub fn without_expired(&self, now: DateTime<Utc>) -> (Self, usize) {
        let mut removed = 0;
        let devices = self
            .devices
            .iter()
            .filter_map(|(device, callbacks)| {
                let expired = callbacks.iter().filter(|c| c.is_expired(now)).count();
                removed += expired;

                if expired == 0 {
                    Some((device.clone(), Arc::clone(callbacks)))
                } else if expired == callbacks.len() {
                    None
                } else {
                    let kept: Arc<[Callback]> = callbacks
                        .iter()
                        .filter(|c| !c.is_expired(now))
                        .cloned()
                        .collect();
                    Some((device.clone(), kept))
                }
            })
            .collect();

        (Self { devices }, removed)
    }
}

impl FromIterator<(DeviceId, Vec<Callback>)> for CallbackRegistry {
    fn from_iter<I: IntoIterator<Item = (DeviceId, Vec<Callback>)>>(iter: I) -> Self {
        let mut devices: BTreeMap<DeviceId, Vec<Callback>> = BTreeMap::new();
        for (device, callbacks) in iter {
            devices.entry(device).or_default().extend(callbacks);
        }

        Self {
            devices: devices
                .into_iter()
                .filter(|(_, callbacks)| !callbacks.is_empty())
                .map(|(device, callbacks)| (device, callbacks.into()))
                .collect(),
        }
    }
}

impl Serialize for CallbackRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.devices.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CallbackRegistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Keys differing only in case are distinct here and merged on collect.
        let devices = BTreeMap::<String, Vec<Callback>>::deserialize(deserializer)?;
        Ok(devices
            .into_iter()
            .map(|(device, callbacks)| (DeviceId::new(device), callbacks))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn callback(id: &str, expiration: &str) -> Callback {
        Callback::with_id(
            id,
            Url::parse("http://x/hook").unwrap(),
            Duration::from_secs(60),
            at(expiration),
        )
    }

    #[test]
    fn new_callback_expires_after_duration() {
        let now = at("2024-05-01T12:00:00Z");
        let callback = Callback::new(
            Url::parse("http://x/hook").unwrap(),
            Duration::from_secs(90),
            now,
        );

        assert_eq!(callback.expiration(), at("2024-05-01T12:01:30Z"));
        assert!(callback.id().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!callback.is_expired(at("2024-05-01T12:01:30Z")));
        assert!(callback.is_expired(at("2024-05-01T12:01:31Z")));
    }

    #[test]
    fn huge_duration_saturates() {
        let callback = Callback::new(
            Url::parse("http://x/hook").unwrap(),
            Duration::MAX,
            Utc::now(),
        );
        assert_eq!(callback.expiration(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn callback_wire_format() {
        let callback = callback("c1", "2024-05-01T12:01:00Z");

        assert_eq!(
            serde_json::to_value(&callback).unwrap(),
            json!({
                "id": "c1",
                "uri": "http://x/hook",
                "duration": 60,
                "expiration": "2024-05-01T12:01:00Z",
            })
        );
    }

    #[test]
    fn with_callback_appends_and_shares_other_devices() {
        let registry = CallbackRegistry::new()
            .with_callback(DeviceId::new("a"), callback("1", "2024-01-01T00:00:00Z"))
            .with_callback(DeviceId::new("b"), callback("2", "2024-01-01T00:00:00Z"));

        let next = registry.with_callback(DeviceId::new("A"), callback("3", "2024-01-01T00:00:00Z"));

        let ids: Vec<_> = next.get(&DeviceId::new("a")).unwrap().iter().map(Callback::id).collect();
        assert_eq!(ids, ["1", "3"]);
        assert!(Arc::ptr_eq(
            registry.get(&DeviceId::new("b")).unwrap(),
            next.get(&DeviceId::new("b")).unwrap()
        ));
        // The previous snapshot is untouched.
        assert_eq!(registry.get(&DeviceId::new("a")).unwrap().len(), 1);
        assert_eq!(next.callback_count(), 3);
    }

    #[test]
    fn without_expired_removes_only_expired() {
        let now = at("2024-05-01T12:00:00Z");
        let registry = CallbackRegistry::new()
            .with_callback(DeviceId::new("d1"), callback("old", "2024-05-01T11:59:00Z"))
            .with_callback(DeviceId::new("d1"), callback("fresh", "2024-05-01T12:10:00Z"));

        let (scavenged, removed) = registry.without_expired(now);

        assert_eq!(removed, 1);
        let left = scavenged.get(&DeviceId::new("d1")).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), "fresh");
    }

    #[test]
    fn without_expired_drops_emptied_devices() {
        let now = at("2024-05-01T12:00:00Z");
        let registry = CallbackRegistry::new()
            .with_callback(DeviceId::new("d1"), callback("a", "2024-05-01T11:00:00Z"))
            .with_callback(DeviceId::new("d1"), callback("b", "2024-05-01T11:30:00Z"));

        let (scavenged, removed) = registry.without_expired(now);

        assert_eq!(removed, 2);
        assert!(scavenged.is_empty());
    }

    #[test]
    fn without_expired_keeps_registry_when_nothing_expired() {
        let now = at("2024-05-01T12:00:00Z");
        let registry = CallbackRegistry::new()
            .with_callback(DeviceId::new("d1"), callback("a", "2024-05-01T13:00:00Z"));

        let (scavenged, removed) = registry.without_expired(now);

        assert_eq!(removed, 0);
        assert_eq!(scavenged, registry);
    }

    #[test]
    fn deserialization_drops_empty_devices() {
        let registry: CallbackRegistry = serde_json::from_value(json!({
            "empty": [],
            "tv": [{
                "id": "c1",
                "uri": "http://x/hook",
                "duration": 60,
                "expiration": "2024-05-01T12:01:00Z",
            }],
        }))
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&DeviceId::new("empty")).is_none());
        assert_eq!(
            serde_json::to_value(&registry).unwrap()["tv"][0]["id"],
            "c1"
        );
    }

    #[test]
    fn keys_differing_in_case_are_merged_on_load() {
        let entry = |id: &str| {
            json!({
                "id": id,
                "uri": "http://x/hook",
                "duration": 60,
                "expiration": "2024-05-01T12:01:00Z",
            })
        };
        let registry: CallbackRegistry =
            serde_json::from_value(json!({"TV": [entry("c1")], "tv": [entry("c2")]})).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.callback_count(), 2);
        let ids: Vec<&str> = registry
            .get(&DeviceId::new("tv"))
            .unwrap()
            .iter()
            .map(Callback::id)
            .collect();
        assert_eq!(ids, ["c1", "c2"]);
    }
}
