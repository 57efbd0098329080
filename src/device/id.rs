// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identifier type.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Identifier of a device exposed to the hub.
///
/// Comparison, ordering and hashing ignore ASCII case, so `Kitchen-Tv` and
/// `kitchen-tv` name the same device. The original spelling is kept for
/// display and for the header sent with every notification.
///
/// # Examples
///
/// ```
/// use hubrelay::device::DeviceId;
///
/// let id = DeviceId::new("Phone-Alice");
/// assert_eq!(id, DeviceId::new("phone-alice"));
/// assert_eq!(id.to_string(), "Phone-Alice");
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as originally spelled.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for DeviceId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for DeviceId {}

impl Hash for DeviceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.folded() {
            state.write_u8(b);
        }
        state.write_u8(0xff);
    }
}

impl Ord for DeviceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl PartialOrd for DeviceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use super::*;

    #[test]
    fn equality_ignores_case() {
        assert_eq!(DeviceId::new("DEV-1"), DeviceId::new("dev-1"));
        assert_ne!(DeviceId::new("dev-1"), DeviceId::new("dev-2"));
    }

    #[test]
    fn hash_ignores_case() {
        let mut set = HashSet::new();
        set.insert(DeviceId::new("Living-Room"));

        assert!(set.contains(&DeviceId::new("living-room")));
        assert!(!set.insert(DeviceId::new("LIVING-ROOM")));
    }

    #[test]
    fn ordering_ignores_case() {
        let mut map = BTreeMap::new();
        map.insert(DeviceId::new("b"), 1);
        map.insert(DeviceId::new("A"), 2);
        map.insert(DeviceId::new("B"), 3);

        let keys: Vec<_> = map.keys().map(DeviceId::as_str).collect();
        assert_eq!(keys, ["A", "b"]);
        assert_eq!(map[&DeviceId::new("b")], 3);
    }

    #[test]
    fn display_keeps_original_spelling() {
        let id = DeviceId::new("Phone-Bob");
        assert_eq!(id.to_string(), "Phone-Bob");
        assert_eq!(format!("{id:?}"), "DeviceId(Phone-Bob)");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = DeviceId::new("tv");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tv\"");

        let back: DeviceId = serde_json::from_str("\"TV\"").unwrap();
        assert_eq!(back, id);
    }
}
