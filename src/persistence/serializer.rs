// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pluggable value encoding for file-backed persisters.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SerializationError;

/// Converts values to and from bytes.
pub trait ObjectSerializer: Send + Sync {
    /// Decodes a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the bytes are not a valid encoding of `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;

    /// Encodes a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the value cannot be encoded.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Creates a compact JSON serializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a serializer producing indented JSON.
    #[must_use]
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl ObjectSerializer for JsonSerializer {
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(Into::into)
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }
}
