// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `hubrelay` library.
//!
//! This module provides the error hierarchy for the persistence layer,
//! value serialization, callback delivery and subscription requests.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred in the transactional store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error occurred while delivering a notification.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// A subscription request could not be understood.
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// A device status source failed.
    #[error("status error: {0}")]
    Status(#[from] StatusError),
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The lock artifact could not be acquired within the retry budget.
    #[error("failed to lock {} after {attempts} attempts", path.display())]
    LockTimeout {
        /// Path of the lock artifact.
        path: PathBuf,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A file system operation failed.
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        /// Path of the artifact being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The stored value could not be encoded or decoded.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The current value could not be loaded, so it could not be updated.
    #[error("failed to load the stored value: {0}")]
    Load(#[source] Arc<StoreError>),

    /// The operation was cancelled before the lock was acquired.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by a serializer.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while posting a notification to a callback.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The callback answered with a non-success status code.
    #[error("callback responded with status {0}")]
    Status(u16),

    /// Every attempt failed.
    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the final attempt.
        last: Box<DeliveryError>,
    },

    /// The delivery was cancelled.
    #[error("delivery cancelled")]
    Cancelled,
}

/// Errors reported by a device status stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// The status source failed; the stream will be subscribed again.
    #[error("status source failed: {0}")]
    Failed(String),
}

impl StatusError {
    /// Creates a failure from any displayable cause.
    #[must_use]
    pub fn failed(cause: impl std::fmt::Display) -> Self {
        Self::Failed(cause.to_string())
    }
}

/// Errors related to parsing subscription requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// A required header is missing or blank.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// The callback header is not an absolute URI.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    /// The timeout header is not of the form `Second-N`.
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_display() {
        let err = StoreError::LockTimeout {
            path: PathBuf::from("/tmp/registry.json.lck"),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "failed to lock /tmp/registry.json.lck after 3 attempts"
        );
    }

    #[test]
    fn error_from_store_error() {
        let err: Error = StoreError::Cancelled.into();
        assert!(matches!(err, Error::Store(StoreError::Cancelled)));
    }

    #[test]
    fn exhausted_display_includes_last_error() {
        let err = DeliveryError::Exhausted {
            attempts: 5,
            last: Box::new(DeliveryError::Status(503)),
        };
        assert_eq!(
            err.to_string(),
            "delivery failed after 5 attempts: callback responded with status 503"
        );
    }

    #[test]
    fn subscription_error_display() {
        let err = SubscriptionError::MissingHeader("CALLBACK");
        assert_eq!(err.to_string(), "missing header: CALLBACK");
    }
}
