// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of the callback registry store.

use std::path::Path;

use crate::persistence::{
    DefaultValueDecorator, DefaultValueMode, LockedFilePersister, ObservablePersister,
};
use crate::subscription::CallbackRegistry;

/// Durable, observable store of the callback registry.
pub type RegistryStore = ObservablePersister<
    CallbackRegistry,
    DefaultValueDecorator<CallbackRegistry, LockedFilePersister<CallbackRegistry>>,
>;

/// Builds the registry store backed by the JSON file at `path`.
///
/// A missing file reads as an empty registry, and an empty registry is
/// stored by removing the file.
///
/// # Examples
///
/// ```
/// use hubrelay::persistence::DataPersister;
/// use hubrelay::relay;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let dir = std::env::temp_dir().join("hubrelay-doc");
/// let store = relay::build_registry_store(dir.join("callbacks.json"));
///
/// let registry = store.load(&CancellationToken::new()).await;
/// assert!(registry.value().is_some_and(|registry| registry.is_empty()));
/// # }
/// ```
#[must_use]
pub fn build_registry_store(path: impl AsRef<Path>) -> RegistryStore {
    let file = LockedFilePersister::json(path);
    let defaults = DefaultValueDecorator::with_partial_eq(
        file,
        DefaultValueMode::READ_EMPTY_TO_CUSTOM_DEFAULT
            | DefaultValueMode::WRITE_CUSTOM_DEFAULT_TO_EMPTY,
        CallbackRegistry::new(),
    );
    ObservablePersister::new(defaults)
}
