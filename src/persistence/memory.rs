// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory persister.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::DataPersister;
use super::transaction::{Decision, LoadResult, TransactionContext, UpdateResult};
use crate::error::StoreError;

/// A [`DataPersister`] keeping its value in memory.
///
/// Follows the same transactional contract as the file store without any
/// durability. Useful for tests and for values that need not survive a
/// restart.
#[derive(Debug, Default)]
pub struct MemoryPersister<T> {
    value: Mutex<Option<T>>,
}

impl<T> MemoryPersister<T> {
    /// Creates an empty persister.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Creates a persister holding an initial value.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T: Clone + Send + Sync> DataPersister<T> for MemoryPersister<T> {
    async fn load(&self, cancel: &CancellationToken) -> LoadResult<T> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => LoadResult::error(StoreError::Cancelled),
            value = self.value.lock() => value.clone().into(),
        }
    }

    async fn update_async<F, Fut>(
        &self,
        cancel: &CancellationToken,
        updater: F,
    ) -> Result<UpdateResult<T>, StoreError>
    where
        F: FnOnce(TransactionContext<T>) -> Fut + Send,
        Fut: Future<Output = TransactionContext<T>> + Send,
    {
        let mut value = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StoreError::Cancelled),
            value = self.value.lock() => value,
        };

        let loaded = LoadResult::from(value.clone());
        let (loaded, decision) = updater(TransactionContext::new(loaded))
            .await
            .into_parts();

        Ok(match decision {
            Decision::Pending => UpdateResult::unchanged(loaded),
            Decision::Remove => UpdateResult::new(LoadResult::Absent, value.take().is_some()),
            Decision::Commit(new_value) => {
                *value = Some(new_value.clone());
                UpdateResult::new(LoadResult::Present(new_value), true)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_and_remove() {
        let store = MemoryPersister::new();
        let cancel = CancellationToken::new();

        assert!(store.load(&cancel).await.is_absent());

        let result = store.update(&cancel, |ctx| ctx.commit(5)).await.unwrap();
        assert!(result.written);
        assert_eq!(store.load(&cancel).await.value(), Some(&5));

        let result = store
            .update(&cancel, TransactionContext::remove_and_commit)
            .await
            .unwrap();
        assert!(result.written);
        assert!(store.load(&cancel).await.is_absent());
    }

    #[tokio::test]
    async fn no_decision_keeps_value() {
        let store = MemoryPersister::with_value("a".to_string());

        let result = store
            .update(&CancellationToken::new(), |_ctx| {})
            .await
            .unwrap();

        assert!(!result.written);
        assert_eq!(result.result.value().map(String::as_str), Some("a"));
    }
}
