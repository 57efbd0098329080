// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transactional persistence of a single typed value.
//!
//! This module provides a whole-value get/put abstraction with atomic
//! read-modify-write semantics, and decorators that compose on top of it.
//!
//! # Overview
//!
//! - [`DataPersister`] - Trait implemented by every store and decorator
//! - [`LockedFilePersister`] - Crash-safe file store (the leaf of a chain)
//! - [`DefaultValueDecorator`] - Normalizes absent/default values
//! - [`ObservableDataPersister`] - Trait of stores that can be observed
//! - [`ObservablePersister`] - Streams committed values to observers
//! - [`MemoryPersister`] - In-memory store for tests and ephemeral data
//!
//! # Usage
//!
//! ```no_run
//! use hubrelay::persistence::{DataPersister, LockedFilePersister};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> hubrelay::Result<()> {
//! let store = LockedFilePersister::<u32>::json("/var/lib/hubrelay/counter.json");
//! let cancel = CancellationToken::new();
//!
//! let result = store
//!     .update(&cancel, |ctx| {
//!         let next = ctx.value().copied().unwrap_or_default() + 1;
//!         ctx.commit(next);
//!     })
//!     .await?;
//!
//! assert!(result.written);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Every store serializes its own operations. The file store additionally
//! takes an advisory lock on a sibling `.lck` file, which deters but does
//! not prevent uncoordinated access from another process. Route all access
//! to one file through one store instance.

mod default_value;
mod locked_file;
mod memory;
mod observable;
mod serializer;
mod transaction;

pub use default_value::{DefaultValueDecorator, DefaultValueMode};
pub use locked_file::{LockPolicy, LockedFilePersister};
pub use memory::MemoryPersister;
pub use observable::{Observation, ObservablePersister, UpdateStream};
pub use serializer::{JsonSerializer, ObjectSerializer};
pub use transaction::{Decision, LoadResult, TransactionContext, UpdateResult};

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Abstraction over the persistence of one value with transactional updates.
///
/// Updaters receive a [`TransactionContext`] and must call
/// [`commit`](TransactionContext::commit) or
/// [`remove_and_commit`](TransactionContext::remove_and_commit) for anything
/// to be written.
pub trait DataPersister<T: Send>: Send + Sync {
    /// Reads the current committed value.
    fn load(&self, cancel: &CancellationToken) -> impl Future<Output = LoadResult<T>> + Send;

    /// Atomic read-modify-write with an asynchronous updater.
    ///
    /// The updater takes ownership of the context and hands it back once it
    /// has decided.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on lock timeout, cancellation while waiting for
    /// the lock, or a failure while writing.
    fn update_async<F, Fut>(
        &self,
        cancel: &CancellationToken,
        updater: F,
    ) -> impl Future<Output = Result<UpdateResult<T>, StoreError>> + Send
    where
        F: FnOnce(TransactionContext<T>) -> Fut + Send,
        Fut: Future<Output = TransactionContext<T>> + Send;

    /// Atomic read-modify-write with a synchronous updater.
    ///
    /// # Errors
    ///
    /// Same as [`update_async`](Self::update_async).
    fn update<F>(
        &self,
        cancel: &CancellationToken,
        updater: F,
    ) -> impl Future<Output = Result<UpdateResult<T>, StoreError>> + Send
    where
        F: FnOnce(&mut TransactionContext<T>) + Send,
    {
        self.update_async(cancel, move |mut ctx| async move {
            updater(&mut ctx);
            ctx
        })
    }
}

/// A [`DataPersister`] whose value can be observed as it changes.
pub trait ObservableDataPersister<T: Send>: DataPersister<T> {
    /// Returns a stream of values produced by successful writes.
    fn observe(&self) -> UpdateStream<T>;

    /// Returns a stream yielding the current value, then every newer one.
    fn get_and_observe(&self) -> Observation<T>;
}

impl<T: Send, P: DataPersister<T>> DataPersister<T> for Arc<P> {
    fn load(&self, cancel: &CancellationToken) -> impl Future<Output = LoadResult<T>> + Send {
        (**self).load(cancel)
    }

    fn update_async<F, Fut>(
        &self,
        cancel: &CancellationToken,
        updater: F,
    ) -> impl Future<Output = Result<UpdateResult<T>, StoreError>> + Send
    where
        F: FnOnce(TransactionContext<T>) -> Fut + Send,
        Fut: Future<Output = TransactionContext<T>> + Send,
    {
        (**self).update_async(cancel, updater)
    }
}

impl<T: Send, P: ObservableDataPersister<T>> ObservableDataPersister<T> for Arc<P> {
    fn observe(&self) -> UpdateStream<T> {
        (**self).observe()
    }

    fn get_and_observe(&self) -> Observation<T> {
        (**self).get_and_observe()
    }
}
