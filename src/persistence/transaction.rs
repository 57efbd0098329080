// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read results and transaction contexts shared by every persister.

use std::sync::Arc;

use crate::error::StoreError;

/// Result of reading a stored value.
///
/// A read is never partially valid: it either produced the whole value,
/// found nothing, or failed.
#[derive(Debug, Clone)]
pub enum LoadResult<T> {
    /// The value exists.
    Present(T),
    /// Nothing is stored under this name.
    Absent,
    /// The value could not be read.
    Error(Arc<StoreError>),
}

impl<T> LoadResult<T> {
    /// Wraps an error into an error result.
    #[must_use]
    pub fn error(error: StoreError) -> Self {
        Self::Error(Arc::new(error))
    }

    /// Returns true if a value is present.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns true if the read failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the value, if present.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent | Self::Error(_) => None,
        }
    }

    /// Returns the error, if the read failed.
    #[must_use]
    pub fn err(&self) -> Option<&Arc<StoreError>> {
        match self {
            Self::Error(error) => Some(error),
            Self::Present(_) | Self::Absent => None,
        }
    }

    /// Converts into a `Result`, mapping `Absent` to `None`.
    ///
    /// # Errors
    ///
    /// Returns the read error if the read failed.
    pub fn into_result(self) -> Result<Option<T>, Arc<StoreError>> {
        match self {
            Self::Present(value) => Ok(Some(value)),
            Self::Absent => Ok(None),
            Self::Error(error) => Err(error),
        }
    }

    /// Maps the present value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LoadResult<U> {
        match self {
            Self::Present(value) => LoadResult::Present(f(value)),
            Self::Absent => LoadResult::Absent,
            Self::Error(error) => LoadResult::Error(error),
        }
    }
}

impl<T> From<Option<T>> for LoadResult<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Present)
    }
}

/// What an updater asked the store to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    /// No write requested.
    Pending,
    /// Write this value.
    Commit(T),
    /// Delete the stored value.
    Remove,
}

/// Single-use handle passed to an updater.
///
/// Carries the value read at the start of the transaction and collects the
/// updater's decision. Only the last call to [`commit`](Self::commit) or
/// [`remove_and_commit`](Self::remove_and_commit) counts; if neither is
/// called, the store performs no write.
#[derive(Debug)]
pub struct TransactionContext<T> {
    loaded: LoadResult<T>,
    decision: Decision<T>,
}

impl<T> TransactionContext<T> {
    /// Creates a context seeded with a read result.
    #[must_use]
    pub fn new(loaded: LoadResult<T>) -> Self {
        Self {
            loaded,
            decision: Decision::Pending,
        }
    }

    /// Returns the read result observed at transaction start.
    #[must_use]
    pub fn loaded(&self) -> &LoadResult<T> {
        &self.loaded
    }

    /// Returns the value observed at transaction start, if present.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.loaded.value()
    }

    /// Requests that `value` be durably written.
    pub fn commit(&mut self, value: T) {
        self.decision = Decision::Commit(value);
    }

    /// Requests that the stored value be removed.
    pub fn remove_and_commit(&mut self) {
        self.decision = Decision::Remove;
    }

    /// Clears any decision taken so far.
    pub fn reset(&mut self) {
        self.decision = Decision::Pending;
    }

    /// Returns true if a write or removal was requested.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        !matches!(self.decision, Decision::Pending)
    }

    /// Returns true if a removal was requested.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        matches!(self.decision, Decision::Remove)
    }

    /// Returns the current decision.
    #[must_use]
    pub fn decision(&self) -> &Decision<T> {
        &self.decision
    }

    /// Splits the context into its read result and decision.
    #[must_use]
    pub fn into_parts(self) -> (LoadResult<T>, Decision<T>) {
        (self.loaded, self.decision)
    }
}

/// Outcome of an update call.
#[derive(Debug, Clone)]
pub struct UpdateResult<T> {
    /// The resulting state: the committed value, `Absent` after a removal,
    /// or the original read state when nothing was written.
    pub result: LoadResult<T>,
    /// Whether a write was actually performed.
    pub written: bool,
}

impl<T> UpdateResult<T> {
    /// Creates an update result.
    #[must_use]
    pub fn new(result: LoadResult<T>, written: bool) -> Self {
        Self { result, written }
    }

    /// Creates the result of a transaction that did not write.
    #[must_use]
    pub fn unchanged(result: LoadResult<T>) -> Self {
        Self::new(result, false)
    }
}
