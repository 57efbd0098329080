// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decorator mapping absent and default values to a custom default.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::DataPersister;
use super::transaction::{Decision, LoadResult, TransactionContext, UpdateResult};
use crate::error::StoreError;

/// Set of translation policies applied by a [`DefaultValueDecorator`].
///
/// # Examples
///
/// ```
/// use hubrelay::persistence::DefaultValueMode;
///
/// let mode = DefaultValueMode::READ_EMPTY_TO_CUSTOM_DEFAULT
///     | DefaultValueMode::WRITE_CUSTOM_DEFAULT_TO_EMPTY;
///
/// assert!(mode.contains(DefaultValueMode::READ_EMPTY_TO_CUSTOM_DEFAULT));
/// assert!(!mode.contains(DefaultValueMode::READ_ERROR_TO_CUSTOM_DEFAULT));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DefaultValueMode(u8);

impl DefaultValueMode {
    /// No translation.
    pub const NONE: Self = Self(0);
    /// An absent value is read as the custom default.
    pub const READ_EMPTY_TO_CUSTOM_DEFAULT: Self = Self(0x01);
    /// A value equal to `T::default()` is read as the custom default.
    pub const READ_DEFAULT_TO_CUSTOM_DEFAULT: Self = Self(0x02);
    /// A failed read is reported as the custom default.
    pub const READ_ERROR_TO_CUSTOM_DEFAULT: Self = Self(0x04);
    /// Committing the custom default removes the stored value.
    pub const WRITE_CUSTOM_DEFAULT_TO_EMPTY: Self = Self(0x08);
    /// Committing `T::default()` removes the stored value.
    pub const WRITE_DEFAULT_TO_EMPTY: Self = Self(0x10);
    /// Every policy.
    pub const ALL: Self = Self(0x1F);

    /// Returns true if every policy in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for DefaultValueMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for DefaultValueMode {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

type Comparer<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Decorates a [`DataPersister`] so that absent or default values are seen
/// (and stored) as an explicit custom default.
///
/// Reads are translated in this order, first match wins: error, absent,
/// equal to `T::default()`. Commits of the custom default or of
/// `T::default()` become removals when the matching write policy is set.
///
/// The equality comparison is always supplied by the caller.
///
/// # Examples
///
/// ```
/// use hubrelay::persistence::{
///     DataPersister, DefaultValueDecorator, DefaultValueMode, MemoryPersister,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = DefaultValueDecorator::with_partial_eq(
///     MemoryPersister::<u32>::new(),
///     DefaultValueMode::READ_EMPTY_TO_CUSTOM_DEFAULT,
///     42,
/// );
///
/// let value = store.load(&CancellationToken::new()).await;
/// assert_eq!(value.value(), Some(&42));
/// # }
/// ```
pub struct DefaultValueDecorator<T, P> {
    inner: P,
    mode: DefaultValueMode,
    custom_default: T,
    language_default: T,
    comparer: Comparer<T>,
}

impl<T: Default + 'static, P> DefaultValueDecorator<T, P> {
    /// Creates a decorator with an explicit equality comparison.
    #[must_use]
    pub fn new<C>(inner: P, mode: DefaultValueMode, custom_default: T, comparer: C) -> Self
    where
        C: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner,
            mode,
            custom_default,
            language_default: T::default(),
            comparer: Arc::new(comparer),
        }
    }

    /// Creates a decorator comparing values with `PartialEq`.
    #[must_use]
    pub fn with_partial_eq(inner: P, mode: DefaultValueMode, custom_default: T) -> Self
    where
        T: PartialEq,
    {
        Self::new(inner, mode, custom_default, T::eq)
    }
}

impl<T, P> DefaultValueDecorator<T, P> {
    /// Returns the configured policies.
    #[must_use]
    pub fn mode(&self) -> DefaultValueMode {
        self.mode
    }

    /// Returns the custom default value.
    #[must_use]
    pub fn custom_default(&self) -> &T {
        &self.custom_default
    }

    /// Returns the decorated persister.
    #[must_use]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn translate_write(&self, decision: Decision<T>) -> Decision<T> {
        match decision {
            Decision::Commit(value)
                if self
                    .mode
                    .contains(DefaultValueMode::WRITE_CUSTOM_DEFAULT_TO_EMPTY)
                    && (self.comparer)(&value, &self.custom_default) =>
            {
                Decision::Remove
            }
            Decision::Commit(value)
                if self.mode.contains(DefaultValueMode::WRITE_DEFAULT_TO_EMPTY)
                    && (self.comparer)(&value, &self.language_default) =>
            {
                Decision::Remove
            }
            other => other,
        }
    }
}

impl<T: Clone, P> DefaultValueDecorator<T, P> {
    fn translate_read(&self, result: LoadResult<T>) -> LoadResult<T> {
        match result {
            LoadResult::Error(_)
                if self
                    .mode
                    .contains(DefaultValueMode::READ_ERROR_TO_CUSTOM_DEFAULT) =>
            {
                LoadResult::Present(self.custom_default.clone())
            }
            LoadResult::Absent
                if self
                    .mode
                    .contains(DefaultValueMode::READ_EMPTY_TO_CUSTOM_DEFAULT) =>
            {
                LoadResult::Present(self.custom_default.clone())
            }
            LoadResult::Present(value)
                if self
                    .mode
                    .contains(DefaultValueMode::READ_DEFAULT_TO_CUSTOM_DEFAULT)
                    && (self.comparer)(&value, &self.language_default) =>
            {
                LoadResult::Present(self.custom_default.clone())
            }
            other => other,
        }
    }
}

impl<T, P> DataPersister<T> for DefaultValueDecorator<T, P>
where
    T: Clone + Send + Sync,
    P: DataPersister<T>,
{
    async fn load(&self, cancel: &CancellationToken) -> LoadResult<T> {
        self.translate_read(self.inner.load(cancel).await)
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
        let result = self
            .inner
            .update_async(cancel, move |mut ctx| async move {
                let seen = self.translate_read(ctx.loaded().clone());
                let (_, decision) = updater(TransactionContext::new(seen)).await.into_parts();

                match self.translate_write(decision) {
                    Decision::Pending => {}
                    Decision::Remove => ctx.remove_and_commit(),
                    Decision::Commit(value) => ctx.commit(value),
                }
                ctx
            })
            .await?;

        Ok(UpdateResult::new(
            self.translate_read(result.result),
            result.written,
        ))
    }
}

impl<T: fmt::Debug, P: fmt::Debug> fmt::Debug for DefaultValueDecorator<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultValueDecorator")
            .field("inner", &self.inner)
            .field("mode", &self.mode)
            .field("custom_default", &self.custom_default)
            .finish_non_exhaustive()
    }
}
