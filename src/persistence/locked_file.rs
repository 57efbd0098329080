// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash-safe file store with a manual transaction protocol.
//!
//! One logical name maps to four files:
//!
//! - `<name>` - the last committed value
//! - `<name>.new` - the value being written by an ongoing transaction
//! - `<name>.old` - the previous committed value while it is being replaced
//! - `<name>.lck` - held with an exclusive lock for the whole operation
//!
//! A commit writes and syncs `.new`, renames the committed file to `.old`
//! (from this point the change survives a crash), renames `.new` to the
//! committed name and deletes `.old`. Whatever combination a crash leaves
//! behind is resolved the next time the lock is taken.

use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::serializer::{JsonSerializer, ObjectSerializer};
use super::transaction::{Decision, LoadResult, TransactionContext, UpdateResult};
use super::DataPersister;
use crate::error::StoreError;

/// Retry policy for acquiring the lock file.
///
/// Attempts are separated by a linearly growing delay: `step` after the
/// first failure, `2 * step` after the second, and so on.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hubrelay::persistence::LockPolicy;
///
/// let policy = LockPolicy::new()
///     .with_attempts(5)
///     .with_backoff_step(Duration::from_millis(50));
///
/// assert_eq!(policy.delay_after(3), Duration::from_millis(150));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    attempts: u32,
    backoff_step: Duration,
}

impl LockPolicy {
    /// Default number of lock attempts.
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    /// Default backoff step between attempts.
    pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(100);

    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of attempts (at least one attempt is always made).
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Sets the backoff step.
    #[must_use]
    pub fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    /// Returns the number of attempts.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: Self::DEFAULT_ATTEMPTS,
            backoff_step: Self::DEFAULT_BACKOFF_STEP,
        }
    }
}

/// Transactional [`DataPersister`] storing one value in a file.
///
/// Do not touch the files from anywhere else: the protocol relies on being
/// the only writer. Within a process all operations on one instance are
/// serialized; across processes the lock file only deters concurrent
/// access, so share a single instance per file.
///
/// # Examples
///
/// ```no_run
/// use hubrelay::persistence::{DataPersister, LoadResult, LockedFilePersister};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> hubrelay::Result<()> {
/// let store = LockedFilePersister::<Vec<String>>::json("names.json");
/// let cancel = CancellationToken::new();
///
/// store.update(&cancel, |ctx| ctx.commit(vec!["kitchen".into()])).await?;
///
/// if let LoadResult::Present(names) = store.load(&cancel).await {
///     println!("{names:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct LockedFilePersister<T, S = JsonSerializer> {
    committed: PathBuf,
    new: PathBuf,
    old: PathBuf,
    lock: PathBuf,
    serializer: S,
    policy: LockPolicy,
    gate: Mutex<()>,
    _value: PhantomData<fn() -> T>,
}

impl<T> LockedFilePersister<T, JsonSerializer> {
    /// Creates a JSON-backed store for the given file.
    #[must_use]
    pub fn json(path: impl AsRef<Path>) -> Self {
        Self::new(path, JsonSerializer::new())
    }
}

impl<T, S> LockedFilePersister<T, S> {
    /// Creates a store for the given file using a custom serializer.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, serializer: S) -> Self {
        let path = path.as_ref();
        let committed = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        Self {
            new: sibling(&committed, ".new"),
            old: sibling(&committed, ".old"),
            lock: sibling(&committed, ".lck"),
            committed,
            serializer,
            policy: LockPolicy::default(),
            gate: Mutex::new(()),
            _value: PhantomData,
        }
    }

    /// Sets the lock acquisition policy.
    #[must_use]
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the path of the committed file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.committed
    }

    /// Returns the lock policy.
    #[must_use]
    pub fn lock_policy(&self) -> LockPolicy {
        self.policy
    }

    /// Takes the gate and the lock file, then reconciles.
    ///
    /// The parent directory is created only when `ensure_parent` is set.
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        ensure_parent: bool,
    ) -> Result<(MutexGuard<'_, ()>, FileLock), StoreError> {
        let gate = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StoreError::Cancelled),
            guard = self.gate.lock() => guard,
        };

        if ensure_parent {
            self.ensure_parent_dir().await?;
        }

        let lock = self.lock_file(cancel).await?;
        self.reconcile().await?;

        Ok((gate, lock))
    }

    async fn lock_file(&self, cancel: &CancellationToken) -> Result<FileLock, StoreError> {
        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            match FileLock::try_acquire(&self.lock) {
                Ok(lock) => return Ok(lock),
                Err(error) => {
                    debug!(path = %self.lock.display(), attempt, %error, "Lock file is busy");
                    if attempt < attempts {
                        tokio::select! {
                            () = cancel.cancelled() => return Err(StoreError::Cancelled),
                            () = tokio::time::sleep(self.policy.delay_after(attempt)) => {}
                        }
                    }
                }
            }
        }

        Err(StoreError::LockTimeout {
            path: self.lock.clone(),
            attempts,
        })
    }

    async fn ensure_parent_dir(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.committed.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        Ok(())
    }

    /// Returns false when no file of this store can exist yet.
    async fn parent_exists(&self) -> Result<bool, StoreError> {
        match self.committed.parent() {
            Some(parent) => exists(parent).await,
            None => Ok(true),
        }
    }

    /// Resolves whatever an interrupted transaction left behind.
    async fn reconcile(&self) -> Result<(), StoreError> {
        let old_exists = exists(&self.old).await?;
        let mut committed_exists = exists(&self.committed).await?;
        let mut new_exists = exists(&self.new).await?;

        if old_exists && committed_exists && new_exists {
            warn!(
                path = %self.committed.display(),
                "Inconsistent transaction files found; make sure all access goes through the same store"
            );
            remove(&self.old).await?;
            rename(&self.committed, &self.old).await?;
            committed_exists = false;
        }

        if old_exists && new_exists {
            info!(path = %self.committed.display(), "Rolling forward interrupted transaction");
            rename(&self.new, &self.committed).await?;
            new_exists = false;
            committed_exists = true;
        }

        if old_exists && committed_exists {
            remove(&self.old).await?;
        }

        if new_exists {
            warn!(path = %self.committed.display(), "Rolling back interrupted transaction");
            remove(&self.new).await?;
        }

        Ok(())
    }

    async fn remove_committed(&self) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(&self.committed).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&self.committed, e)),
        }
    }
}

impl<T, S> LockedFilePersister<T, S>
where
    T: Serialize + DeserializeOwned,
    S: ObjectSerializer,
{
    async fn read(&self) -> LoadResult<T> {
        match tokio::fs::read(&self.committed).await {
            Ok(bytes) => match self.serializer.decode(&bytes) {
                Ok(value) => LoadResult::Present(value),
                Err(e) => LoadResult::error(e.into()),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => LoadResult::Absent,
            Err(e) => LoadResult::error(StoreError::io(&self.committed, e)),
        }
    }

    async fn write(&self, value: &T) -> Result<(), StoreError> {
        let bytes = self.serializer.encode(value)?;

        let mut file = tokio::fs::File::create(&self.new)
            .await
            .map_err(|e| StoreError::io(&self.new, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StoreError::io(&self.new, e))?;
        file.flush().await.map_err(|e| StoreError::io(&self.new, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(&self.new, e))?;
        drop(file);

        if exists(&self.committed).await? {
            // Once committed is renamed to old, the change survives a crash
            // through roll-forward.
            rename(&self.committed, &self.old).await?;
            rename(&self.new, &self.committed).await?;
            remove(&self.old).await?;
        } else {
            rename(&self.new, &self.committed).await?;
        }

        Ok(())
    }
}

impl<T, S> DataPersister<T> for LockedFilePersister<T, S>
where
    T: Serialize + DeserializeOwned + Send + Sync,
    S: ObjectSerializer,
{
    async fn load(&self, cancel: &CancellationToken) -> LoadResult<T> {
        if cancel.is_cancelled() {
            return LoadResult::error(StoreError::Cancelled);
        }
        // Loading never creates anything on disk.
        match self.parent_exists().await {
            Ok(true) => {}
            Ok(false) => return LoadResult::Absent,
            Err(e) => return LoadResult::error(e),
        }

        match self.acquire(cancel, false).await {
            Ok(_guards) => self.read().await,
            Err(e) => LoadResult::error(e),
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
        let _guards = self.acquire(cancel, true).await?;

        let loaded = self.read().await;
        let (loaded, decision) = updater(TransactionContext::new(loaded))
            .await
            .into_parts();

        match decision {
            Decision::Pending => Ok(UpdateResult::unchanged(loaded)),
            Decision::Remove => {
                let existed = self.remove_committed().await?;
                Ok(UpdateResult::new(LoadResult::Absent, existed))
            }
            Decision::Commit(value) => {
                self.write(&value).await?;
                Ok(UpdateResult::new(LoadResult::Present(value), true))
            }
        }
    }
}

impl<T, S: std::fmt::Debug> std::fmt::Debug for LockedFilePersister<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedFilePersister")
            .field("path", &self.committed)
            .field("serializer", &self.serializer)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Exclusive lock on the `.lck` file, released and deleted on drop.
struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    fn try_acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => Ok(Self {
                _file: file,
                path: path.to_path_buf(),
            }),
            Err(TryLockError::WouldBlock) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "lock is held by another owner",
            )),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The file handle closes (and unlocks) after the path is removed.
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to delete lock file");
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn exists(path: &Path) -> Result<bool, StoreError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

async fn rename(from: &Path, to: &Path) -> Result<(), StoreError> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| StoreError::io(from, e))
}

async fn remove(path: &Path) -> Result<(), StoreError> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| StoreError::io(path, e))
}
