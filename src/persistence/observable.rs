// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decorator streaming committed values to observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::{DataPersister, ObservableDataPersister};
use super::transaction::{LoadResult, TransactionContext, UpdateResult};
use crate::error::StoreError;

/// Default capacity of the update channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A value stamped with the write sequence that produced it.
#[derive(Debug, Clone)]
struct Versioned<T> {
    version: u64,
    value: LoadResult<T>,
}

/// Decorates a [`DataPersister`] so that its value can be observed.
///
/// Writes go through a single asynchronous gate; every successful write is
/// stamped with an increasing sequence number and broadcast.
///
/// Two ways to observe:
///
/// - [`observe`](Self::observe) yields only values written from now on;
/// - [`get_and_observe`](Self::get_and_observe) first yields the current
///   value, then every newer one. All such observations share one
///   background pipeline, started by the first observer and stopped when the
///   last one is dropped.
///
/// # Examples
///
/// ```
/// use hubrelay::persistence::{DataPersister, MemoryPersister, ObservablePersister};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = ObservablePersister::new(MemoryPersister::with_value(1));
/// let cancel = CancellationToken::new();
///
/// let mut observation = store.get_and_observe();
/// assert_eq!(observation.next().await.unwrap().value(), Some(&1));
///
/// store.update(&cancel, |ctx| ctx.commit(2)).await.unwrap();
/// assert_eq!(observation.next().await.unwrap().value(), Some(&2));
/// # }
/// ```
pub struct ObservablePersister<T, P> {
    shared: Arc<Shared<T, P>>,
}

struct Shared<T, P> {
    inner: P,
    gate: Mutex<()>,
    sequence: AtomicU64,
    capacity: usize,
    updates: broadcast::Sender<Versioned<T>>,
    pipeline: parking_lot::Mutex<Weak<Pipeline<T>>>,
}

/// Background task shared by every [`Observation`].
struct Pipeline<T> {
    replay: Arc<Replay<T>>,
    _stop: DropGuard,
}

/// Last value forwarded by the pipeline, and the values forwarded since.
struct Replay<T> {
    latest: parking_lot::Mutex<Option<Versioned<T>>>,
    tail: broadcast::Sender<Versioned<T>>,
}

impl<T: Clone> Replay<T> {
    fn publish(&self, update: Versioned<T>) {
        let mut latest = self.latest.lock();
        // No observer is fine.
        let _ = self.tail.send(update.clone());
        *latest = Some(update);
    }

    /// Returns the last value and a receiver of every later one.
    fn attach(&self) -> (Option<Versioned<T>>, broadcast::Receiver<Versioned<T>>) {
        let latest = self.latest.lock();
        (latest.clone(), self.tail.subscribe())
    }
}

impl<T, P> ObservablePersister<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: DataPersister<T> + 'static,
{
    /// Wraps a persister.
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self::with_capacity(inner, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Wraps a persister with a custom update channel capacity.
    ///
    /// Observers lagging by more than `capacity` writes skip straight to
    /// newer values.
    #[must_use]
    pub fn with_capacity(inner: P, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (updates, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                inner,
                gate: Mutex::new(()),
                sequence: AtomicU64::new(0),
                capacity,
                updates,
                pipeline: parking_lot::Mutex::new(Weak::new()),
            }),
        }
    }

    /// Returns a stream of values produced by successful writes.
    #[must_use]
    pub fn observe(&self) -> UpdateStream<T> {
        UpdateStream {
            receiver: self.shared.updates.subscribe(),
        }
    }

    /// Returns a stream yielding the current value, then every newer one.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn get_and_observe(&self) -> Observation<T> {
        let mut slot = self.shared.pipeline.lock();
        let pipeline = if let Some(pipeline) = slot.upgrade() {
            pipeline
        } else {
            let pipeline = Arc::new(self.start_pipeline());
            *slot = Arc::downgrade(&pipeline);
            pipeline
        };

        let (pending, receiver) = pipeline.replay.attach();
        Observation {
            pending,
            receiver,
            last_version: None,
            _pipeline: pipeline,
        }
    }

    /// Returns true while at least one [`Observation`] is alive.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.shared.pipeline.lock().strong_count() > 0
    }

    /// Returns the decorated persister.
    #[must_use]
    pub fn inner(&self) -> &P {
        &self.shared.inner
    }

    fn start_pipeline(&self) -> Pipeline<T> {
        let (tail, _) = broadcast::channel(self.shared.capacity);
        let replay = Arc::new(Replay {
            latest: parking_lot::Mutex::new(None),
            tail,
        });
        let stop = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&replay);
        let token = stop.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = shared.run_pipeline(&sink, &token) => {}
            }
        });

        Pipeline {
            replay,
            _stop: stop.drop_guard(),
        }
    }
}

impl<T, P> Shared<T, P>
where
    T: Clone + Send + Sync,
    P: DataPersister<T>,
{
    async fn run_pipeline(&self, sink: &Replay<T>, cancel: &CancellationToken) {
        // Subscribe before loading so that no write falls in between.
        let mut updates = self.updates.subscribe();

        let initial = {
            let _gate = self.gate.lock().await;
            Versioned {
                version: self.sequence.load(Ordering::Acquire),
                value: self.inner.load(cancel).await,
            }
        };
        let mut last = initial.version;
        sink.publish(initial);

        loop {
            match updates.recv().await {
                Ok(update) if update.version > last => {
                    last = update.version;
                    sink.publish(update);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Observation pipeline lagged behind updates");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

impl<T, P> DataPersister<T> for ObservablePersister<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: DataPersister<T> + 'static,
{
    async fn load(&self, cancel: &CancellationToken) -> LoadResult<T> {
        self.shared.inner.load(cancel).await
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
        let _gate = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StoreError::Cancelled),
            gate = self.shared.gate.lock() => gate,
        };

        let result = self.shared.inner.update_async(cancel, updater).await?;

        if result.written {
            let version = self.shared.sequence.fetch_add(1, Ordering::AcqRel) + 1;
            // No receivers is fine.
            let _ = self.shared.updates.send(Versioned {
                version,
                value: result.result.clone(),
            });
        }

        Ok(result)
    }
}

impl<T, P> ObservableDataPersister<T> for ObservablePersister<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: DataPersister<T> + 'static,
{
    fn observe(&self) -> UpdateStream<T> {
        Self::observe(self)
    }

    fn get_and_observe(&self) -> Observation<T> {
        Self::get_and_observe(self)
    }
}

impl<T, P> Clone for ObservablePersister<T, P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, P: std::fmt::Debug> std::fmt::Debug for ObservablePersister<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservablePersister")
            .field("inner", &self.shared.inner)
            .field("sequence", &self.shared.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Values produced by writes, in commit order.
#[derive(Debug)]
pub struct UpdateStream<T> {
    receiver: broadcast::Receiver<Versioned<T>>,
}

impl<T: Clone> UpdateStream<T> {
    /// Waits for the next written value.
    ///
    /// Returns `None` once the persister is gone.
    pub async fn next(&mut self) -> Option<LoadResult<T>> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update.value),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Update stream lagged behind writes");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// The current value followed by every later write, in commit order.
///
/// Values are never repeated nor received out of order. Like
/// [`UpdateStream`], a consumer lagging behind by more than the channel
/// capacity skips to newer values.
pub struct Observation<T> {
    pending: Option<Versioned<T>>,
    receiver: broadcast::Receiver<Versioned<T>>,
    last_version: Option<u64>,
    _pipeline: Arc<Pipeline<T>>,
}

impl<T: Clone> Observation<T> {
    /// Waits for the next value.
    ///
    /// Returns `None` if the pipeline stopped.
    pub async fn next(&mut self) -> Option<LoadResult<T>> {
        if let Some(current) = self.pending.take() {
            self.last_version = Some(current.version);
            return Some(current.value);
        }

        loop {
            match self.receiver.recv().await {
                Ok(update) if self.last_version.is_none_or(|last| update.version > last) => {
                    self.last_version = Some(update.version);
                    return Some(update.value);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Observation lagged behind writes");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl<T> std::fmt::Debug for Observation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("last_version", &self.last_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::persistence::MemoryPersister;

    fn store() -> ObservablePersister<u32, MemoryPersister<u32>> {
        ObservablePersister::new(MemoryPersister::new())
    }

    async fn commit(store: &ObservablePersister<u32, MemoryPersister<u32>>, value: u32) {
        store
            .update(&CancellationToken::new(), |ctx| ctx.commit(value))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn late_observer_sees_latest_commit_first() {
        let store = store();
        commit(&store, 1).await;
        commit(&store, 2).await;

        let mut observation = store.get_and_observe();
        assert_eq!(observation.next().await.unwrap().value(), Some(&2));

        commit(&store, 3).await;
        assert_eq!(observation.next().await.unwrap().value(), Some(&3));

        commit(&store, 4).await;
        assert_eq!(observation.next().await.unwrap().value(), Some(&4));
    }

    #[tokio::test]
    async fn empty_store_is_observed_as_absent() {
        let store = store();

        let mut observation = store.get_and_observe();
        assert!(observation.next().await.unwrap().is_absent());
    }

    #[tokio::test]
    async fn observe_yields_only_writes() {
        let store = store();
        commit(&store, 1).await;

        let mut updates = store.observe();
        commit(&store, 2).await;

        // No-op update: nothing written, nothing emitted.
        store
            .update(&CancellationToken::new(), |_ctx| {})
            .await
            .unwrap();
        commit(&store, 3).await;

        assert_eq!(updates.next().await.unwrap().value(), Some(&2));
        assert_eq!(updates.next().await.unwrap().value(), Some(&3));
    }

    #[tokio::test]
    async fn observations_never_go_backwards() {
        let store = store();
        let mut observation = store.get_and_observe();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for value in 1..=50 {
                    commit(&store, value).await;
                }
            })
        };

        let mut last = 0;
        while last < 50 {
            let value = *observation.next().await.unwrap().value().unwrap_or(&0);
            assert!(value >= last, "observed {value} after {last}");
            last = value;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn pipeline_is_shared_and_released() {
        let store = store();
        commit(&store, 1).await;

        let mut first = store.get_and_observe();
        assert_eq!(first.next().await.unwrap().value(), Some(&1));
        assert!(store.is_observed());

        // Bypass the decorator: the running pipeline does not see this.
        store
            .inner()
            .update(&CancellationToken::new(), |ctx| ctx.commit(7))
            .await
            .unwrap();

        let mut second = store.get_and_observe();
        assert_eq!(second.next().await.unwrap().value(), Some(&1));

        drop(first);
        drop(second);
        assert!(!store.is_observed());

        // A new observer restarts the pipeline and loads afresh.
        let mut third = store.get_and_observe();
        assert_eq!(third.next().await.unwrap().value(), Some(&7));
    }

    #[tokio::test]
    async fn observation_receives_every_commit_in_order() {
        let store = store();
        let mut observation = store.get_and_observe();
        assert!(observation.next().await.unwrap().is_absent());

        for value in 1..=3 {
            commit(&store, value).await;
        }

        let mut seen = Vec::new();
        while let Ok(Some(value)) =
            tokio::time::timeout(Duration::from_millis(50), observation.next()).await
        {
            seen.push(*value.value().unwrap());
        }
        assert_eq!(seen, [1, 2, 3]);
    }

    #[tokio::test]
    async fn next_waits_for_a_newer_value() {
        let store = store();
        let mut observation = store.get_and_observe();
        observation.next().await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(20), observation.next()).await;
        assert!(pending.is_err());
    }
}
