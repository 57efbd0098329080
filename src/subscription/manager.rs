// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback manager coordinating registration, tracking and scavenging.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::delivery::NotificationSender;
use super::tracking::{Tracker, TrackingContext, TrackingState};
use super::{Callback, CallbackRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::device::{DeviceId, ProviderSet};
use crate::error::StoreError;
use crate::persistence::{LoadResult, ObservableDataPersister};

/// Live tracking subscriptions, keyed by device.
type Trackers = Arc<Mutex<HashMap<DeviceId, Tracker>>>;

/// Manager of the callbacks registered by the hub.
///
/// The `CallbackManager` persists callbacks through an observable store and
/// keeps one tracking subscription per device that has callbacks. Each
/// tracking subscription follows the live status of its device and posts
/// it to the device's callbacks.
///
/// # Features
///
/// - **Durable registrations**: callbacks survive restarts through the store
/// - **Deduplicated delivery**: unchanged statuses are not posted twice
/// - **Keep-alive**: the last status is posted again every refresh interval
/// - **Retries**: each callback is retried on its own
/// - **Scavenging**: expired callbacks are removed periodically
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use chrono::Utc;
/// use hubrelay::device::{DeviceId, ProviderSet, PushProvider};
/// use hubrelay::subscription::{CallbackManager, HttpNotificationSender, SubscribeRequest};
/// use hubrelay::{RelayConfig, relay};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> hubrelay::Result<()> {
///     let config = RelayConfig::default();
///     let store = relay::build_registry_store("/var/lib/hubrelay/callbacks.json");
///     let providers = ProviderSet::builder().with_provider(PushProvider::new()).build();
///     let sender = HttpNotificationSender::from_config(&config)?;
///
///     let manager = CallbackManager::new(store, providers, sender).with_config(config);
///     manager.start();
///
///     // On SUBSCRIBE:
///     let request = SubscribeRequest::parse(Some("<http://hub.local/notify>"), Some("Second-3600"))?;
///     manager
///         .add_callback(&CancellationToken::new(), DeviceId::new("phone"), request.into_callback(Utc::now()))
///         .await?;
///
///     Ok(())
/// }
/// ```
pub struct CallbackManager<P, S> {
    store: Arc<P>,
    providers: ProviderSet,
    sender: Arc<S>,
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    trackers: Trackers,
    running: Mutex<Option<CancellationToken>>,
}

impl<P, S> CallbackManager<P, S>
where
    P: ObservableDataPersister<CallbackRegistry> + 'static,
    S: NotificationSender,
{
    /// Creates a manager with default timings and the system clock.
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    #[must_use]
    pub fn new(store: P, providers: ProviderSet, sender: S) -> Self {
        Self {
            store: Arc::new(store),
            providers,
            sender: Arc::new(sender),
            config: RelayConfig::default(),
            clock: Arc::new(SystemClock),
            trackers: Arc::new(Mutex::new(HashMap::new())),
            running: Mutex::new(None),
        }
    }

    /// Sets the timings.
    #[must_use]
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock used to expire callbacks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the store holding the registry.
    #[must_use]
    pub fn store(&self) -> &P {
        &self.store
    }

    /// Returns the timings.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a callback for a device.
    ///
    /// The callback is appended to the device's collection, which is created
    /// if needed. Repeated registrations accumulate until they expire.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the registry cannot be loaded or written.
    pub async fn add_callback(
        &self,
        cancel: &CancellationToken,
        device: DeviceId,
        callback: Callback,
    ) -> Result<(), StoreError> {
        debug!(device_id = %device, uri = %callback.uri(), "Adding callback");

        let result = self
            .store
            .as_ref()
            .update(cancel, move |ctx| {
                let next = match ctx.loaded() {
                    LoadResult::Present(registry) => registry.with_callback(device, callback),
                    LoadResult::Absent => CallbackRegistry::new().with_callback(device, callback),
                    LoadResult::Error(_) => return,
                };
                ctx.commit(next);
            })
            .await?;

        match result.result {
            LoadResult::Error(error) => Err(StoreError::Load(error)),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Scavenging
    // =========================================================================

    /// Removes every callback that expired, returning how many were removed.
    ///
    /// Devices left without callbacks are removed. Nothing is written when
    /// no callback expired.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the registry cannot be loaded or written.
    pub async fn scavenge(&self, cancel: &CancellationToken) -> Result<usize, StoreError> {
        scavenge(self.store.as_ref(), self.clock.as_ref(), cancel).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts observing the registry and scavenging.
    ///
    /// Must be called from within a Tokio runtime. Calling it again while
    /// running does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let context = Arc::new(TrackingContext {
            providers: self.providers.clone(),
            sender: Arc::clone(&self.sender),
            config: self.config.clone(),
        });

        tokio::spawn(observe_registry(
            Arc::clone(&self.store),
            Arc::clone(&self.trackers),
            context,
            self.config.storage_retry_delay(),
            cancel.clone(),
        ));
        tokio::spawn(scavenge_periodically(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.scavenge_interval(),
            cancel.clone(),
        ));

        info!("Callback manager started");
        *running = Some(cancel);
    }

    /// Stops every background task and tracking subscription.
    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
            self.trackers.lock().clear();
            info!("Callback manager stopped");
        }
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    // =========================================================================
    // Tracking
    // =========================================================================

    /// Returns the devices with registered callbacks, ordered by id.
    ///
    /// A device is listed whether its tracking subscription is active or
    /// `Idle`, for example when no provider knows it.
    #[must_use]
    pub fn tracked_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self.trackers.lock().keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Returns the tracking state of a device.
    ///
    /// Devices without a tracking subscription are `Idle`.
    #[must_use]
    pub fn tracking_state(&self, device: &DeviceId) -> TrackingState {
        self.trackers
            .lock()
            .get(device)
            .map_or(TrackingState::Idle, Tracker::state)
    }

    /// Watches the tracking state of a device's current subscription.
    #[must_use]
    pub fn watch_tracking_state(&self, device: &DeviceId) -> Option<watch::Receiver<TrackingState>> {
        self.trackers.lock().get(device).map(Tracker::watch_state)
    }
}

impl<P, S> Drop for CallbackManager<P, S> {
    fn drop(&mut self) {
        if let Some(cancel) = self.running.get_mut().take() {
            cancel.cancel();
        }
    }
}

impl<P, S> std::fmt::Debug for CallbackManager<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackManager")
            .field("config", &self.config)
            .field("tracked", &self.trackers.lock().len())
            .field("running", &self.running.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Follows the registry and keeps one tracker per device, re-observing
/// after a load error.
async fn observe_registry<P, S>(
    store: Arc<P>,
    trackers: Trackers,
    context: Arc<TrackingContext<S>>,
    retry_delay: std::time::Duration,
    cancel: CancellationToken,
) where
    P: ObservableDataPersister<CallbackRegistry>,
    S: NotificationSender,
{
    loop {
        let mut observation = store.as_ref().get_and_observe();

        loop {
            let snapshot = tokio::select! {
                () = cancel.cancelled() => return,
                snapshot = observation.next() => snapshot,
            };

            match snapshot {
                Some(LoadResult::Present(registry)) => {
                    sync_trackers(&trackers, &registry, &context, &cancel);
                }
                Some(LoadResult::Absent) => {
                    sync_trackers(&trackers, &CallbackRegistry::new(), &context, &cancel);
                }
                Some(LoadResult::Error(error)) => {
                    warn!(%error, delay = ?retry_delay, "Failed to load callbacks, observing again");
                    break;
                }
                None => {
                    warn!(delay = ?retry_delay, "Callback observation ended, observing again");
                    break;
                }
            }
        }

        drop(observation);
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(retry_delay) => {}
        }
    }
}

/// Keeps trackers whose callbacks are unchanged, replaces the others, and
/// drops those of devices no longer registered.
fn sync_trackers<S: NotificationSender>(
    trackers: &Mutex<HashMap<DeviceId, Tracker>>,
    registry: &CallbackRegistry,
    context: &Arc<TrackingContext<S>>,
    cancel: &CancellationToken,
) {
    let mut trackers = trackers.lock();
    // Checked under the lock: once `stop` has cancelled and cleared, no
    // snapshot still in flight may repopulate the map.
    if cancel.is_cancelled() {
        return;
    }

    trackers.retain(|device, tracker| {
        let keep = registry
            .get(device)
            .is_some_and(|callbacks| tracker.callbacks() == callbacks);
        if !keep {
            debug!(device_id = %device, "Dropping tracking subscription");
        }
        keep
    });

    for (device, callbacks) in registry.iter() {
        if !trackers.contains_key(device) {
            debug!(device_id = %device, callbacks = callbacks.len(), "Starting tracking subscription");
            let tracker = Tracker::spawn(
                device.clone(),
                Arc::clone(callbacks),
                Arc::clone(context),
                cancel,
            );
            trackers.insert(device.clone(), tracker);
        }
    }
}

async fn scavenge<P>(
    store: &P,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<usize, StoreError>
where
    P: ObservableDataPersister<CallbackRegistry>,
{
    let now = clock.now();
    let mut removed = 0;

    let result = store
        .update(cancel, |ctx| {
            if let Some(registry) = ctx.value() {
                let (next, count) = registry.without_expired(now);
                if count > 0 {
                    removed = count;
                    ctx.commit(next);
                }
            }
        })
        .await?;

    if let LoadResult::Error(error) = result.result {
        return Err(StoreError::Load(error));
    }
    Ok(removed)
}

async fn scavenge_periodically<P>(
    store: Arc<P>,
    clock: Arc<dyn Clock>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) where
    P: ObservableDataPersister<CallbackRegistry>,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }

        match scavenge(store.as_ref(), clock.as_ref(), &cancel).await {
            Ok(0) => debug!("No expired callbacks"),
            Ok(removed) => info!(removed, "Removed expired callbacks"),
            Err(StoreError::Cancelled) => return,
            Err(error) => warn!(%error, "Failed to remove expired callbacks"),
        }
    }
}
