// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device tracking of live status.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::Callback;
use super::delivery::{NotificationSender, deliver};
use crate::config::RelayConfig;
use crate::device::{DeviceId, DeviceStatus, ProviderSet, StatusStream};
use crate::error::StatusError;

/// Lifecycle of the tracking subscription of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingState {
    /// Not tracked, or no provider knows the device.
    Idle,
    /// Following the live status of the device.
    Subscribed,
    /// Posting a status to the device's callbacks.
    Delivering,
    /// Waiting before subscribing again after a failure.
    Retrying {
        /// Number of failures since tracking started.
        attempt: u32,
    },
}

impl TrackingState {
    /// Returns true while the live status is followed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Subscribed | Self::Delivering)
    }
}

/// What every tracking subscription shares.
pub(crate) struct TrackingContext<S> {
    pub providers: ProviderSet,
    pub sender: Arc<S>,
    pub config: RelayConfig,
}

/// Handle on the tracking task of one device.
///
/// Dropping the handle stops the task.
pub(crate) struct Tracker {
    callbacks: Arc<[Callback]>,
    state: watch::Receiver<TrackingState>,
    _stop: DropGuard,
}

impl Tracker {
    /// Starts tracking a device, delivering to a fixed callback snapshot.
    pub fn spawn<S: NotificationSender>(
        device: DeviceId,
        callbacks: Arc<[Callback]>,
        context: Arc<TrackingContext<S>>,
        parent: &CancellationToken,
    ) -> Self {
        let stop = parent.child_token();
        let (state_tx, state) = watch::channel(TrackingState::Idle);

        let token = stop.clone();
        let snapshot = Arc::clone(&callbacks);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = track(&device, &snapshot, &context, &state_tx) => {}
            }
            state_tx.send_replace(TrackingState::Idle);
            debug!(device_id = %device, "Tracking stopped");
        });

        Self {
            callbacks,
            state,
            _stop: stop.drop_guard(),
        }
    }

    pub fn callbacks(&self) -> &Arc<[Callback]> {
        &self.callbacks
    }

    pub fn state(&self) -> TrackingState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TrackingState> {
        self.state.clone()
    }
}

/// Supervisor: follows the status stream and subscribes again after a
/// failure, forever.
async fn track<S: NotificationSender>(
    device: &DeviceId,
    callbacks: &[Callback],
    context: &TrackingContext<S>,
    state: &watch::Sender<TrackingState>,
) {
    let mut failures = 0;

    loop {
        let Some(stream) = context.providers.try_observe_status(device) else {
            warn!(device_id = %device, "No provider knows this device, not tracking it");
            return;
        };

        state.send_replace(TrackingState::Subscribed);
        let error = follow(device, callbacks, context, stream, state).await;

        failures += 1;
        let delay = context.config.resubscribe_delay();
        warn!(device_id = %device, %error, ?delay, "Status tracking failed, subscribing again");
        state.send_replace(TrackingState::Retrying { attempt: failures });
        tokio::time::sleep(delay).await;
    }
}

/// Delivers every distinct status, and the last one again on every
/// refresh tick, until the stream fails.
///
/// A new status restarts the refresh timer, with an immediate first tick.
/// A new tick cancels the delivery still in flight.
async fn follow<S: NotificationSender>(
    device: &DeviceId,
    callbacks: &[Callback],
    context: &TrackingContext<S>,
    mut stream: StatusStream,
    state: &watch::Sender<TrackingState>,
) -> StatusError {
    let refresh = context.config.refresh_interval();
    let policy = context.config.delivery_retry();
    // Dropping a delivery future aborts it, so this token is never cancelled.
    let never = CancellationToken::new();

    let mut last: Option<Arc<DeviceStatus>> = None;
    let mut ticker: Option<Interval> = None;
    let mut delivery: Option<BoxFuture<'_, usize>> = None;
    let mut upstream_open = true;

    loop {
        tokio::select! {
            item = stream.next(), if upstream_open => match item {
                Some(Ok(status)) => {
                    if last.as_deref() == Some(&status) {
                        continue;
                    }
                    info!(device_id = %device, %status, "Device status changed");
                    last = Some(Arc::new(status));

                    let mut interval = tokio::time::interval(refresh);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker = Some(interval);
                }
                Some(Err(error)) => return error,
                None => {
                    debug!(device_id = %device, "Status stream ended, refreshing the last status");
                    upstream_open = false;
                }
            },
            () = next_tick(&mut ticker) => {
                if let Some(status) = last.clone() {
                    let never = never.clone();
                    delivery = Some(Box::pin(async move {
                        deliver(&*context.sender, device, callbacks, &status, policy, &never).await
                    }));
                    state.send_replace(TrackingState::Delivering);
                }
            },
            delivered = next_delivery(&mut delivery) => {
                debug!(device_id = %device, delivered, "Delivery finished");
                delivery = None;
                state.send_replace(TrackingState::Subscribed);
            },
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_delivery(delivery: &mut Option<BoxFuture<'_, usize>>) -> usize {
    match delivery {
        Some(delivery) => delivery.await,
        None => std::future::pending().await,
    }
}
