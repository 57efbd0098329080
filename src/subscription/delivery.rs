// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification delivery to registered callbacks.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use super::Callback;
use crate::config::{RelayConfig, RetryPolicy};
use crate::device::{DEVICE_HEADER, DeviceId, DeviceStatus};
use crate::error::DeliveryError;

/// Transport posting one notification to one callback.
pub trait NotificationSender: Send + Sync + 'static {
    /// Posts `status` of `device` to `uri`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the request fails or is not answered with
    /// a success status.
    fn send(
        &self,
        uri: &Url,
        device: &DeviceId,
        status: &DeviceStatus,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// [`NotificationSender`] posting JSON over HTTP.
///
/// Each notification is a `POST` with the status as JSON body and the
/// device id in the `Smartthings-Device` header. Any 2xx answer is a
/// success.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hubrelay::subscription::HttpNotificationSender;
///
/// let sender = HttpNotificationSender::new(Duration::from_secs(5))?;
/// # Ok::<(), hubrelay::error::DeliveryError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HttpNotificationSender {
    client: Client,
}

impl HttpNotificationSender {
    /// Creates a sender whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DeliveryError::Http)?;

        Ok(Self { client })
    }

    /// Creates a sender using the HTTP timeout of a relay configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn from_config(config: &RelayConfig) -> Result<Self, DeliveryError> {
        Self::new(config.http_timeout())
    }

    /// Creates a sender from an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl NotificationSender for HttpNotificationSender {
    async fn send(
        &self,
        uri: &Url,
        device: &DeviceId,
        status: &DeviceStatus,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(uri.clone())
            .header(DEVICE_HEADER, device.as_str())
            .json(status)
            .send()
            .await?;

        let code = response.status();
        if code.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(code.as_u16()))
        }
    }
}

/// Posts a status to one callback, retrying on failure.
///
/// Attempts are spaced by the policy delay. Cancellation stops at once,
/// without a further attempt.
///
/// # Errors
///
/// Returns `DeliveryError::Exhausted` once the policy gives up, or
/// `DeliveryError::Cancelled`.
pub async fn deliver_with_retry<S: NotificationSender>(
    sender: &S,
    callback: &Callback,
    device: &DeviceId,
    status: &DeviceStatus,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), DeliveryError> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            result = sender.send(callback.uri(), device, status) => result,
        };

        let error = match result {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        warn!(
            device_id = %device,
            uri = %callback.uri(),
            attempt,
            %error,
            "Delivery attempt failed"
        );

        if !policy.should_retry(attempt) {
            return Err(DeliveryError::Exhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            () = tokio::time::sleep(policy.delay) => {}
        }
    }
}

/// Posts a status to every callback concurrently.
///
/// Each callback is retried on its own; a failing callback never affects
/// the others. Failures are logged. Returns the number of callbacks that
/// accepted the notification.
pub async fn deliver<S: NotificationSender>(
    sender: &S,
    device: &DeviceId,
    callbacks: &[Callback],
    status: &DeviceStatus,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> usize {
    let results = join_all(callbacks.iter().map(|callback| async move {
        let result = deliver_with_retry(sender, callback, device, status, policy, cancel).await;
        match &result {
            Ok(()) => debug!(device_id = %device, uri = %callback.uri(), "Notification delivered"),
            Err(DeliveryError::Cancelled) => {
                debug!(device_id = %device, uri = %callback.uri(), "Delivery cancelled");
            }
            Err(e) => error!(device_id = %device, uri = %callback.uri(), error = %e, "Delivery failed"),
        }
        result
    }))
    .await;

    results.iter().filter(|result| result.is_ok()).count()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;

    /// Fails the first `failures` sends to each URI, then succeeds.
    #[derive(Default)]
    struct FlakySender {
        failures: usize,
        attempts: Mutex<Vec<(Url, Instant)>>,
    }

    impl FlakySender {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        fn attempts_to(&self, uri: &str) -> Vec<Instant> {
            self.attempts
                .lock()
                .iter()
                .filter(|(u, _)| u.as_str() == uri)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    impl NotificationSender for FlakySender {
        async fn send(
            &self,
            uri: &Url,
            _device: &DeviceId,
            _status: &DeviceStatus,
        ) -> Result<(), DeliveryError> {
            let mut attempts = self.attempts.lock();
            attempts.push((uri.clone(), Instant::now()));
            let count = attempts.iter().filter(|(u, _)| u == uri).count();
            if count <= self.failures {
                Err(DeliveryError::Status(503))
            } else {
                Ok(())
            }
        }
    }

    fn callback(uri: &str) -> Callback {
        Callback::new(Url::parse(uri).unwrap(), Duration::from_secs(60), Utc::now())
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(3))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_three_seconds_apart() {
        let sender = FlakySender::failing(3);
        let hook = callback("http://x/hook");

        deliver_with_retry(
            &sender,
            &hook,
            &DeviceId::new("dev-1"),
            &json!({"on": true}),
            policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let attempts = sender.attempts_to("http://x/hook");
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_policy_attempts() {
        let sender = FlakySender::failing(usize::MAX);

        let error = deliver_with_retry(
            &sender,
            &callback("http://x/hook"),
            &DeviceId::new("dev-1"),
            &json!(null),
            policy(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            error,
            DeliveryError::Exhausted { attempts: 5, ref last } if matches!(**last, DeliveryError::Status(503))
        ));
        assert_eq!(sender.attempts_to("http://x/hook").len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retrying() {
        let sender = Arc::new(FlakySender::failing(usize::MAX));
        let cancel = CancellationToken::new();

        let task = {
            let sender = Arc::clone(&sender);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                deliver_with_retry(
                    &*sender,
                    &callback("http://x/hook"),
                    &DeviceId::new("dev-1"),
                    &json!(null),
                    policy(),
                    &cancel,
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(4)).await;
        cancel.cancel();

        assert!(matches!(task.await.unwrap(), Err(DeliveryError::Cancelled)));
        assert_eq!(sender.attempts_to("http://x/hook").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_does_not_affect_siblings() {
        struct OneBadUri;

        impl NotificationSender for OneBadUri {
            async fn send(
                &self,
                uri: &Url,
                _device: &DeviceId,
                _status: &DeviceStatus,
            ) -> Result<(), DeliveryError> {
                if uri.path() == "/bad" {
                    Err(DeliveryError::Status(500))
                } else {
                    Ok(())
                }
            }
        }

        let callbacks = [
            callback("http://x/good"),
            callback("http://x/bad"),
            callback("http://y/good"),
        ];

        let delivered = deliver(
            &OneBadUri,
            &DeviceId::new("dev-1"),
            &callbacks,
            &json!("on"),
            policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(delivered, 2);
    }
}
