// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of subscription and delivery using wiremock as the hub.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hubrelay::device::{
    DeviceDescriptor, DeviceId, DeviceStatus, PresenceState, PresenceStatus, ProviderSet,
    PushProvider,
};
use hubrelay::persistence::DataPersister;
use hubrelay::relay::{RegistryStore, build_registry_store};
use hubrelay::subscription::{
    CallbackManager, HttpNotificationSender, SubscribeRequest, SubscribeResponse, TrackingState,
};
use hubrelay::{RelayConfig, RetryPolicy};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Manager = CallbackManager<RegistryStore, HttpNotificationSender>;

fn presence_provider() -> Arc<PushProvider> {
    let provider = Arc::new(PushProvider::new());
    provider.set_devices(vec![
        DeviceDescriptor::new("dev-1", "Phone", "torick", "presence").with_manufacturer("Torick"),
    ]);
    provider
}

fn manager(file: &Path, provider: &Arc<PushProvider>) -> Manager {
    let config = RelayConfig::default()
        .with_delivery_retry(RetryPolicy::new(5, Duration::from_millis(50)))
        .with_http_timeout(Duration::from_secs(2));

    CallbackManager::new(
        build_registry_store(file),
        ProviderSet::builder()
            .with_shared_provider(provider.clone())
            .build(),
        HttpNotificationSender::from_config(&config).unwrap(),
    )
    .with_config(config)
}

async fn subscribe(manager: &Manager, hub: &MockServer, device: &str) -> SubscribeResponse {
    let request = SubscribeRequest::parse(
        Some(&format!("<{}/notify>", hub.uri())),
        Some("Second-3600"),
    )
    .unwrap();
    let callback = request.into_callback(Utc::now());
    let response = SubscribeResponse::new(DeviceId::new(device), &callback);

    manager
        .add_callback(&CancellationToken::new(), DeviceId::new(device), callback)
        .await
        .unwrap();
    response
}

/// Polls `condition` until it holds, for at most five seconds.
async fn eventually(mut condition: impl AsyncFnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn received(hub: &MockServer) -> usize {
    hub.received_requests().await.map_or(0, |requests| requests.len())
}

fn present(device: &str) -> DeviceStatus {
    PresenceStatus::new(DeviceId::new(device), PresenceState::Present).into()
}

#[tokio::test]
async fn status_change_is_posted_to_the_hub() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .and(header("Smartthings-Device", "dev-1"))
        .and(body_json(serde_json::json!({"id": "dev-1", "presence": "present"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hub)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = presence_provider();
    let manager = manager(&dir.path().join("callbacks.json"), &provider);
    manager.start();

    let response = subscribe(&manager, &hub, "dev-1").await;
    assert!(response.sid().starts_with("uuid:"));
    assert_eq!(response.timeout(), "Second-3600");

    let device = DeviceId::new("dev-1");
    assert!(eventually(async || manager.tracking_state(&device) == TrackingState::Subscribed).await);

    provider.publish(&device, present("dev-1"));
    // The same status again is not posted twice.
    provider.publish(&device, present("dev-1"));

    assert!(eventually(async || received(&hub).await == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(received(&hub).await, 1);
}

#[tokio::test]
async fn failed_posts_are_retried() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .expect(3)
        .mount(&hub)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hub)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = presence_provider();
    let manager = manager(&dir.path().join("callbacks.json"), &provider);
    manager.start();
    subscribe(&manager, &hub, "dev-1").await;

    provider.publish(&DeviceId::new("dev-1"), present("dev-1"));

    assert!(eventually(async || received(&hub).await == 4).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(received(&hub).await, 4);
}

#[tokio::test]
async fn registrations_are_persisted_and_tracked_after_restart() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&hub)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("callbacks.json");
    let provider = presence_provider();

    {
        let manager = manager(&file, &provider);
        subscribe(&manager, &hub, "dev-1").await;

        let registry = manager
            .store()
            .load(&CancellationToken::new())
            .await
            .into_result()
            .unwrap()
            .unwrap();
        assert_eq!(registry.callback_count(), 1);
    }

    let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
    assert_eq!(on_disk["dev-1"][0]["duration"], 3600);

    let restarted = manager(&file, &provider);
    restarted.start();
    assert!(eventually(async || restarted.tracked_devices() == [DeviceId::new("dev-1")]).await);

    provider.publish(&DeviceId::new("dev-1"), present("dev-1"));
    assert!(eventually(async || received(&hub).await == 1).await);
}

#[tokio::test]
async fn unknown_device_is_listed_but_idle() {
    let hub = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = presence_provider();
    let manager = manager(&dir.path().join("callbacks.json"), &provider);
    manager.start();

    subscribe(&manager, &hub, "ghost").await;

    let ghost = DeviceId::new("ghost");
    assert!(eventually(async || manager.tracked_devices().contains(&ghost)).await);
    assert_eq!(manager.tracking_state(&ghost), TrackingState::Idle);
    assert_eq!(received(&hub).await, 0);
}
