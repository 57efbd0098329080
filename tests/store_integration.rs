// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the file-backed registry store.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hubrelay::device::DeviceId;
use hubrelay::persistence::{
    DataPersister, DefaultValueDecorator, DefaultValueMode, LoadResult, LockedFilePersister,
};
use hubrelay::relay::build_registry_store;
use hubrelay::subscription::{Callback, CallbackRegistry};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

fn expiration() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn callback(id: &str) -> Callback {
    Callback::with_id(
        id,
        Url::parse("http://hub.local/notify").unwrap(),
        Duration::from_secs(3600),
        expiration(),
    )
}

fn registry_json(id: &str) -> String {
    json!({
        "tv": [{
            "id": id,
            "uri": "http://hub.local/notify",
            "duration": 3600,
            "expiration": "2030-01-01T00:00:00Z",
        }]
    })
    .to_string()
}

fn callback_ids(registry: &CallbackRegistry, device: &str) -> Vec<String> {
    registry
        .get(&DeviceId::new(device))
        .map(|callbacks| callbacks.iter().map(|c| c.id().to_string()).collect())
        .unwrap_or_default()
}

fn sibling(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    name.into()
}

// ============================================================================
// Registry store
// ============================================================================

mod registry_store {
    use super::*;

    #[tokio::test]
    async fn registrations_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callbacks.json");
        let cancel = CancellationToken::new();

        {
            let store = build_registry_store(&path);
            for id in ["c1", "c2"] {
                store
                    .update(&cancel, |ctx| {
                        let registry = ctx.value().cloned().unwrap_or_default();
                        ctx.commit(registry.with_callback(DeviceId::new("tv"), callback(id)));
                    })
                    .await
                    .unwrap();
            }
        }

        let reopened = build_registry_store(&path);
        let registry = reopened.load(&cancel).await.into_result().unwrap().unwrap();
        assert_eq!(callback_ids(&registry, "TV"), ["c1", "c2"]);

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk["tv"][1]["id"], "c2");
    }

    #[tokio::test]
    async fn interrupted_commit_past_durability_point_rolls_forward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callbacks.json");
        std::fs::write(sibling(&path, ".old"), registry_json("before")).unwrap();
        std::fs::write(sibling(&path, ".new"), registry_json("after")).unwrap();

        let store = build_registry_store(&path);
        let registry = store
            .load(&CancellationToken::new())
            .await
            .into_result()
            .unwrap()
            .unwrap();

        assert_eq!(callback_ids(&registry, "tv"), ["after"]);
        assert!(path.exists());
        assert!(!sibling(&path, ".old").exists());
        assert!(!sibling(&path, ".new").exists());
    }

    #[tokio::test]
    async fn interrupted_commit_before_rename_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callbacks.json");
        std::fs::write(&path, registry_json("committed")).unwrap();
        std::fs::write(sibling(&path, ".new"), "{\"tv\": [").unwrap();

        let store = build_registry_store(&path);
        let registry = store
            .load(&CancellationToken::new())
            .await
            .into_result()
            .unwrap()
            .unwrap();

        assert_eq!(callback_ids(&registry, "tv"), ["committed"]);
        assert!(!sibling(&path, ".new").exists());
    }

    #[tokio::test]
    async fn corrupted_registry_is_reported_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callbacks.json");
        std::fs::write(&path, "not json").unwrap();
        let store = build_registry_store(&path);
        let cancel = CancellationToken::new();

        assert!(store.load(&cancel).await.is_error());

        let result = store
            .update(&cancel, |ctx| {
                if !ctx.loaded().is_error() {
                    ctx.commit(CallbackRegistry::new());
                }
            })
            .await
            .unwrap();

        assert!(!result.written);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }
}

// ============================================================================
// Default value policies over a file
// ============================================================================

mod default_values {
    use super::*;

    fn store(
        path: &Path,
        mode: DefaultValueMode,
    ) -> DefaultValueDecorator<Vec<u32>, LockedFilePersister<Vec<u32>>> {
        DefaultValueDecorator::with_partial_eq(LockedFilePersister::json(path), mode, vec![7])
    }

    #[tokio::test]
    async fn writing_custom_default_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.json");
        let store = store(
            &path,
            DefaultValueMode::READ_EMPTY_TO_CUSTOM_DEFAULT
                | DefaultValueMode::WRITE_CUSTOM_DEFAULT_TO_EMPTY,
        );
        let cancel = CancellationToken::new();

        store.update(&cancel, |ctx| ctx.commit(vec![1, 2])).await.unwrap();
        assert!(path.exists());

        let result = store.update(&cancel, |ctx| ctx.commit(vec![7])).await.unwrap();
        assert!(result.written);
        assert!(!path.exists());
        assert_eq!(store.load(&cancel).await.value(), Some(&vec![7]));
    }

    #[tokio::test]
    async fn language_default_on_disk_reads_as_custom_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.json");
        std::fs::write(&path, "[]").unwrap();
        let store = store(&path, DefaultValueMode::READ_DEFAULT_TO_CUSTOM_DEFAULT);

        let loaded = store.load(&CancellationToken::new()).await;

        assert_eq!(loaded.value(), Some(&vec![7]));
    }

    #[tokio::test]
    async fn read_error_reads_as_custom_default_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.json");
        std::fs::write(&path, "{").unwrap();

        let strict = store(&path, DefaultValueMode::NONE);
        assert!(strict.load(&CancellationToken::new()).await.is_error());

        let lenient = store(&path, DefaultValueMode::READ_ERROR_TO_CUSTOM_DEFAULT);
        assert!(matches!(
            lenient.load(&CancellationToken::new()).await,
            LoadResult::Present(ref value) if value == &vec![7]
        ));
    }
}
