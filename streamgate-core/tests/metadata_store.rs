use chrono::{Duration, Utc};
use streamgate_core::{
    cache_key_for, manifest_path_for, Assignment, ChannelError, ChannelMetadata, ChannelStatus,
    Classification, MetadataRepository, SqliteMetadataStore,
};

fn setup_store() -> SqliteMetadataStore {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("channels.sqlite");
    // Keep the directory alive for the duration of the test process.
    #[allow(deprecated)]
    let _persist = dir.into_path();
    let store = SqliteMetadataStore::builder()
        .path(&path)
        .create_if_missing(true)
        .build()
        .unwrap();
    store.initialize().unwrap();
    store
}

fn record(content_id: &str, status: ChannelStatus) -> ChannelMetadata {
    ChannelMetadata {
        content_id: content_id.into(),
        channel_id: Assignment::Pending,
        classification: Classification::Reel,
        manifest_path: manifest_path_for(content_id),
        playback_url: format!("https://cdn.example/manifests/{content_id}/master.m3u8"),
        origin_endpoint: Assignment::Pending,
        cache_key: cache_key_for(content_id, "s1"),
        checksum: "s1".into(),
        status,
        retries: 0,
        source_asset_uri: "gs://bucket/asset".into(),
        tenant_id: Some("t1".into()),
        duration_seconds: Some(42),
        ingest_region: Some("us".into()),
        drm: None,
        availability_window: None,
        geo_restrictions: None,
        last_provisioned_at: Utc::now(),
    }
}

#[test]
fn upsert_and_fetch_round_trip() {
    let store = setup_store();
    let mut original = record("c1", ChannelStatus::Provisioning);
    original.geo_restrictions = Some(streamgate_core::GeoRestrictions {
        allow: Some(vec!["BR".into(), "PT".into()]),
        deny: None,
    });
    original.drm = Some(streamgate_core::DrmKeys {
        key_id: "k1".into(),
        license_server: "https://drm.example".into(),
    });
    store.upsert_record(&original).unwrap();

    let fetched = store.fetch_by_content_id("c1").unwrap().unwrap();
    assert_eq!(fetched.content_id, "c1");
    assert_eq!(fetched.status, ChannelStatus::Provisioning);
    assert_eq!(fetched.channel_id, Assignment::Pending);
    assert_eq!(fetched.cache_key, original.cache_key);
    assert_eq!(fetched.tenant_id.as_deref(), Some("t1"));
    assert_eq!(fetched.duration_seconds, Some(42));
    assert_eq!(
        fetched.geo_restrictions.unwrap().allow.unwrap(),
        vec!["BR".to_string(), "PT".to_string()]
    );
    assert_eq!(fetched.drm.unwrap().key_id, "k1");

    assert!(store.fetch_by_content_id("missing").unwrap().is_none());
}

#[test]
fn retries_never_decrease_across_upserts() {
    let store = setup_store();
    let mut current = record("c1", ChannelStatus::Failed);
    current.retries = 3;
    store.upsert_record(&current).unwrap();

    // A stale writer carrying a lower counter must not regress it.
    current.retries = 1;
    store.upsert_record(&current).unwrap();
    let fetched = store.fetch_by_content_id("c1").unwrap().unwrap();
    assert_eq!(fetched.retries, 3);

    current.retries = 4;
    store.upsert_record(&current).unwrap();
    let fetched = store.fetch_by_content_id("c1").unwrap().unwrap();
    assert_eq!(fetched.retries, 4);
}

#[test]
fn ready_records_require_assignments() {
    let store = setup_store();
    let mut broken = record("c1", ChannelStatus::Ready);
    broken.channel_id = Assignment::Pending;
    let err = store.upsert_record(&broken).unwrap_err();
    assert!(matches!(err, ChannelError::InconsistentRecord { .. }));

    broken.channel_id = Assignment::Assigned("ch-1".into());
    broken.origin_endpoint = Assignment::Assigned("origin-1".into());
    store.upsert_record(&broken).unwrap();
}

#[test]
fn list_failed_returns_oldest_first() {
    let store = setup_store();
    let now = Utc::now();
    for (content_id, age_minutes, status) in [
        ("newer", 5, ChannelStatus::Failed),
        ("oldest", 60, ChannelStatus::Failed),
        ("ready", 90, ChannelStatus::Ready),
        ("middle", 30, ChannelStatus::Failed),
    ] {
        let mut entry = record(content_id, status);
        if entry.status == ChannelStatus::Ready {
            entry.channel_id = Assignment::Assigned("ch-1".into());
            entry.origin_endpoint = Assignment::Assigned("origin-1".into());
        }
        entry.last_provisioned_at = now - Duration::minutes(age_minutes);
        store.upsert_record(&entry).unwrap();
    }

    let failed = store.fetch_failed(10).unwrap();
    let ids: Vec<&str> = failed.iter().map(|r| r.content_id.as_str()).collect();
    assert_eq!(ids, vec!["oldest", "middle", "newer"]);

    let limited = store.fetch_failed(2).unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].content_id, "oldest");
}

#[tokio::test]
async fn repository_contract_reaches_the_same_rows() {
    let store = setup_store();
    store
        .upsert_record(&record("c1", ChannelStatus::Failed))
        .unwrap();

    let repository: &dyn MetadataRepository = &store;
    let found = repository.find_by_content_id("c1").await.unwrap().unwrap();
    assert_eq!(found.content_id, "c1");
    assert_eq!(repository.list_failed(10).await.unwrap().len(), 1);
}

#[test]
fn admin_operations_update_and_delete() {
    let store = setup_store();
    store
        .upsert_record(&record("c1", ChannelStatus::Failed))
        .unwrap();

    store.update_status("c1", ChannelStatus::Retired).unwrap();
    let fetched = store.fetch_by_content_id("c1").unwrap().unwrap();
    assert_eq!(fetched.status, ChannelStatus::Retired);

    let counts = store.count_by_status().unwrap();
    assert_eq!(*counts.get("retired").unwrap(), 1);

    store.delete("c1").unwrap();
    assert!(store.fetch_by_content_id("c1").unwrap().is_none());
    assert!(matches!(
        store.delete("c1"),
        Err(ChannelError::NotFound { .. })
    ));
    assert!(matches!(
        store.update_status("c1", ChannelStatus::Failed),
        Err(ChannelError::NotFound { .. })
    ));
}
