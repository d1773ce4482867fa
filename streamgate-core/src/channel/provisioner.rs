use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{PoolsSection, StreamGateConfig};
use crate::engine::MediaEngineClient;
use crate::event::UploadCompletedEvent;

use super::error::{ProvisionError, ProvisionResult};
use super::models::{
    cache_key_for, manifest_path_for, AbrVariant, Assignment, ChannelMetadata,
    ChannelProvisioningRequest, ChannelProvisioningResult, ChannelStatus, Classification,
};
use super::retry::RetryEnvelope;
use super::store::MetadataRepository;

/// Idempotency gate plus provisioning state machine. One instance serves
/// every worker task; all mutable state lives in the repository.
pub struct ChannelProvisioner {
    repository: Arc<dyn MetadataRepository>,
    engine: Arc<dyn MediaEngineClient>,
    envelope: RetryEnvelope,
    reels_ladder: Vec<AbrVariant>,
    series_ladder: Vec<AbrVariant>,
    pools: PoolsSection,
    output_bucket: String,
    cdn_base: Url,
    signing_key_id: String,
    dry_run: bool,
}

impl ChannelProvisioner {
    pub fn new(
        repository: Arc<dyn MetadataRepository>,
        engine: Arc<dyn MediaEngineClient>,
        config: &StreamGateConfig,
    ) -> ProvisionResult<Self> {
        let reels_ladder = super::models::parse_abr_preset(&config.presets.reels)?;
        let series_ladder = super::models::parse_abr_preset(&config.presets.series)?;
        let cdn_base = Url::parse(&config.manifest.cdn_base_url).map_err(|source| {
            ProvisionError::PlaybackUrl {
                value: config.manifest.cdn_base_url.clone(),
                source,
            }
        })?;
        Ok(Self {
            repository,
            engine,
            envelope: RetryEnvelope::from_engine_config(&config.engine),
            reels_ladder,
            series_ladder,
            pools: config.pools.clone(),
            output_bucket: config.manifest.bucket.clone(),
            cdn_base,
            signing_key_id: config.signing.signing_key_id.clone(),
            dry_run: config.signing.dry_run,
        })
    }

    /// Turns one upload event into exactly one durable ready channel for
    /// its (contentId, checksum) pair, replaying through the same record
    /// on re-upload or recovery.
    pub async fn provision_from_upload(
        &self,
        event: &UploadCompletedEvent,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ChannelMetadata> {
        let payload = &event.data;
        let existing = self
            .repository
            .find_by_content_id(&payload.content_id)
            .await?;

        if let Some(record) = &existing {
            if record.status == ChannelStatus::Ready && record.checksum == payload.checksum {
                debug!(
                    content_id = %record.content_id,
                    channel_id = %record.channel_id,
                    "channel already ready for this checksum"
                );
                return Ok(record.clone());
            }
        }

        let request = self.build_request(event);
        let playback_url = self.resolve_playback(&request.manifest_path)?;
        let pre = self.provisioning_record(event, &request, playback_url, existing.as_ref());
        self.repository.upsert(&pre).await?;
        info!(
            content_id = %pre.content_id,
            classification = %pre.classification,
            retries = pre.retries,
            "channel provisioning started"
        );

        let outcome = self
            .envelope
            .run("create_channel", cancel, |_| {
                self.engine.create_channel(&request)
            })
            .await;

        match outcome {
            Ok(response) => {
                let record = self.ready_record(pre, &response)?;
                self.repository.upsert(&record).await?;
                info!(
                    content_id = %record.content_id,
                    channel_id = %record.channel_id,
                    origin = %record.origin_endpoint,
                    "channel ready"
                );
                Ok(record)
            }
            Err(error) => {
                let mut failed = pre;
                failed.status = ChannelStatus::Failed;
                failed.retries += 1;
                failed.last_provisioned_at = Utc::now();
                self.repository.upsert(&failed).await?;
                warn!(
                    content_id = %failed.content_id,
                    retries = failed.retries,
                    error = %error,
                    "channel provisioning failed"
                );
                Err(ProvisionError::Engine(error))
            }
        }
    }

    fn build_request(&self, event: &UploadCompletedEvent) -> ChannelProvisioningRequest {
        let payload = &event.data;
        let (abr_ladder, ingest_pool, egress_pool) = match payload.content_type {
            Classification::Reel => (
                self.reels_ladder.clone(),
                self.pools.reels_ingest.clone(),
                self.pools.reels_egress.clone(),
            ),
            Classification::Series => (
                self.series_ladder.clone(),
                self.pools.series_ingest.clone(),
                self.pools.series_egress.clone(),
            ),
        };

        let mut metadata = HashMap::new();
        metadata.insert("tenantId".to_string(), payload.tenant_id.clone());
        metadata.insert("checksum".to_string(), payload.checksum.clone());
        metadata.insert("ingestRegion".to_string(), payload.ingest_region.clone());
        metadata.insert(
            "durationSeconds".to_string(),
            payload.duration_seconds.to_string(),
        );
        metadata.insert("signingKeyId".to_string(), self.signing_key_id.clone());
        metadata.insert(
            "dryRun".to_string(),
            if self.dry_run { "true" } else { "false" }.to_string(),
        );
        if let Some(event_id) = &event.event_id {
            metadata.insert("eventId".to_string(), event_id.clone());
        }

        ChannelProvisioningRequest {
            content_id: payload.content_id.clone(),
            classification: payload.content_type.clone(),
            source_uri: payload.source_uri.clone(),
            ingest_pool,
            egress_pool,
            abr_ladder,
            output_bucket: self.output_bucket.clone(),
            manifest_path: manifest_path_for(&payload.content_id),
            cache_key: cache_key_for(&payload.content_id, &payload.checksum),
            drm: payload.drm.clone(),
            availability_window: payload.availability_window.clone(),
            geo_restrictions: payload.geo_restrictions.clone(),
            metadata,
        }
    }

    fn resolve_playback(&self, manifest_path: &str) -> ProvisionResult<String> {
        self.cdn_base
            .join(manifest_path)
            .map(|url| url.to_string())
            .map_err(|source| ProvisionError::PlaybackUrl {
                value: manifest_path.to_string(),
                source,
            })
    }

    fn provisioning_record(
        &self,
        event: &UploadCompletedEvent,
        request: &ChannelProvisioningRequest,
        playback_url: String,
        existing: Option<&ChannelMetadata>,
    ) -> ChannelMetadata {
        let payload = &event.data;
        ChannelMetadata {
            content_id: payload.content_id.clone(),
            channel_id: existing
                .map(|record| record.channel_id.clone())
                .unwrap_or(Assignment::Pending),
            classification: payload.content_type.clone(),
            manifest_path: request.manifest_path.clone(),
            playback_url,
            origin_endpoint: existing
                .map(|record| record.origin_endpoint.clone())
                .unwrap_or(Assignment::Pending),
            cache_key: request.cache_key.clone(),
            checksum: payload.checksum.clone(),
            status: ChannelStatus::Provisioning,
            retries: existing.map(|record| record.retries + 1).unwrap_or(0),
            source_asset_uri: payload.source_uri.clone(),
            tenant_id: Some(payload.tenant_id.clone()),
            duration_seconds: Some(payload.duration_seconds),
            ingest_region: Some(payload.ingest_region.clone()),
            drm: payload.drm.clone(),
            availability_window: payload.availability_window.clone(),
            geo_restrictions: payload.geo_restrictions.clone(),
            last_provisioned_at: Utc::now(),
        }
    }

    fn ready_record(
        &self,
        pre: ChannelMetadata,
        response: &ChannelProvisioningResult,
    ) -> ProvisionResult<ChannelMetadata> {
        let mut record = pre;
        record.channel_id = Assignment::Assigned(response.channel_id.clone());
        record.origin_endpoint = Assignment::Assigned(response.origin_endpoint.clone());
        if let Some(path) = &response.manifest_path {
            record.manifest_path = path.clone();
        }
        record.playback_url = match &response.playback_base_url {
            Some(base) => Url::parse(base)
                .and_then(|base| base.join(&record.manifest_path))
                .map(|url| url.to_string())
                .map_err(|source| ProvisionError::PlaybackUrl {
                    value: base.clone(),
                    source,
                })?,
            None => self.resolve_playback(&record.manifest_path)?,
        };
        record.status = ChannelStatus::Ready;
        record.last_provisioned_at = Utc::now();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::channel::error::ChannelResult;
    use crate::config::{load_streamgate_config, StreamGateConfig};
    use crate::engine::{EngineError, EngineResult};
    use crate::event::{UploadCompletedEvent, UploadPayload, UPLOAD_COMPLETED_TYPE};

    use super::*;

    #[derive(Default)]
    struct MemoryRepository {
        records: Mutex<HashMap<String, ChannelMetadata>>,
    }

    #[async_trait]
    impl MetadataRepository for MemoryRepository {
        async fn find_by_content_id(
            &self,
            content_id: &str,
        ) -> ChannelResult<Option<ChannelMetadata>> {
            Ok(self.records.lock().unwrap().get(content_id).cloned())
        }

        async fn upsert(&self, record: &ChannelMetadata) -> ChannelResult<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.content_id.clone(), record.clone());
            Ok(())
        }

        async fn list_failed(&self, limit: usize) -> ChannelResult<Vec<ChannelMetadata>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|record| record.status == ChannelStatus::Failed)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        requests: Mutex<Vec<ChannelProvisioningRequest>>,
        fail: bool,
        playback_base: Option<String>,
    }

    #[async_trait]
    impl MediaEngineClient for RecordingEngine {
        async fn create_channel(
            &self,
            request: &ChannelProvisioningRequest,
        ) -> EngineResult<ChannelProvisioningResult> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(EngineError::Status {
                    status: 400,
                    body: "rejected".into(),
                });
            }
            Ok(ChannelProvisioningResult {
                channel_id: "ch-42".into(),
                manifest_path: None,
                origin_endpoint: "origin-1.engine.example".into(),
                playback_base_url: self.playback_base.clone(),
                profile_hash: Some("p1".into()),
            })
        }

        async fn delete_channel(&self, _channel_id: &str) -> EngineResult<()> {
            Ok(())
        }

        async fn rotate_ingest_key(&self, _channel_id: &str) -> EngineResult<()> {
            Ok(())
        }
    }

    fn fixture_config() -> StreamGateConfig {
        let path =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/streamgate.toml");
        load_streamgate_config(path).unwrap()
    }

    fn upload_event(content_id: &str, checksum: &str, kind: Classification) -> UploadCompletedEvent {
        UploadCompletedEvent {
            event_id: Some("e1".into()),
            event_type: UPLOAD_COMPLETED_TYPE.into(),
            version: None,
            occurred_at: None,
            data: UploadPayload {
                content_id: content_id.into(),
                tenant_id: "t1".into(),
                content_type: kind,
                source_uri: "gs://bucket/asset".into(),
                checksum: checksum.into(),
                duration_seconds: 12,
                ingest_region: "us".into(),
                drm: None,
                availability_window: None,
                geo_restrictions: None,
                acknowledgement: None,
            },
        }
    }

    #[tokio::test]
    async fn request_derivation_selects_pools_and_ladder() {
        let repository = Arc::new(MemoryRepository::default());
        let engine = Arc::new(RecordingEngine::default());
        let provisioner =
            ChannelProvisioner::new(repository, Arc::clone(&engine) as _, &fixture_config())
                .unwrap();

        let cancel = CancellationToken::new();
        provisioner
            .provision_from_upload(&upload_event("c1", "s1", Classification::Series), &cancel)
            .await
            .unwrap();

        let requests = engine.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.ingest_pool, "ingest-series-a");
        assert_eq!(request.egress_pool, "egress-series-a");
        assert!(request
            .abr_ladder
            .iter()
            .any(|variant| variant.resolution == "3840x2160"));
        assert_eq!(request.manifest_path, "manifests/c1/master.m3u8");
        assert_eq!(request.cache_key, cache_key_for("c1", "s1"));
        assert_eq!(request.metadata.get("tenantId").unwrap(), "t1");
        assert_eq!(request.metadata.get("durationSeconds").unwrap(), "12");
        assert_eq!(request.metadata.get("dryRun").unwrap(), "false");
        assert_eq!(request.metadata.get("signingKeyId").unwrap(), "sgn-key-2026a");
    }

    #[tokio::test]
    async fn playback_url_prefers_engine_base() {
        let repository = Arc::new(MemoryRepository::default());
        let engine = Arc::new(RecordingEngine {
            playback_base: Some("https://edge.engine.example/".into()),
            ..Default::default()
        });
        let provisioner =
            ChannelProvisioner::new(repository, Arc::clone(&engine) as _, &fixture_config())
                .unwrap();

        let cancel = CancellationToken::new();
        let record = provisioner
            .provision_from_upload(&upload_event("c1", "s1", Classification::Reel), &cancel)
            .await
            .unwrap();
        assert_eq!(
            record.playback_url,
            "https://edge.engine.example/manifests/c1/master.m3u8"
        );
    }

    #[tokio::test]
    async fn terminal_engine_failure_persists_failed_record() {
        let repository = Arc::new(MemoryRepository::default());
        let engine = Arc::new(RecordingEngine {
            fail: true,
            ..Default::default()
        });
        let provisioner = ChannelProvisioner::new(
            Arc::clone(&repository) as _,
            Arc::clone(&engine) as _,
            &fixture_config(),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let result = provisioner
            .provision_from_upload(&upload_event("c1", "s1", Classification::Reel), &cancel)
            .await;
        assert!(matches!(result, Err(ProvisionError::Engine(_))));

        let record = repository
            .find_by_content_id("c1")
            .await
            .unwrap()
            .expect("failed record persisted");
        assert_eq!(record.status, ChannelStatus::Failed);
        assert_eq!(record.retries, 1);
        assert_eq!(record.channel_id, Assignment::Pending);
    }
}
