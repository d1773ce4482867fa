use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alert::AlertingSink;
use crate::channel::{ChannelMetadata, ChannelProvisioner, MetadataRepository, ProvisionResult};
use crate::config::ReconcileSection;
use crate::event::{UploadCompletedEvent, UploadPayload, UPLOAD_COMPLETED_TYPE};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub replayed: usize,
    pub failed: usize,
}

/// Offline sweeper that re-drives failed records through the provisioner.
/// Invoked by an external scheduler; one sweep per call.
pub struct Reconciler {
    repository: Arc<dyn MetadataRepository>,
    provisioner: Arc<ChannelProvisioner>,
    alerts: Arc<dyn AlertingSink>,
    config: ReconcileSection,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn MetadataRepository>,
        provisioner: Arc<ChannelProvisioner>,
        alerts: Arc<dyn AlertingSink>,
        config: ReconcileSection,
    ) -> Self {
        Self {
            repository,
            provisioner,
            alerts,
            config,
        }
    }

    pub async fn reconcile_failed(
        &self,
        limit: usize,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ReconcileReport> {
        let stuck = self.repository.list_failed(limit).await?;
        let mut report = ReconcileReport {
            scanned: stuck.len(),
            ..Default::default()
        };

        for record in stuck {
            if cancel.is_cancelled() {
                warn!(
                    replayed = report.replayed,
                    remaining = report.scanned - report.replayed - report.failed,
                    "reconciliation cancelled mid-sweep"
                );
                break;
            }
            let event = self.replay_event(&record);
            match self.provisioner.provision_from_upload(&event, cancel).await {
                Ok(metadata) => {
                    report.replayed += 1;
                    info!(
                        content_id = %metadata.content_id,
                        channel_id = %metadata.channel_id,
                        retries = metadata.retries,
                        "reconciled failed channel"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        content_id = %record.content_id,
                        error = %error,
                        "reconciliation replay failed"
                    );
                    if let Err(alert_error) = self
                        .alerts
                        .ingest_failure(&record.content_id, &error.to_string())
                        .await
                    {
                        warn!(error = %alert_error, "alerting sink unavailable");
                    }
                }
            }
        }

        Ok(report)
    }

    /// Reconstructs an upload event from the stored record. Fields the
    /// record never captured fall back to configured defaults.
    fn replay_event(&self, record: &ChannelMetadata) -> UploadCompletedEvent {
        UploadCompletedEvent {
            event_id: Some(format!("reconcile-{}", record.content_id)),
            event_type: UPLOAD_COMPLETED_TYPE.to_string(),
            version: None,
            occurred_at: Some(Utc::now()),
            data: UploadPayload {
                content_id: record.content_id.clone(),
                tenant_id: record
                    .tenant_id
                    .clone()
                    .unwrap_or_else(|| self.config.default_tenant.clone()),
                content_type: record.classification.clone(),
                source_uri: record.source_asset_uri.clone(),
                checksum: record.checksum.clone(),
                duration_seconds: record.duration_seconds.unwrap_or(1),
                ingest_region: record
                    .ingest_region
                    .clone()
                    .unwrap_or_else(|| self.config.home_region.clone()),
                drm: record.drm.clone(),
                availability_window: record.availability_window.clone(),
                geo_restrictions: record.geo_restrictions.clone(),
                acknowledgement: None,
            },
        }
    }
}
