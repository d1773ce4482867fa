use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::AlertingSink;
use crate::channel::{ChannelProvisioner, ProvisionError};
use crate::config::{ManifestSection, StreamGateConfig, SubscriptionSection};
use crate::event::{decode_upload_event, EventContext, EventError, PubSubEnvelope};
use crate::notify::{NotificationPublisher, NotifyError, PlaybackReadyNotice};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("decode error: {0}")]
    Decode(#[from] EventError),
    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),
    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
    #[error("handler exceeded ack deadline of {0}s")]
    DeadlineExceeded(u64),
}

/// Ack/nack decision returned to the subscription runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerVerdict {
    Ack,
    Nack { retry_in_seconds: u64 },
}

/// At-least-once consumer of upload-completed events. Decodes, provisions,
/// notifies, and alone decides ack versus nack.
pub struct UploadEventWorker {
    provisioner: Arc<ChannelProvisioner>,
    publisher: Arc<dyn NotificationPublisher>,
    alerts: Arc<dyn AlertingSink>,
    subscription: SubscriptionSection,
    manifest: ManifestSection,
    cancel: CancellationToken,
}

impl UploadEventWorker {
    pub fn new(
        provisioner: Arc<ChannelProvisioner>,
        publisher: Arc<dyn NotificationPublisher>,
        alerts: Arc<dyn AlertingSink>,
        config: &StreamGateConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provisioner,
            publisher,
            alerts,
            subscription: config.subscription.clone(),
            manifest: config.manifest.clone(),
            cancel,
        }
    }

    pub async fn handle_message(
        &self,
        message: &PubSubEnvelope,
        context: Option<&EventContext>,
    ) -> HandlerVerdict {
        if let Some(context) = context {
            debug!(
                message_id = %message.message_id,
                event_id = ?context.event_id,
                timestamp = ?context.timestamp,
                "handling subscription push"
            );
        }

        let deadline = Duration::from_secs(self.subscription.ack_deadline_seconds);
        let mut content_id = None;
        let outcome = match timeout(deadline, self.process(message, &mut content_id)).await {
            Ok(result) => result,
            // A deadline overrun counts as one more failed attempt.
            Err(_) => Err(WorkerError::DeadlineExceeded(
                self.subscription.ack_deadline_seconds,
            )),
        };

        match outcome {
            Ok(()) => HandlerVerdict::Ack,
            Err(error) => self.failure_verdict(message, content_id.as_deref(), error).await,
        }
    }

    async fn process(
        &self,
        message: &PubSubEnvelope,
        content_id: &mut Option<String>,
    ) -> Result<(), WorkerError> {
        let event = decode_upload_event(message)?;
        *content_id = Some(event.data.content_id.clone());

        let metadata = self
            .provisioner
            .provision_from_upload(&event, &self.cancel)
            .await?;

        let expires_at = Utc::now() + chrono::Duration::seconds(self.manifest.ttl_seconds as i64);
        let notice = PlaybackReadyNotice {
            manifest_url: metadata.playback_url.clone(),
            metadata,
            expires_at,
        };
        self.publisher.publish_playback_ready(&notice).await?;
        info!(
            message_id = %message.message_id,
            content_id = %notice.metadata.content_id,
            "playback ready published"
        );
        Ok(())
    }

    async fn failure_verdict(
        &self,
        message: &PubSubEnvelope,
        content_id: Option<&str>,
        error: WorkerError,
    ) -> HandlerVerdict {
        let content_id = content_id.unwrap_or("unknown");
        if let Err(alert_error) = self
            .alerts
            .ingest_failure(content_id, &error.to_string())
            .await
        {
            warn!(error = %alert_error, "alerting sink unavailable");
        }

        let attempt = message.attempt();
        let max_attempts = self.subscription.max_delivery_attempts;
        if attempt >= max_attempts {
            warn!(
                message_id = %message.message_id,
                content_id,
                attempt,
                max_attempts,
                error = %error,
                "dropping poison message"
            );
            HandlerVerdict::Ack
        } else {
            info!(
                message_id = %message.message_id,
                content_id,
                attempt,
                error = %error,
                "nacking for redelivery"
            );
            HandlerVerdict::Nack {
                retry_in_seconds: self.subscription.ack_deadline_seconds,
            }
        }
    }
}
