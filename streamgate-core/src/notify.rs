use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::channel::ChannelMetadata;
use crate::config::NotificationsSection;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
}

pub type NotifyResult<T> = std::result::Result<T, NotifyError>;

/// Wire shape of the playback-ready fan-out.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackReadyNotice {
    pub metadata: ChannelMetadata,
    pub manifest_url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish_playback_ready(&self, notice: &PlaybackReadyNotice) -> NotifyResult<()>;
}

pub struct HttpNotificationPublisher {
    client: Client,
    config: NotificationsSection,
}

impl HttpNotificationPublisher {
    pub fn new(client: Client, config: NotificationsSection) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotificationPublisher for HttpNotificationPublisher {
    async fn publish_playback_ready(&self, notice: &PlaybackReadyNotice) -> NotifyResult<()> {
        let response = self
            .client
            .post(&self.config.playback_ready_url)
            .json(notice)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
