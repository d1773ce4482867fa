use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::channel::{ChannelProvisioningRequest, ChannelProvisioningResult};
use crate::config::EngineSection;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("engine returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("missing engine api token at {0}")]
    MissingToken(PathBuf),
    #[error("engine call cancelled")]
    Cancelled,
}

impl EngineError {
    /// Transient failures are worth another attempt inside the retry
    /// envelope; everything else is terminal for this provisioning pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Http(source) => source.is_timeout() || source.is_connect(),
            EngineError::Status { status, .. } => *status == 429 || *status >= 500,
            EngineError::MissingToken(_) | EngineError::Cancelled => false,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Remote lifecycle operations on the streaming engine.
#[async_trait]
pub trait MediaEngineClient: Send + Sync {
    async fn create_channel(
        &self,
        request: &ChannelProvisioningRequest,
    ) -> EngineResult<ChannelProvisioningResult>;

    async fn delete_channel(&self, channel_id: &str) -> EngineResult<()>;

    async fn rotate_ingest_key(&self, channel_id: &str) -> EngineResult<()>;
}

pub struct HttpMediaEngineClient {
    client: Client,
    config: EngineSection,
}

impl HttpMediaEngineClient {
    pub fn new(config: EngineSection) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn load_token(&self) -> EngineResult<String> {
        let token = fs::read_to_string(&self.config.api_token_path)
            .map_err(|_| EngineError::MissingToken(self.config.api_token_path.clone()))?;
        Ok(token.trim().to_string())
    }

    async fn check(response: reqwest::Response) -> EngineResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MediaEngineClient for HttpMediaEngineClient {
    async fn create_channel(
        &self,
        request: &ChannelProvisioningRequest,
    ) -> EngineResult<ChannelProvisioningResult> {
        let token = self.load_token()?;
        let url = format!("{}/v1/channels", self.config.api_base);
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn delete_channel(&self, channel_id: &str) -> EngineResult<()> {
        let token = self.load_token()?;
        let url = format!("{}/v1/channels/{channel_id}", self.config.api_base);
        let response = self.client.delete(url).bearer_auth(token).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn rotate_ingest_key(&self, channel_id: &str) -> EngineResult<()> {
        let token = self.load_token()?;
        let url = format!(
            "{}/v1/channels/{channel_id}/ingest-key/rotate",
            self.config.api_base
        );
        let response = self.client.post(url).bearer_auth(token).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
