use crate::errors::{AppError, ResultExt};
use crate::models::FailureReason;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Base64 image payload returned by a generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes_base64: String,
}

/// Text-to-image generation endpoint.
///
/// Implementations must give up promptly once `cancel` fires; the orchestrator
/// also stops polling the call at that point, which drops any pending request.
#[async_trait]
pub trait ImageService: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage, FailureReason>;
}

// ============ Wire Format ============

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: [PredictInstance<'a>; 1],
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Client for an Imagen-style `:predict` endpoint.
#[derive(Clone)]
pub struct ImagenClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ImagenClient {
    /// Creates a new `ImagenClient`.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Full URL of the predict endpoint.
    /// * `api_key` - API key, sent as the `key` query parameter.
    pub fn new(api_url: String, api_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create image client")?;

        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }

    async fn predict(&self, prompt: &str) -> Result<GeneratedImage, FailureReason> {
        let url = reqwest::Url::parse_with_params(&self.api_url, &[("key", self.api_key.as_str())])
            .map_err(|e| FailureReason::Transport {
                message: format!("Failed to build URL: {}", e),
            })?;

        let body = PredictRequest {
            instances: [PredictInstance { prompt }],
            parameters: PredictParameters { sample_count: 1 },
        };

        // Redact key from logs
        tracing::debug!("POST {} (key=[REDACTED])", self.api_url);

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FailureReason::Transport {
                message: e.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error)
                .and_then(|error| error.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            tracing::error!("Image service returned {}: {}", status, message);
            return Err(FailureReason::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: PredictResponse = response.json().await.map_err(|e| {
            tracing::warn!("Unparseable image service response: {}", e);
            FailureReason::UnknownResponse
        })?;

        parsed
            .predictions
            .into_iter()
            .next()
            .and_then(|prediction| prediction.bytes_base64_encoded)
            .filter(|payload| !payload.is_empty())
            .map(|bytes_base64| GeneratedImage { bytes_base64 })
            .ok_or(FailureReason::UnknownResponse)
    }
}

#[async_trait]
impl ImageService for ImagenClient {
    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage, FailureReason> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            result = self.predict(prompt) => result,
        }
    }
}
