use super::types::{
    DetectionContext, DetectionResult, DetectionStatus, ImageDetector, Predictions, VerdictAction,
};
use crate::config::DetectionConfig;
use crate::error::{GuardError, GuardResult};
use crate::stats::StatsCollector;
use crate::storage::{read_auth_token, ExtensionStorage};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    image_url: &'a str,
    page_url: &'a str,
    domain: &'a str,
}

/// `{success, data, error}` envelope every backend endpoint answers with.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<AnalyzePayload>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzePayload {
    #[serde(default)]
    status: Option<DetectionStatus>,
    #[serde(default)]
    predictions: Option<Predictions>,
    #[serde(default)]
    action: Option<VerdictAction>,
}

/// Detector backed by the XDynamic HTTP API.
pub struct HttpDetectionClient {
    client: Client,
    endpoint: Url,
    config: DetectionConfig,
    storage: Arc<dyn ExtensionStorage>,
    stats: Arc<StatsCollector>,
}

impl HttpDetectionClient {
    pub fn new(
        config: DetectionConfig,
        storage: Arc<dyn ExtensionStorage>,
        stats: Arc<StatsCollector>,
    ) -> Result<Self> {
        let endpoint = Url::parse(&config.base_url)
            .and_then(|base| base.join(&config.analyze_endpoint))
            .context("Failed to build detection endpoint URL")?;
        let client = Client::builder()
            .user_agent("XDynamic/1.0")
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            config,
            storage,
            stats,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn analyze_once(
        &self,
        image_url: &str,
        context: &DetectionContext,
        token: Option<&str>,
    ) -> GuardResult<DetectionResult> {
        let mut request = self.client.post(self.endpoint.clone()).json(&AnalyzeRequest {
            image_url,
            page_url: &context.page_url,
            domain: &context.domain,
        });
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GuardError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope = response.json().await.map_err(|e| self.map_error(e))?;
        decode_envelope(envelope, context)
    }

    fn map_error(&self, error: reqwest::Error) -> GuardError {
        if error.is_timeout() {
            GuardError::Timeout(self.config.timeout_ms)
        } else {
            error.into()
        }
    }
}

fn decode_envelope(envelope: ApiEnvelope, context: &DetectionContext) -> GuardResult<DetectionResult> {
    if !envelope.success {
        let message = envelope
            .error
            .map(|e| match (e.code, e.message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (_, Some(message)) => message,
                (Some(code), None) => code,
                (None, None) => "unknown error".to_string(),
            })
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(GuardError::Api(message));
    }

    let payload = envelope
        .data
        .ok_or_else(|| GuardError::Decode("response has no data".to_string()))?;
    let status = payload.status.unwrap_or(DetectionStatus::Completed);
    let action = match (payload.action, payload.predictions.as_ref()) {
        (Some(action), _) => action,
        (None, Some(predictions)) => VerdictAction::from_scores(predictions, context.thresholds),
        (None, None) => VerdictAction::Allow,
    };

    Ok(DetectionResult {
        status,
        predictions: payload.predictions,
        action,
    })
}

#[async_trait::async_trait]
impl ImageDetector for HttpDetectionClient {
    async fn analyze_image(
        &self,
        image_url: &str,
        context: &DetectionContext,
    ) -> Result<DetectionResult> {
        let token = read_auth_token(self.storage.as_ref()).await?;
        let attempts = self.config.retry_attempts.max(1);
        let start = Instant::now();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.analyze_once(image_url, context, token.as_deref()).await {
                Ok(result) => {
                    self.stats
                        .record_detector_latency(start.elapsed().as_millis() as u64);
                    debug!("Detector answered for {} after {} attempt(s)", image_url, attempt);
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "Detector attempt {}/{} failed for {}: {}",
                        attempt, attempts, image_url, e
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Thresholds;

    fn context() -> DetectionContext {
        DetectionContext {
            page_url: "https://example.com/".into(),
            domain: "example.com".into(),
            thresholds: Thresholds {
                block: 0.8,
                warn: 0.5,
            },
        }
    }

    fn envelope(json: &str) -> ApiEnvelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_envelope_with_server_action() {
        let result = decode_envelope(
            envelope(
                r#"{"success":true,"data":{"status":"completed","predictions":{"nsfw":0.2},"action":"block"}}"#,
            ),
            &context(),
        )
        .unwrap();
        assert_eq!(result.action, VerdictAction::Block);
    }

    #[test]
    fn test_envelope_derives_missing_action() {
        let result = decode_envelope(
            envelope(r#"{"success":true,"data":{"predictions":{"nsfw":0.55,"safe":0.45}}}"#),
            &context(),
        )
        .unwrap();
        assert_eq!(result.status, DetectionStatus::Completed);
        assert_eq!(result.action, VerdictAction::Warn);
    }

    #[test]
    fn test_envelope_error_is_api_error() {
        let error = decode_envelope(
            envelope(r#"{"success":false,"error":{"code":"QUOTA","message":"limit reached"}}"#),
            &context(),
        )
        .unwrap_err();
        assert!(matches!(error, GuardError::Api(ref m) if m == "QUOTA: limit reached"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_envelope_without_data_is_decode_error() {
        let error = decode_envelope(envelope(r#"{"success":true}"#), &context()).unwrap_err();
        assert!(matches!(error, GuardError::Decode(_)));
    }
}
