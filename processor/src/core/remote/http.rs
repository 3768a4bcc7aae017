//! JSON-over-HTTP clients for the remote pipeline services.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    AiAdaptor, AudioSeparator, CloneVoiceRequest, OptimizeRequest, PolishRequest,
    RecognizedSpeaker, RemoteError, RemoteResult, SeparatedTracks, TranslateRequest,
};
use crate::core::settings::RemoteEndpoint;
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Shared Client
// =============================================================================

/// reqwest client bound to one endpoint, with bounded retry.
#[derive(Clone)]
struct JsonClient {
    endpoint: RemoteEndpoint,
    client: reqwest::Client,
}

impl JsonClient {
    fn new(endpoint: RemoteEndpoint) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs.max(1)))
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { endpoint, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.base_url, path.trim_start_matches('/'))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> RemoteResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        let url = url.as_str();
        let client = &self.client;
        with_retry(&self.endpoint, path, || async move {
            let response = client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(map_send_error)?;
            decode(response).await
        })
        .await
    }

    async fn get_ok(&self, path: &str) -> RemoteResult<()> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(map_send_error)?;
        if !response.status().is_success() {
            return Err(RemoteError::Status {
                code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

fn map_send_error(e: reqwest::Error) -> RemoteError {
    if e.is_connect() || e.is_timeout() {
        RemoteError::Unavailable(e.to_string())
    } else {
        RemoteError::Request(e.to_string())
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> RemoteResult<R> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RemoteError::Request(format!("Failed to read response: {}", e)))?;

    if !status.is_success() {
        return Err(RemoteError::Status {
            code: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| RemoteError::Decode(format!("{}: {}", e, body)))
}

/// Run `op`, retrying transient failures with doubling backoff.
async fn with_retry<T, F, Fut>(endpoint: &RemoteEndpoint, what: &str, op: F) -> RemoteResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let mut backoff = Duration::from_millis(endpoint.retry_backoff_ms);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < endpoint.max_retries => {
                attempt += 1;
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what,
                    attempt,
                    endpoint.max_retries + 1,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct AudioPathRequest<'a> {
    audio_path: &'a Path,
}

#[derive(Serialize)]
struct SeparateRequest<'a> {
    audio_path: &'a Path,
    output_dir: &'a Path,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    speakers: Vec<RecognizedSpeaker>,
}

#[derive(Deserialize)]
struct PolishResponse {
    polished_text: String,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

#[derive(Deserialize)]
struct OptimizeResponse {
    optimized_text: String,
}

#[derive(Deserialize)]
struct CloneVoiceResponse {
    audio_path: PathBuf,
}

// =============================================================================
// AI Adaptor
// =============================================================================

/// HTTP client for the AI adaptor service.
#[derive(Clone)]
pub struct HttpAiAdaptor {
    inner: JsonClient,
}

impl HttpAiAdaptor {
    pub fn new(endpoint: RemoteEndpoint) -> CoreResult<Self> {
        Ok(Self {
            inner: JsonClient::new(endpoint)?,
        })
    }
}

#[async_trait]
impl AiAdaptor for HttpAiAdaptor {
    async fn recognize(&self, audio_path: &Path) -> RemoteResult<Vec<RecognizedSpeaker>> {
        let response: RecognizeResponse = self
            .inner
            .post("v1/asr", &AudioPathRequest { audio_path })
            .await?;
        Ok(response.speakers)
    }

    async fn polish(&self, request: &PolishRequest) -> RemoteResult<String> {
        let response: PolishResponse = self.inner.post("v1/polish", request).await?;
        Ok(response.polished_text)
    }

    async fn translate(&self, request: &TranslateRequest) -> RemoteResult<String> {
        let response: TranslateResponse = self.inner.post("v1/translate", request).await?;
        Ok(response.translated_text)
    }

    async fn optimize(&self, request: &OptimizeRequest) -> RemoteResult<String> {
        let response: OptimizeResponse = self.inner.post("v1/optimize", request).await?;
        Ok(response.optimized_text)
    }

    async fn clone_voice(&self, request: &CloneVoiceRequest) -> RemoteResult<PathBuf> {
        let response: CloneVoiceResponse = self.inner.post("v1/clone-voice", request).await?;
        Ok(response.audio_path)
    }
}

// =============================================================================
// Audio Separator
// =============================================================================

/// HTTP client for the audio separation service.
#[derive(Clone)]
pub struct HttpAudioSeparator {
    inner: JsonClient,
}

impl HttpAudioSeparator {
    pub fn new(endpoint: RemoteEndpoint) -> CoreResult<Self> {
        Ok(Self {
            inner: JsonClient::new(endpoint)?,
        })
    }
}

#[async_trait]
impl AudioSeparator for HttpAudioSeparator {
    async fn health_check(&self) -> RemoteResult<()> {
        self.inner.get_ok("health").await
    }

    async fn separate(&self, audio_path: &Path, output_dir: &Path) -> RemoteResult<SeparatedTracks> {
        self.inner
            .post(
                "v1/separate",
                &SeparateRequest {
                    audio_path,
                    output_dir,
                },
            )
            .await
    }
}
