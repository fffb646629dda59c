use crate::error::{Result, StageError};
use crate::transcribe::{Transcriber, Transcript};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

/// Groq's OpenAI-compatible API root.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Model requested from the service.
pub const DEFAULT_MODEL: &str = "whisper-large-v3";

/// Maximum upload size accepted by the service (25 MB).
pub const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Whole-request budget, upload included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint and timing settings for [`WhisperClient`].
#[derive(Debug, Clone)]
pub struct WhisperSettings {
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for WhisperSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Client for an OpenAI-compatible `audio/transcriptions` endpoint.
pub struct WhisperClient {
    client: reqwest::Client,
    api_key: String,
    settings: WhisperSettings,
}

impl std::fmt::Debug for WhisperClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperClient")
            .field("api_key", &"<redacted>")
            .field("settings", &self.settings)
            .finish()
    }
}

impl WhisperClient {
    /// Create a client against the default Groq endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_settings(api_key, WhisperSettings::default())
    }

    pub fn with_settings(api_key: impl Into<String>, settings: WhisperSettings) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(StageError::CredentialMissing(
                "API key is empty. Pass --api-key or export GROQ_API_KEY".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            settings,
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// Build the multipart form for the API request.
    async fn build_form(&self, audio_path: &Path) -> Result<Form> {
        let file_bytes = fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(mime_type(audio_path))?;

        Ok(Form::new()
            .part("file", file_part)
            .text("model", self.settings.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", "0"))
    }

    async fn call_api(&self, form: Form) -> Result<WhisperResponse> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        debug!("Transcription API response status: {}", status);

        let body = response.text().await?;
        if !status.is_success() {
            return Err(StageError::ServiceError {
                status: status.as_u16(),
                body: error_message(&body),
            });
        }

        debug!("Transcription API response: {}", preview(&body, 500));
        serde_json::from_str(&body)
            .map_err(|e| StageError::Transport(format!("Malformed service response: {e}")))
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript> {
        if !audio.exists() {
            return Err(StageError::InputNotFound(audio.to_path_buf()));
        }

        let size = fs::metadata(audio).await?.len();
        info!(
            "Transcribing {} ({:.1} MB)",
            audio.display(),
            size as f64 / (1024.0 * 1024.0)
        );
        if size > MAX_FILE_SIZE {
            return Err(StageError::PayloadTooLarge {
                size,
                limit: MAX_FILE_SIZE,
            });
        }

        let form = self.build_form(audio).await?;

        info!("Calling {} ({})", self.endpoint(), self.settings.model);
        let started = Instant::now();
        let response = self.call_api(form).await?;
        info!("API response time: {:.1}s", started.elapsed().as_secs_f64());

        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(StageError::EmptyResult);
        }

        Ok(Transcript {
            text,
            language: response.language,
            duration: response
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Duration::from_secs_f64),
        })
    }

    fn name(&self) -> &'static str {
        "Groq Whisper"
    }

    fn credential(&self) -> &'static str {
        "GROQ_API_KEY"
    }

    fn max_file_size(&self) -> u64 {
        MAX_FILE_SIZE
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Prefer the service's own message when the error body is structured.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(api_error) => api_error.error.message,
        Err(_) => body.trim().to_string(),
    }
}

fn preview(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_is_rejected() {
        let result = WhisperClient::new("   ");
        assert!(matches!(result, Err(StageError::CredentialMissing(_))));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let settings = WhisperSettings {
            base_url: "http://localhost:9000/v1/".to_string(),
            ..Default::default()
        };
        let client = WhisperClient::with_settings("key", settings).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9000/v1/audio/transcriptions");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = WhisperClient::new("gsk_secret").unwrap();
        assert!(!format!("{client:?}").contains("gsk_secret"));
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(mime_type(Path::new("a.WAV")), "audio/wav");
        assert_eq!(mime_type(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn test_error_message_prefers_structured_body() {
        let body = r#"{"error":{"message":"Invalid API Key","type":"invalid_request_error"}}"#;
        assert_eq!(error_message(body), "Invalid API Key");
        assert_eq!(error_message("  upstream down \n"), "upstream down");
    }

    #[test]
    fn test_parse_verbose_json() {
        let body = r#"{"task":"transcribe","language":"English","duration":2.5,"text":" Hello there. ","segments":[]}"#;
        let parsed: WhisperResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text, " Hello there. ");
        assert_eq!(parsed.language.as_deref(), Some("English"));
        assert_eq!(parsed.duration, Some(2.5));
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("hello", 3), "hel");
        assert_eq!(preview("日本", 4), "日");
    }
}
