pub mod whisper;

pub use whisper::{WhisperClient, WhisperSettings, MAX_FILE_SIZE};

use crate::error::{Result, StageError};
use crate::stage::{
    ensure_not_input, expect_kind, Artifact, ArtifactKind, ArtifactStats, Requirement, Stage,
    StageContext, StageOutput, StageSpec,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Text returned by a speech-to-text service.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub duration: Option<Duration>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript>;
    fn name(&self) -> &'static str;
    /// Environment variable that conventionally holds the credential.
    fn credential(&self) -> &'static str;
    /// Largest upload the backend accepts, in bytes.
    fn max_file_size(&self) -> u64;
}

/// Sends an audio file to a remote transcriber and yields its text.
pub struct TranscribeStage {
    spec: StageSpec,
    transcriber: Box<dyn Transcriber>,
    output: Option<PathBuf>,
}

impl TranscribeStage {
    pub fn new(transcriber: Box<dyn Transcriber>) -> Self {
        Self {
            spec: StageSpec {
                name: "transcribe",
                input: ArtifactKind::AudioFile,
                output: ArtifactKind::Text,
                requires: vec![Requirement::Credential(transcriber.credential().to_string())],
            },
            transcriber,
            output: None,
        }
    }

    /// Build a Whisper-backed stage from an already-resolved credential.
    pub fn whisper(api_key: Option<String>, settings: WhisperSettings) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            StageError::CredentialMissing(
                "GROQ_API_KEY not set. Export it with: export GROQ_API_KEY=gsk_... or pass --api-key"
                    .to_string(),
            )
        })?;
        Ok(Self::new(Box::new(WhisperClient::with_settings(
            api_key, settings,
        )?)))
    }

    /// Also write the transcript to this file.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

#[async_trait]
impl Stage for TranscribeStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    async fn run(&self, input: &Artifact, _ctx: &StageContext) -> Result<StageOutput> {
        expect_kind(&self.spec, input)?;
        let path = input
            .path()
            .ok_or_else(|| StageError::Config("audio artifact has no path".to_string()))?;

        if !path.exists() {
            return Err(StageError::InputNotFound(path.to_path_buf()));
        }
        if let Some(ref out) = self.output {
            ensure_not_input(path, out).await?;
        }

        let size = tokio::fs::metadata(path).await?.len();
        let limit = self.transcriber.max_file_size();
        if size > limit {
            return Err(StageError::PayloadTooLarge { size, limit });
        }
        debug!("Sending {} bytes to {}", size, self.transcriber.name());

        let transcript = self.transcriber.transcribe(path).await?;
        let chars = transcript.text.chars().count();
        info!("Transcription complete: {} chars", chars);
        if let Some(ref lang) = transcript.language {
            info!("Detected language: {}", lang);
        }

        if let Some(ref out) = self.output {
            tokio::fs::write(out, &transcript.text).await?;
            info!("Transcript saved to {}", out.display());
        }

        let stats = ArtifactStats {
            chars: Some(chars),
            lines: Some(transcript.text.lines().count()),
            duration: transcript.duration,
            bytes: Some(transcript.text.len() as u64),
        };
        Ok(StageOutput::new(Artifact::Text(transcript.text)).with_stats(stats))
    }
}
