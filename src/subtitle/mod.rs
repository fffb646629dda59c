pub mod srt;

pub use srt::{is_cue_line, normalize_srt, NormalizedText};

use crate::error::{Result, StageError};
use crate::stage::{
    ensure_not_input, expect_kind, Artifact, ArtifactKind, ArtifactStats, Stage, StageContext,
    StageOutput, StageSpec,
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Turns a subtitle file into plain text. Runs entirely in-process.
pub struct NormalizeStage {
    spec: StageSpec,
    output: Option<PathBuf>,
}

impl NormalizeStage {
    pub fn new() -> Self {
        Self {
            spec: StageSpec {
                name: "normalize",
                input: ArtifactKind::SubtitleFile,
                output: ArtifactKind::Text,
                requires: Vec::new(),
            },
            output: None,
        }
    }

    /// Also write the normalized text to this file.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

impl Default for NormalizeStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for NormalizeStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    async fn run(&self, input: &Artifact, _ctx: &StageContext) -> Result<StageOutput> {
        expect_kind(&self.spec, input)?;
        let path = input
            .path()
            .ok_or_else(|| StageError::Config("subtitle artifact has no path".to_string()))?;

        if !path.exists() {
            return Err(StageError::InputNotFound(path.to_path_buf()));
        }
        if let Some(ref out) = self.output {
            ensure_not_input(path, out).await?;
        }

        info!("Reading subtitle file {}", path.display());
        let bytes = fs::read(path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let normalized = normalize_srt(&content);

        info!(
            "Subtitle text: {:.1} KB, {} chars, {} lines",
            bytes.len() as f64 / 1024.0,
            normalized.chars,
            normalized.lines
        );

        if let Some(ref out) = self.output {
            fs::write(out, &normalized.text).await?;
            info!("Subtitle text saved to {}", out.display());
        }

        let stats = ArtifactStats {
            bytes: Some(bytes.len() as u64),
            chars: Some(normalized.chars),
            lines: Some(normalized.lines),
            ..Default::default()
        };

        Ok(StageOutput::new(Artifact::Text(normalized.text)).with_stats(stats))
    }
}
