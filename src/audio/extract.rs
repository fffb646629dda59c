use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Result, StageError};
use crate::process::ToolCommand;
use crate::stage::{
    ensure_not_input, expect_kind, Artifact, ArtifactKind, ArtifactStats, Requirement, Stage,
    StageContext, StageOutput, StageSpec,
};

/// Encoder passed to `-acodec`.
pub const AUDIO_CODEC: &str = "libmp3lame";
/// Constant bitrate passed to `-ab`.
pub const AUDIO_BITRATE: &str = "128k";
/// Sample rate in Hz passed to `-ar`.
pub const AUDIO_SAMPLE_RATE: u32 = 44100;
/// Extension of the encoded output.
pub const AUDIO_EXTENSION: &str = "mp3";

/// Default budget for a single FFmpeg run.
pub const DEFAULT_FFMPEG_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default output path: the input with its extension replaced by `mp3`.
pub fn default_audio_path(input: &Path) -> PathBuf {
    input.with_extension(AUDIO_EXTENSION)
}

/// Build the FFmpeg invocation that strips video and encodes CBR MP3.
pub fn ffmpeg_command(program: &Path, input: &Path, output: &Path, timeout: Duration) -> ToolCommand {
    ToolCommand::new(program, timeout)
        .arg("-i")
        .arg(input)
        .args(["-vn", "-acodec", AUDIO_CODEC, "-ab", AUDIO_BITRATE, "-ar"])
        .arg(AUDIO_SAMPLE_RATE.to_string())
        .arg("-y")
        .arg(output)
}

/// Extracts the audio track of a local video with FFmpeg.
pub struct AudioExtractStage {
    spec: StageSpec,
    ffmpeg: PathBuf,
    output: Option<PathBuf>,
    timeout: Duration,
}

impl AudioExtractStage {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    /// Use a specific FFmpeg executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        let ffmpeg = program.into();
        Self {
            spec: StageSpec {
                name: "extract",
                input: ArtifactKind::VideoFile,
                output: ArtifactKind::AudioFile,
                requires: vec![Requirement::Binary(ffmpeg.display().to_string())],
            },
            ffmpeg,
            output: None,
            timeout: DEFAULT_FFMPEG_TIMEOUT,
        }
    }

    /// Write the audio to this exact path instead of the derived default.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the output path for `input`.
    ///
    /// An explicit path wins; a relative default lands next to the input.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_audio_path(input))
    }

    pub async fn extract(&self, input: &Path) -> Result<StageOutput> {
        if !input.exists() {
            return Err(StageError::InputNotFound(input.to_path_buf()));
        }

        let output = self.output_path(input);
        ensure_not_input(input, &output).await?;

        info!("Extracting audio");
        info!("  Input:  {}", input.display());
        info!("  Output: {}", output.display());

        let result = ffmpeg_command(&self.ffmpeg, input, &output, self.timeout)
            .run()
            .await?;
        debug!("FFmpeg stderr tail: {}", tail(&result.stderr, 400));

        if !output.exists() {
            return Err(StageError::ArtifactNotProduced(output));
        }

        let size = tokio::fs::metadata(&output).await?.len();
        info!(
            "Audio extracted: {} ({:.1} MB)",
            output.display(),
            size as f64 / (1024.0 * 1024.0)
        );

        let stats = ArtifactStats {
            bytes: Some(size),
            ..Default::default()
        };
        Ok(StageOutput::new(Artifact::audio(output)).with_stats(stats))
    }
}

impl Default for AudioExtractStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for AudioExtractStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    async fn run(&self, input: &Artifact, _ctx: &StageContext) -> Result<StageOutput> {
        expect_kind(&self.spec, input)?;
        match input.path() {
            Some(path) => self.extract(path).await,
            None => Err(StageError::Config("video artifact has no path".to_string())),
        }
    }
}

fn tail(s: &str, max: usize) -> &str {
    let s = s.trim_end();
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
