use crate::error::{Result, StageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kind of value flowing between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Url,
    VideoFile,
    SubtitleFile,
    AudioFile,
    Text,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Url => write!(f, "url"),
            ArtifactKind::VideoFile => write!(f, "video file"),
            ArtifactKind::SubtitleFile => write!(f, "subtitle file"),
            ArtifactKind::AudioFile => write!(f, "audio file"),
            ArtifactKind::Text => write!(f, "text"),
        }
    }
}

/// A value produced by one stage and handed to the next.
///
/// Stages only ever see `&Artifact`, so an artifact cannot be changed once
/// the producing stage has returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Url(String),
    File { kind: ArtifactKind, path: PathBuf },
    Text(String),
}

impl Artifact {
    pub fn url(url: impl Into<String>) -> Self {
        Artifact::Url(url.into())
    }

    pub fn video(path: impl Into<PathBuf>) -> Self {
        Artifact::File {
            kind: ArtifactKind::VideoFile,
            path: path.into(),
        }
    }

    pub fn subtitle(path: impl Into<PathBuf>) -> Self {
        Artifact::File {
            kind: ArtifactKind::SubtitleFile,
            path: path.into(),
        }
    }

    pub fn audio(path: impl Into<PathBuf>) -> Self {
        Artifact::File {
            kind: ArtifactKind::AudioFile,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Url(_) => ArtifactKind::Url,
            Artifact::File { kind, .. } => *kind,
            Artifact::Text(_) => ArtifactKind::Text,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Artifact::File { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Artifact::Url(url) => write!(f, "{url}"),
            Artifact::File { path, .. } => write!(f, "{}", path.display()),
            Artifact::Text(text) => write!(f, "<{} chars of text>", text.chars().count()),
        }
    }
}

/// Something a stage needs from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// An executable that must be resolvable on PATH.
    Binary(String),
    /// An API credential, supplied at construction.
    Credential(String),
}

/// Static description of a stage. Built once by the stage constructor.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: &'static str,
    pub input: ArtifactKind,
    pub output: ArtifactKind,
    pub requires: Vec<Requirement>,
}

impl StageSpec {
    pub fn binaries(&self) -> impl Iterator<Item = &str> {
        self.requires.iter().filter_map(|r| match r {
            Requirement::Binary(name) => Some(name.as_str()),
            Requirement::Credential(_) => None,
        })
    }
}

/// Size and shape information about a produced artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactStats {
    pub bytes: Option<u64>,
    pub duration: Option<Duration>,
    pub chars: Option<usize>,
    pub lines: Option<usize>,
}

/// Metadata reported by the downloader for a remote video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub duration: Duration,
}

/// Successful outcome of a stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub artifact: Artifact,
    pub stats: ArtifactStats,
    /// Set when the stage succeeded without an optional capability.
    pub degraded: Option<String>,
    pub video: Option<VideoMetadata>,
    /// Secondary files written alongside the primary artifact.
    pub extra_files: Vec<PathBuf>,
}

impl StageOutput {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            stats: ArtifactStats::default(),
            degraded: None,
            video: None,
            extra_files: Vec::new(),
        }
    }

    pub fn with_stats(mut self, stats: ArtifactStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_degraded(mut self, reason: impl Into<String>) -> Self {
        self.degraded = Some(reason.into());
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Outcome of one stage invocation.
#[derive(Debug)]
pub enum StageResult {
    Completed {
        stage: String,
        output: StageOutput,
        elapsed: Duration,
    },
    Failed {
        stage: String,
        error: StageError,
        elapsed: Duration,
    },
}

impl StageResult {
    pub fn stage(&self) -> &str {
        match self {
            StageResult::Completed { stage, .. } | StageResult::Failed { stage, .. } => stage,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Completed { .. })
    }

    pub fn output(&self) -> Option<&StageOutput> {
        match self {
            StageResult::Completed { output, .. } => Some(output),
            StageResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match self {
            StageResult::Failed { error, .. } => Some(error),
            StageResult::Completed { .. } => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            StageResult::Completed { elapsed, .. } | StageResult::Failed { elapsed, .. } => {
                *elapsed
            }
        }
    }

    /// Convert into a plain `Result`, dropping timing information.
    pub fn into_result(self) -> Result<StageOutput> {
        match self {
            StageResult::Completed { output, .. } => Ok(output),
            StageResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Per-run settings shared with every stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub output_dir: PathBuf,
}

impl StageContext {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

/// One discrete processing step wrapping an external capability.
#[async_trait]
pub trait Stage: Send + Sync {
    fn spec(&self) -> &StageSpec;

    async fn run(&self, input: &Artifact, ctx: &StageContext) -> Result<StageOutput>;

    fn name(&self) -> &'static str {
        self.spec().name
    }
}

/// Fail with `ArtifactMismatch` unless `input` is of the kind `spec` declares.
pub fn expect_kind(spec: &StageSpec, input: &Artifact) -> Result<()> {
    if input.kind() != spec.input {
        return Err(StageError::ArtifactMismatch {
            stage: spec.name.to_string(),
            expected: spec.input,
            found: input.kind(),
        });
    }
    Ok(())
}

/// Fail with `Config` if `output` names the same file as `input`.
///
/// Both paths are canonicalized when they exist, so `./a.srt` and `a.srt`
/// compare equal.
pub async fn ensure_not_input(input: &Path, output: &Path) -> Result<()> {
    let same = match (
        tokio::fs::canonicalize(input).await,
        tokio::fs::canonicalize(output).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        return Err(StageError::Config(format!(
            "Refusing to overwrite input {} with stage output",
            input.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> StageSpec {
        StageSpec {
            name: "extract",
            input: ArtifactKind::VideoFile,
            output: ArtifactKind::AudioFile,
            requires: vec![
                Requirement::Binary("ffmpeg".to_string()),
                Requirement::Credential("GROQ_API_KEY".to_string()),
            ],
        }
    }

    #[test]
    fn test_artifact_kinds() {
        assert_eq!(Artifact::url("https://x").kind(), ArtifactKind::Url);
        assert_eq!(Artifact::video("a.mp4").kind(), ArtifactKind::VideoFile);
        assert_eq!(Artifact::Text("hi".into()).kind(), ArtifactKind::Text);
        assert_eq!(
            Artifact::subtitle("a.srt").path(),
            Some(Path::new("a.srt"))
        );
        assert!(Artifact::url("https://x").path().is_none());
    }

    #[test]
    fn test_binaries_filters_credentials() {
        let spec = spec();
        let bins: Vec<&str> = spec.binaries().collect();
        assert_eq!(bins, vec!["ffmpeg"]);
    }

    #[test]
    fn test_expect_kind() {
        let spec = spec();
        assert!(expect_kind(&spec, &Artifact::video("in.mp4")).is_ok());

        let err = expect_kind(&spec, &Artifact::audio("in.mp3")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stage 'extract' expects video file input, got audio file"
        );
    }

    #[test]
    fn test_stage_result_accessors() {
        let ok = StageResult::Completed {
            stage: "normalize".to_string(),
            output: StageOutput::new(Artifact::Text("x".into())).with_degraded("no cookies"),
            elapsed: Duration::from_millis(5),
        };
        assert!(ok.is_success());
        assert_eq!(ok.stage(), "normalize");
        assert!(ok.output().unwrap().is_degraded());

        let failed = StageResult::Failed {
            stage: "transcribe".to_string(),
            error: StageError::EmptyResult,
            elapsed: Duration::ZERO,
        };
        assert!(!failed.is_success());
        assert!(matches!(failed.error(), Some(StageError::EmptyResult)));
        assert!(failed.into_result().is_err());
    }

    #[tokio::test]
    async fn test_ensure_not_input_sees_through_path_spelling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let input = dir.path().join("a.srt");
        std::fs::write(&input, "x").unwrap();

        let aliased = dir.path().join("sub").join("..").join("a.srt");
        assert!(matches!(
            ensure_not_input(&input, &aliased).await,
            Err(StageError::Config(_))
        ));
        assert!(ensure_not_input(&input, &input).await.is_err());
        assert!(ensure_not_input(&input, &dir.path().join("a.txt")).await.is_ok());
    }
}
