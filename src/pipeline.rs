use crate::download::format_duration;
use crate::error::{Result, StageError};
use crate::process::probe_tool;
use crate::stage::{Artifact, Stage, StageContext, StageOutput, StageResult};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Runs an ordered list of stages, feeding each output to the next stage.
///
/// Execution is strictly sequential and halts at the first failure. Nothing is
/// retried and artifacts from earlier stages are left on disk.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    output_dir: PathBuf,
    preflight: bool,
    show_progress: bool,
}

pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
    output_dir: PathBuf,
    preflight: bool,
    show_progress: bool,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Probe every required binary before the first stage runs.
    pub fn preflight(mut self, enabled: bool) -> Self {
        self.preflight = enabled;
        self
    }

    /// Show a spinner per stage.
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Check that the stages form a chain and build the pipeline.
    pub fn build(self) -> Result<Pipeline> {
        if self.stages.is_empty() {
            return Err(StageError::Config("pipeline has no stages".to_string()));
        }

        for pair in self.stages.windows(2) {
            let (prev, next) = (pair[0].spec(), pair[1].spec());
            if prev.output != next.input {
                return Err(StageError::ArtifactMismatch {
                    stage: next.name.to_string(),
                    expected: next.input,
                    found: prev.output,
                });
            }
        }

        Ok(Pipeline {
            stages: self.stages,
            output_dir: self.output_dir,
            preflight: self.preflight,
            show_progress: self.show_progress,
        })
    }
}

impl Pipeline {
    pub fn builder(output_dir: impl Into<PathBuf>) -> PipelineBuilder {
        PipelineBuilder {
            stages: Vec::new(),
            output_dir: output_dir.into(),
            preflight: false,
            show_progress: false,
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage against `initial`.
    ///
    /// Returns `Err` only when the run cannot start (wrong initial artifact,
    /// unusable output directory). Stage failures are reported in the
    /// returned [`PipelineReport`].
    pub async fn run(&self, initial: Artifact) -> Result<PipelineReport> {
        let started = Instant::now();
        let first = self.stages[0].spec();
        if initial.kind() != first.input {
            return Err(StageError::ArtifactMismatch {
                stage: first.name.to_string(),
                expected: first.input,
                found: initial.kind(),
            });
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let ctx = StageContext::new(&self.output_dir);
        let mut results = Vec::with_capacity(self.stages.len());

        if self.preflight {
            if let Some(failed) = self.check_requirements().await {
                error!("Stage '{}' cannot run: {}", failed.stage(), describe(&failed));
                results.push(failed);
                return Ok(PipelineReport::new(results, started.elapsed()));
            }
        }

        let total = self.stages.len();
        let mut current = initial;

        for (i, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            info!("Stage {}/{}: {} ({})", i + 1, total, name, current);

            let spinner = self.spinner(name);
            let stage_start = Instant::now();
            let outcome = stage.run(&current, &ctx).await;
            let elapsed = stage_start.elapsed();

            match outcome {
                Ok(output) => {
                    if let Some(ref reason) = output.degraded {
                        warn!("Stage '{}' degraded: {}", name, reason);
                    }
                    if let Some(pb) = spinner {
                        pb.finish_with_message(format!("✓ {name} ({:.1}s)", elapsed.as_secs_f64()));
                    }
                    current = output.artifact.clone();
                    results.push(StageResult::Completed {
                        stage: name.to_string(),
                        output,
                        elapsed,
                    });
                }
                Err(error) => {
                    if let Some(pb) = spinner {
                        pb.abandon_with_message(format!("✗ {name}"));
                    }
                    error!("Stage '{}' failed: {}", name, error);
                    results.push(StageResult::Failed {
                        stage: name.to_string(),
                        error,
                        elapsed,
                    });
                    break;
                }
            }
        }

        Ok(PipelineReport::new(results, started.elapsed()))
    }

    async fn check_requirements(&self) -> Option<StageResult> {
        for stage in &self.stages {
            for binary in stage.spec().binaries() {
                if let Err(error) = probe_tool(Path::new(binary)).await {
                    return Some(StageResult::Failed {
                        stage: stage.name().to_string(),
                        error,
                        elapsed: Duration::ZERO,
                    });
                }
            }
        }
        None
    }

    fn spinner(&self, name: &str) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Running {name}..."));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }
}

fn describe(result: &StageResult) -> String {
    result
        .error()
        .map(ToString::to_string)
        .unwrap_or_else(|| "ok".to_string())
}

/// Every stage result of one run, in execution order.
#[derive(Debug)]
pub struct PipelineReport {
    pub results: Vec<StageResult>,
    pub total_time: Duration,
}

impl PipelineReport {
    fn new(results: Vec<StageResult>, total_time: Duration) -> Self {
        Self {
            results,
            total_time,
        }
    }

    /// The last result: the final stage's output, or the first failure.
    pub fn final_result(&self) -> Option<&StageResult> {
        self.results.last()
    }

    pub fn is_success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(StageResult::is_success)
    }

    pub fn failure(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| !r.is_success())
    }

    pub fn final_output(&self) -> Option<&StageOutput> {
        self.final_result().and_then(StageResult::output)
    }

    pub fn output_of(&self, stage: &str) -> Option<&StageOutput> {
        self.results
            .iter()
            .find(|r| r.stage() == stage)
            .and_then(StageResult::output)
    }
}

/// Print a summary of the pipeline results.
pub fn print_summary(report: &PipelineReport) {
    println!();
    println!("{}", style("═══ Summary ═══").bold());
    for result in &report.results {
        match result {
            StageResult::Completed {
                stage,
                output,
                elapsed,
            } => {
                println!(
                    "  {} {:<10} {} ({:.2}s)",
                    style("✓").green(),
                    stage,
                    style(&output.artifact).cyan(),
                    elapsed.as_secs_f64()
                );
                if let Some(ref video) = output.video {
                    println!(
                        "      {} [{}] {}",
                        video.title,
                        video.id,
                        format_duration(video.duration)
                    );
                }
                let stats = &output.stats;
                if let Some(bytes) = stats.bytes {
                    println!("      size:  {:.1} KB", bytes as f64 / 1024.0);
                }
                if let Some(chars) = stats.chars {
                    println!("      chars: {chars}");
                }
                if let Some(lines) = stats.lines {
                    println!("      lines: {lines}");
                }
                for extra in &output.extra_files {
                    println!("      also:  {}", extra.display());
                }
                if let Some(ref reason) = output.degraded {
                    println!("      {} {}", style("!").yellow(), reason);
                }
            }
            StageResult::Failed { stage, error, .. } => {
                println!("  {} {:<10} {}", style("✗").red(), stage, error);
            }
        }
    }
    println!("  Total: {:.2}s", report.total_time.as_secs_f64());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{ArtifactKind, StageSpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeStage {
        spec: StageSpec,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FakeStage {
        fn new(name: &'static str, input: ArtifactKind, output: ArtifactKind) -> Self {
            Self {
                spec: StageSpec {
                    name,
                    input,
                    output,
                    requires: Vec::new(),
                },
                calls: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Stage for FakeStage {
        fn spec(&self) -> &StageSpec {
            &self.spec
        }

        async fn run(&self, input: &Artifact, _ctx: &StageContext) -> Result<StageOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StageError::EmptyResult);
            }
            let artifact = match self.spec.output {
                ArtifactKind::Text => Artifact::Text(format!("{}<{}>", self.spec.name, input)),
                kind => Artifact::File {
                    kind,
                    path: PathBuf::from(format!("{}.out", self.spec.name)),
                },
            };
            Ok(StageOutput::new(artifact))
        }
    }

    #[test]
    fn test_build_rejects_broken_chain() {
        let result = Pipeline::builder("out")
            .stage(FakeStage::new("a", ArtifactKind::Url, ArtifactKind::SubtitleFile))
            .stage(FakeStage::new("b", ArtifactKind::AudioFile, ArtifactKind::Text))
            .build();
        match result {
            Err(StageError::ArtifactMismatch {
                stage,
                expected,
                found,
            }) => {
                assert_eq!(stage, "b");
                assert_eq!(expected, ArtifactKind::AudioFile);
                assert_eq!(found, ArtifactKind::SubtitleFile);
            }
            other => panic!("Expected ArtifactMismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_build_rejects_empty() {
        assert!(Pipeline::builder("out").build().is_err());
    }

    #[tokio::test]
    async fn test_runs_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let pipeline = Pipeline::builder(&out)
            .stage(FakeStage::new("fetch", ArtifactKind::Url, ArtifactKind::SubtitleFile))
            .stage(FakeStage::new("read", ArtifactKind::SubtitleFile, ArtifactKind::Text))
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["fetch", "read"]);

        let report = pipeline.run(Artifact::url("https://example.com/v")).await.unwrap();

        assert!(out.is_dir());
        assert!(report.is_success());
        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.final_output().unwrap().artifact.as_text(),
            Some("read<fetch.out>")
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let last = FakeStage::new("last", ArtifactKind::AudioFile, ArtifactKind::Text);
        let last_calls = last.calls.clone();

        let pipeline = Pipeline::builder(dir.path())
            .stage(FakeStage::new("first", ArtifactKind::VideoFile, ArtifactKind::AudioFile).failing())
            .stage(last)
            .build()
            .unwrap();

        let report = pipeline.run(Artifact::video("in.mp4")).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.results.len(), 1);
        let failure = report.failure().unwrap();
        assert_eq!(failure.stage(), "first");
        assert!(matches!(failure.error(), Some(StageError::EmptyResult)));
        assert_eq!(last_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejects_wrong_initial_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder(dir.path())
            .stage(FakeStage::new("fetch", ArtifactKind::Url, ArtifactKind::SubtitleFile))
            .build()
            .unwrap();
        let result = pipeline.run(Artifact::Text("hi".into())).await;
        assert!(matches!(result, Err(StageError::ArtifactMismatch { .. })));
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let mut stage = FakeStage::new("tool", ArtifactKind::Url, ArtifactKind::Text);
        stage
            .spec
            .requires
            .push(crate::stage::Requirement::Binary("no-such-binary-abc".to_string()));
        let calls = stage.calls.clone();

        let pipeline = Pipeline::builder(dir.path())
            .stage(stage)
            .preflight(true)
            .build()
            .unwrap();
        let report = pipeline.run(Artifact::url("u")).await.unwrap();

        assert!(matches!(
            report.final_result().and_then(StageResult::error),
            Some(StageError::ExternalToolNotFound(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
