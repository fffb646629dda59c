pub mod ytdlp;

pub use ytdlp::{format_duration, parse_metadata, SubtitleRequest, SUBTITLE_FORMAT};

use crate::error::{Result, StageError};
use crate::process::ToolCommand;
use crate::stage::{
    expect_kind, Artifact, ArtifactKind, ArtifactStats, Requirement, Stage, StageContext,
    StageOutput, StageSpec, VideoMetadata,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Session cookies picked up from the output directory when present.
pub const COOKIES_FILE: &str = "cookies.txt";

pub const DEFAULT_LANGUAGES: &str = "zh,en";

pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Split a comma-separated language list, dropping blanks.
pub fn parse_languages(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Optional JavaScript runtime handed to yt-dlp for its remote extraction helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateRuntime {
    pub enabled: bool,
    pub runtime_path: PathBuf,
}

impl Default for AlternateRuntime {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime_path: default_runtime_path(),
        }
    }
}

/// `~/.deno/bin/deno`, or a bare `deno` when there is no home directory.
pub fn default_runtime_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".deno").join("bin").join("deno"))
        .unwrap_or_else(|| PathBuf::from("deno"))
}

impl AlternateRuntime {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            runtime_path: PathBuf::new(),
        }
    }

    /// Resolve to a usable runtime, or `None` if disabled or not installed.
    pub fn resolve(&self) -> Option<ResolvedRuntime> {
        if !self.enabled || !self.runtime_path.is_file() {
            return None;
        }
        let name = self.runtime_path.file_stem()?.to_string_lossy().into_owned();
        let dir = self
            .runtime_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())?
            .to_path_buf();
        Some(ResolvedRuntime { name, dir })
    }
}

/// A runtime that exists on disk, ready to be injected into the child PATH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRuntime {
    pub name: String,
    pub dir: PathBuf,
}

/// Settings for [`DownloadStage`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub program: PathBuf,
    pub languages: Vec<String>,
    pub alternate_runtime: AlternateRuntime,
    pub metadata_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            languages: parse_languages(DEFAULT_LANGUAGES),
            alternate_runtime: AlternateRuntime::default(),
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// Fetches video metadata and subtitle tracks with yt-dlp.
pub struct DownloadStage {
    spec: StageSpec,
    options: DownloadOptions,
    runtime: Option<ResolvedRuntime>,
}

impl DownloadStage {
    pub fn new(options: DownloadOptions) -> Result<Self> {
        if options.languages.is_empty() {
            return Err(StageError::Config(
                "At least one subtitle language is required".to_string(),
            ));
        }

        let runtime = options.alternate_runtime.resolve();
        match runtime {
            Some(ref rt) => debug!("Using {} runtime from {}", rt.name, rt.dir.display()),
            None if options.alternate_runtime.enabled => debug!(
                "Alternate runtime not found at {}",
                options.alternate_runtime.runtime_path.display()
            ),
            None => {}
        }

        Ok(Self {
            spec: StageSpec {
                name: "download",
                input: ArtifactKind::Url,
                output: ArtifactKind::SubtitleFile,
                requires: vec![Requirement::Binary(options.program.display().to_string())],
            },
            options,
            runtime,
        })
    }

    pub fn runtime(&self) -> Option<&ResolvedRuntime> {
        self.runtime.as_ref()
    }

    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let output = ytdlp::metadata_command(&self.options.program, url, self.options.metadata_timeout)
            .run()
            .await?;
        let meta = parse_metadata(&output.stdout)?;

        info!("Video info:");
        info!("  Title:    {}", meta.title);
        info!("  ID:       {}", meta.id);
        info!("  Duration: {}", format_duration(meta.duration));
        Ok(meta)
    }

    fn subtitle_command(&self, url: &str, id: &str, dir: &Path, cookies: Option<&Path>) -> ToolCommand {
        let req = SubtitleRequest {
            url,
            video_id: id,
            languages: &self.options.languages,
            output_dir: dir,
            cookies,
            js_runtime: self.runtime.as_ref().map(|rt| rt.name.as_str()),
        };
        let cmd = ytdlp::subtitle_command(&self.options.program, &req, self.options.download_timeout);
        match self.runtime {
            Some(ref rt) => cmd.path_prefix(&rt.dir),
            None => cmd,
        }
    }

    /// Fetch subtitles, preferring an authenticated call when cookies exist.
    ///
    /// Returns a degraded-success note when the fetch ran without cookies.
    async fn fetch_subtitles(&self, url: &str, id: &str, dir: &Path) -> Result<Option<String>> {
        info!("Downloading subtitles ({})", self.options.languages.join(","));

        let cookies = dir.join(COOKIES_FILE);
        if !cookies.is_file() {
            warn!("No {} in {}, fetching without a session", COOKIES_FILE, dir.display());
            let output = self.subtitle_command(url, id, dir, None).run().await?;
            debug!("yt-dlp: {}", output.stdout.trim());
            return Ok(Some(format!("no {COOKIES_FILE}; fetched unauthenticated")));
        }

        match self.subtitle_command(url, id, dir, Some(&cookies)).run().await {
            Ok(output) => {
                debug!("yt-dlp: {}", output.stdout.trim());
                Ok(None)
            }
            Err(StageError::NonZeroExit { stderr, .. }) => {
                warn!("Authenticated fetch failed ({}), retrying without cookies", stderr);
                let output = self.subtitle_command(url, id, dir, None).run().await?;
                debug!("yt-dlp: {}", output.stdout.trim());
                Ok(Some("cookies rejected; fetched unauthenticated".to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Stage for DownloadStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    async fn run(&self, input: &Artifact, ctx: &StageContext) -> Result<StageOutput> {
        expect_kind(&self.spec, input)?;
        let Artifact::Url(url) = input else {
            return Err(StageError::Config("download input is not a URL".to_string()));
        };

        let meta = self.fetch_metadata(url).await?;
        let degraded = self.fetch_subtitles(url, &meta.id, &ctx.output_dir).await?;

        let mut files = find_subtitles(&ctx.output_dir, &meta.id, &self.options.languages)?;
        if files.is_empty() {
            return Err(StageError::NoMatchingArtifact(format!(
                "no .{} subtitle for video {} in {}",
                SUBTITLE_FORMAT,
                meta.id,
                ctx.output_dir.display()
            )));
        }

        info!("Subtitles downloaded:");
        let mut primary_size = 0;
        for (i, file) in files.iter().enumerate() {
            let size = tokio::fs::metadata(file).await?.len();
            if i == 0 {
                primary_size = size;
            }
            info!(
                "  - {} ({:.1} KB)",
                file.file_name().unwrap_or_default().to_string_lossy(),
                size as f64 / 1024.0
            );
        }

        let primary = files.remove(0);
        let stats = ArtifactStats {
            bytes: Some(primary_size),
            duration: Some(meta.duration),
            ..Default::default()
        };

        let mut output = StageOutput::new(Artifact::subtitle(primary)).with_stats(stats);
        if let Some(reason) = degraded {
            output = output.with_degraded(reason);
        }
        output.video = Some(meta);
        output.extra_files = files;
        Ok(output)
    }
}

/// Language code embedded in `<id>.<lang>.srt`.
fn language_of<'a>(file_name: &'a str, id: &str) -> Option<&'a str> {
    file_name
        .strip_prefix(id)?
        .strip_suffix(&format!(".{SUBTITLE_FORMAT}"))?
        .strip_prefix('.')
}

fn language_rank(lang: Option<&str>, preferences: &[String]) -> usize {
    let Some(lang) = lang else {
        return preferences.len();
    };
    preferences
        .iter()
        .position(|pref| {
            lang.eq_ignore_ascii_case(pref)
                || lang
                    .to_ascii_lowercase()
                    .starts_with(&format!("{}-", pref.to_ascii_lowercase()))
        })
        .unwrap_or(preferences.len())
}

/// Subtitle files for `id` in `dir`, best language first.
pub fn find_subtitles(dir: &Path, id: &str, preferences: &[String]) -> Result<Vec<PathBuf>> {
    let suffix = format!(".{SUBTITLE_FORMAT}");
    let bare = format!("{id}{suffix}");
    let prefix = format!("{id}.");
    let mut found: Vec<(usize, String, PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // `<id>.srt` or `<id>.<lang>.srt`; `<id>` followed by anything else is another video.
        let belongs = name == bare || (name.starts_with(&prefix) && name.ends_with(&suffix));
        if !belongs || !entry.path().is_file() {
            continue;
        }
        let rank = language_rank(language_of(&name, id), preferences);
        found.push((rank, name, entry.path()));
    }

    found.sort();
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn langs(list: &str) -> Vec<String> {
        parse_languages(list)
    }

    #[test]
    fn test_parse_languages() {
        assert_eq!(langs("zh, en,,ja "), vec!["zh", "en", "ja"]);
        assert!(langs(" , ").is_empty());
    }

    #[test]
    fn test_language_of() {
        assert_eq!(language_of("abc.zh-Hans.srt", "abc"), Some("zh-Hans"));
        assert_eq!(language_of("abc.srt", "abc"), None);
        assert_eq!(language_of("abc.en.vtt", "abc"), None);
    }

    #[test]
    fn test_language_rank() {
        let prefs = langs("zh,en");
        assert_eq!(language_rank(Some("zh"), &prefs), 0);
        assert_eq!(language_rank(Some("zh-Hans"), &prefs), 0);
        assert_eq!(language_rank(Some("en"), &prefs), 1);
        assert_eq!(language_rank(Some("fr"), &prefs), 2);
        assert_eq!(language_rank(None, &prefs), 2);
    }

    #[test]
    fn test_find_subtitles_orders_by_preference() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["vid.en.srt", "vid.zh-Hans.srt", "vid.en.vtt", "other.en.srt", "vid.fr.srt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let files = find_subtitles(dir.path(), "vid", &langs("zh,en")).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["vid.zh-Hans.srt", "vid.en.srt", "vid.fr.srt"]);
    }

    #[test]
    fn test_find_subtitles_ignores_ids_sharing_a_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["vidX.en.srt", "vid-2.zh.srt", "vid.srt", "vid.en.srt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let files = find_subtitles(dir.path(), "vid", &langs("en")).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["vid.en.srt", "vid.srt"]);

        std::fs::write(dir.path().join("abcdef.en.srt"), "x").unwrap();
        assert!(find_subtitles(dir.path(), "abc", &langs("en")).unwrap().is_empty());
    }

    #[test]
    fn test_find_subtitles_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vid.en.vtt"), "x").unwrap();
        assert!(find_subtitles(dir.path(), "vid", &langs("en")).unwrap().is_empty());
    }

    #[test]
    fn test_runtime_resolution() {
        assert!(AlternateRuntime::disabled().resolve().is_none());

        let missing = AlternateRuntime {
            enabled: true,
            runtime_path: PathBuf::from("/nonexistent/bin/deno"),
        };
        assert!(missing.resolve().is_none());

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("deno");
        std::fs::write(&bin, "").unwrap();
        let present = AlternateRuntime {
            enabled: true,
            runtime_path: bin,
        };
        let resolved = present.resolve().unwrap();
        assert_eq!(resolved.name, "deno");
        assert_eq!(resolved.dir, dir.path());

        let switched_off = AlternateRuntime {
            enabled: false,
            ..present
        };
        assert!(switched_off.resolve().is_none());
    }

    #[test]
    fn test_rejects_empty_language_list() {
        let options = DownloadOptions {
            languages: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(DownloadStage::new(options), Err(StageError::Config(_))));
    }
}
