// yt-dlp invocation contracts
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::process::ToolCommand;
use crate::stage::VideoMetadata;

/// Subtitle container requested from `--convert-subs`.
pub const SUBTITLE_FORMAT: &str = "srt";

/// Helper component fetched by yt-dlp when an alternate JS runtime is used.
pub const REMOTE_COMPONENTS: &str = "ejs:github";

#[derive(Debug, Deserialize)]
struct RawMetadata {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
}

/// Parse the output of `yt-dlp --dump-json`.
///
/// Missing fields fall back to placeholders rather than failing.
pub fn parse_metadata(json: &str) -> Result<VideoMetadata> {
    // Playlists print one object per line; the first entry is the video.
    let first = json.lines().find(|l| !l.trim().is_empty()).unwrap_or("{}");
    let raw: RawMetadata = serde_json::from_str(first)?;

    Ok(VideoMetadata {
        id: raw
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        title: raw.title.unwrap_or_else(|| "Unknown Title".to_string()),
        duration: raw
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::ZERO),
    })
}

/// `MM:SS`, or `HH:MM:SS` once the duration reaches an hour.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

pub fn metadata_command(program: &Path, url: &str, timeout: Duration) -> ToolCommand {
    ToolCommand::new(program, timeout).args(["--dump-json", "--skip-download", url])
}

/// Settings for the subtitle fetch that vary per call.
#[derive(Debug, Clone, Copy)]
pub struct SubtitleRequest<'a> {
    pub url: &'a str,
    pub video_id: &'a str,
    pub languages: &'a [String],
    pub output_dir: &'a Path,
    pub cookies: Option<&'a Path>,
    /// Name passed to `--js-runtimes`, when an alternate runtime is in use.
    pub js_runtime: Option<&'a str>,
}

pub fn subtitle_command(program: &Path, req: &SubtitleRequest<'_>, timeout: Duration) -> ToolCommand {
    let template = req
        .output_dir
        .join(format!("{}.%(ext)s", req.video_id));

    let mut cmd = ToolCommand::new(program, timeout)
        .args(["--write-sub", "--write-auto-sub", "--sub-lang"])
        .arg(req.languages.join(","))
        .args(["--convert-subs", SUBTITLE_FORMAT, "--skip-download", "-o"])
        .arg(template);

    if let Some(cookies) = req.cookies {
        cmd = cmd.arg("--cookies").arg(cookies);
    }

    if let Some(runtime) = req.js_runtime {
        cmd = cmd
            .args(["--js-runtimes", runtime])
            .args(["--remote-components", REMOTE_COMPONENTS]);
    }

    cmd.arg(req.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args_of(cmd: &ToolCommand) -> Vec<String> {
        cmd.arg_list()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_parse_metadata() {
        let json = r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna","duration":213,"ext":"webm"}"#;
        let meta = parse_metadata(json).unwrap();
        assert_eq!(meta.id, "dQw4w9WgXcQ");
        assert_eq!(meta.title, "Never Gonna");
        assert_eq!(meta.duration, Duration::from_secs(213));
    }

    #[test]
    fn test_parse_metadata_defaults() {
        let meta = parse_metadata(r#"{"duration":null}"#).unwrap();
        assert_eq!(meta.id, "unknown");
        assert_eq!(meta.title, "Unknown Title");
        assert_eq!(meta.duration, Duration::ZERO);
    }

    #[test]
    fn test_parse_metadata_invalid_json() {
        assert!(parse_metadata("ERROR: not json").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(125)), "02:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_duration(Duration::ZERO), "00:00");
    }

    #[test]
    fn test_metadata_command() {
        let cmd = metadata_command(Path::new("yt-dlp"), "https://youtu.be/x", Duration::from_secs(1));
        assert_eq!(
            args_of(&cmd),
            vec!["--dump-json", "--skip-download", "https://youtu.be/x"]
        );
    }

    #[test]
    fn test_subtitle_command_with_cookies() {
        let langs = vec!["zh".to_string(), "en".to_string()];
        let cookies = PathBuf::from("/out/cookies.txt");
        let req = SubtitleRequest {
            url: "https://youtu.be/x",
            video_id: "abc",
            languages: &langs,
            output_dir: Path::new("/out"),
            cookies: Some(&cookies),
            js_runtime: None,
        };
        let cmd = subtitle_command(Path::new("yt-dlp"), &req, Duration::from_secs(1));
        assert_eq!(
            args_of(&cmd),
            vec![
                "--write-sub",
                "--write-auto-sub",
                "--sub-lang",
                "zh,en",
                "--convert-subs",
                "srt",
                "--skip-download",
                "-o",
                "/out/abc.%(ext)s",
                "--cookies",
                "/out/cookies.txt",
                "https://youtu.be/x",
            ]
        );
    }

    #[test]
    fn test_subtitle_command_without_cookies() {
        let langs = vec!["en".to_string()];
        let req = SubtitleRequest {
            url: "u",
            video_id: "abc",
            languages: &langs,
            output_dir: Path::new("out"),
            cookies: None,
            js_runtime: None,
        };
        let args = args_of(&subtitle_command(Path::new("yt-dlp"), &req, Duration::from_secs(1)));
        assert!(!args.contains(&"--cookies".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("u"));
    }

    #[test]
    fn test_subtitle_command_with_js_runtime() {
        let langs = vec!["en".to_string()];
        let req = SubtitleRequest {
            url: "u",
            video_id: "abc",
            languages: &langs,
            output_dir: Path::new("out"),
            cookies: None,
            js_runtime: Some("deno"),
        };
        let args = args_of(&subtitle_command(Path::new("yt-dlp"), &req, Duration::from_secs(1)));
        let tail: Vec<&str> = args[args.len() - 5..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["--js-runtimes", "deno", "--remote-components", "ejs:github", "u"]
        );
    }
}
