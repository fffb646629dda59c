use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use subdigest::audio::AudioExtractStage;
use subdigest::config::Config;
use subdigest::download::DownloadStage;
use subdigest::subtitle::NormalizeStage;
use subdigest::transcribe::TranscribeStage;
use subdigest::{print_summary, Artifact, Pipeline, PipelineReport};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "subdigest")]
#[command(version, about = "From video URL to plain text")]
#[command(long_about = "Fetch subtitles with yt-dlp, extract audio with FFmpeg, transcribe with the Groq Whisper API, and reduce subtitles to plain text ready for summarising.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not show progress spinners
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Download subtitles for a video URL
    Download {
        url: String,

        /// Subtitle languages in priority order (e.g. zh,en)
        #[arg(short, long)]
        lang: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Never hand an alternate JavaScript runtime to yt-dlp
        #[arg(long)]
        no_alt_runtime: bool,
    },

    /// Extract MP3 audio from a video file
    Extract {
        video: PathBuf,

        /// Output audio file (defaults to the video path with .mp3)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Transcribe an audio file with the Whisper API
    Transcribe {
        audio: PathBuf,

        /// Save the transcript to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// API key (falls back to GROQ_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Reduce an SRT subtitle file to plain text
    Normalize {
        subtitle: PathBuf,

        /// Save the text to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download subtitles for a URL and print them as plain text
    Run {
        url: String,

        #[arg(short, long)]
        lang: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Save the text to this file
        #[arg(long)]
        save: Option<PathBuf>,

        #[arg(long)]
        no_alt_runtime: bool,
    },

    /// Extract audio from a local video and transcribe it
    RunVideo {
        video: PathBuf,

        /// Output directory for the audio and transcript
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[arg(long)]
        api_key: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "subdigest=debug" } else { "subdigest=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Directory that will hold `file`, or the working directory.
fn parent_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn print_text(heading: &str, text: &str) {
    let rule = "=".repeat(60);
    println!("{rule}");
    println!("{heading}");
    println!("{rule}");
    println!("{text}");
    println!("{rule}");
}

/// Run the pipeline, print its summary, and turn a stage failure into an error.
async fn execute(pipeline: Pipeline, initial: Artifact) -> Result<PipelineReport> {
    let report = pipeline.run(initial).await?;
    print_summary(&report);

    if let Some(failure) = report.failure() {
        let error = failure
            .error()
            .map(ToString::to_string)
            .unwrap_or_default();
        anyhow::bail!("stage '{}' failed: {}", failure.stage(), error);
    }
    Ok(report)
}

fn final_text(report: &PipelineReport) -> Option<&str> {
    report.final_output().and_then(|o| o.artifact.as_text())
}

async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let progress = !cli.quiet;

    match cli.command {
        Command::Download {
            url,
            lang,
            output,
            no_alt_runtime,
        } => {
            let mut options = config.download_options(lang.as_deref());
            options.alternate_runtime.enabled &= !no_alt_runtime;

            let pipeline = Pipeline::builder(&output)
                .stage(DownloadStage::new(options)?)
                .show_progress(progress)
                .build()?;
            execute(pipeline, Artifact::url(url)).await?;
            info!("Output directory: {}", output.display());
        }

        Command::Extract { video, output } => {
            let dir = parent_dir(output.as_deref().unwrap_or(video.as_path()));
            let mut stage = AudioExtractStage::new().with_timeout(config.ffmpeg_timeout());
            if let Some(out) = output {
                stage = stage.with_output(out);
            }

            let pipeline = Pipeline::builder(dir)
                .stage(stage)
                .show_progress(progress)
                .build()?;
            execute(pipeline, Artifact::video(video)).await?;
        }

        Command::Transcribe {
            audio,
            output,
            api_key,
        } => {
            let mut stage =
                TranscribeStage::whisper(config.resolve_api_key(api_key), config.whisper_settings())?;
            let dir = match output {
                Some(ref out) => parent_dir(out),
                None => parent_dir(&audio),
            };
            if let Some(out) = output {
                stage = stage.with_output(out);
            }

            let pipeline = Pipeline::builder(dir)
                .stage(stage)
                .show_progress(progress)
                .build()?;
            let report = execute(pipeline, Artifact::audio(audio)).await?;
            if let Some(text) = final_text(&report) {
                print_text("Transcript:", text);
            }
        }

        Command::Normalize { subtitle, output } => {
            let dir = parent_dir(output.as_deref().unwrap_or(subtitle.as_path()));
            let mut stage = NormalizeStage::new();
            if let Some(out) = output {
                stage = stage.with_output(out);
            }

            let pipeline = Pipeline::builder(dir)
                .stage(stage)
                .show_progress(progress)
                .build()?;
            let report = execute(pipeline, Artifact::subtitle(subtitle)).await?;
            if let Some(text) = final_text(&report) {
                print_text("Subtitle text:", text);
            }
        }

        Command::Run {
            url,
            lang,
            output,
            save,
            no_alt_runtime,
        } => {
            let mut options = config.download_options(lang.as_deref());
            options.alternate_runtime.enabled &= !no_alt_runtime;

            let mut normalize = NormalizeStage::new();
            if let Some(path) = save {
                normalize = normalize.with_output(path);
            }

            let pipeline = Pipeline::builder(&output)
                .stage(DownloadStage::new(options)?)
                .stage(normalize)
                .preflight(true)
                .show_progress(progress)
                .build()?;
            let report = execute(pipeline, Artifact::url(url)).await?;
            if let Some(text) = final_text(&report) {
                print_text("Subtitle text:", text);
            }
        }

        Command::RunVideo {
            video,
            output,
            api_key,
        } => {
            let stem = video
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "audio".to_string());

            let extract = AudioExtractStage::new()
                .with_timeout(config.ffmpeg_timeout())
                .with_output(output.join(format!("{stem}.mp3")));
            let transcribe =
                TranscribeStage::whisper(config.resolve_api_key(api_key), config.whisper_settings())?
                    .with_output(output.join(format!("{stem}.txt")));

            let pipeline = Pipeline::builder(&output)
                .stage(extract)
                .stage(transcribe)
                .preflight(true)
                .show_progress(progress)
                .build()?;
            let report = execute(pipeline, Artifact::video(video)).await?;
            if let Some(text) = final_text(&report) {
                print_text("Transcript:", text);
            }
        }
    }

    Ok(())
}

/// Validate only the settings the chosen subcommand reads.
fn validate_for(command: &Command, config: &Config) -> subdigest::Result<()> {
    match command {
        Command::Download { lang, .. } | Command::Run { lang, .. } => {
            config.validate_download(lang.as_deref())
        }
        Command::Extract { .. } => config.validate_extract(),
        Command::Transcribe { .. } => config.validate_transcription(),
        Command::RunVideo { .. } => {
            config.validate_extract()?;
            config.validate_transcription()
        }
        Command::Normalize { .. } => Ok(()),
    }
}

async fn try_main(cli: Cli) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    validate_for(&cli.command, &config).context("Configuration validation failed")?;
    dispatch(cli, config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match try_main(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
