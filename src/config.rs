use crate::download::{
    default_runtime_path, parse_languages, AlternateRuntime, DownloadOptions, DEFAULT_LANGUAGES,
};
use crate::error::{Result, StageError};
use crate::transcribe::whisper::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::transcribe::WhisperSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub groq_api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    /// Comma-separated subtitle language preference.
    pub languages: String,
    /// Alternate JavaScript runtime for yt-dlp.
    pub deno_path: PathBuf,
    pub use_alternate_runtime: bool,
    pub http_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub ffmpeg_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groq_api_key: None,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            languages: DEFAULT_LANGUAGES.to_string(),
            deno_path: default_runtime_path(),
            use_alternate_runtime: true,
            http_timeout_secs: 300,
            metadata_timeout_secs: 120,
            download_timeout_secs: 600,
            ffmpeg_timeout_secs: 1800,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    StageError::Config(format!("{}: {e}", config_path.display()))
                })?;
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GROQ_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.groq_api_key = Some(key);
        }
        if let Some(url) = lookup("SUBDIGEST_API_URL") {
            self.api_base_url = url;
        }
        if let Some(model) = lookup("SUBDIGEST_MODEL") {
            self.model = model;
        }
        if let Some(languages) = lookup("SUBDIGEST_LANGUAGES") {
            self.languages = languages;
        }
        if let Some(path) = lookup("SUBDIGEST_DENO_PATH") {
            self.deno_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("SUBDIGEST_HTTP_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.http_timeout_secs = secs;
        }
    }

    /// Check every field. Subcommands call the narrower checks below so a
    /// bad value only blocks the commands that use it.
    pub fn validate(&self) -> Result<()> {
        self.validate_download(None)?;
        self.validate_extract()?;
        self.validate_transcription()
    }

    /// `languages` is the `--lang` override, when one was given.
    pub fn validate_download(&self, languages: Option<&str>) -> Result<()> {
        if parse_languages(languages.unwrap_or(&self.languages)).is_empty() {
            return Err(StageError::Config(
                "languages must name at least one subtitle language".to_string(),
            ));
        }
        positive("metadata_timeout_secs", self.metadata_timeout_secs)?;
        positive("download_timeout_secs", self.download_timeout_secs)
    }

    pub fn validate_extract(&self) -> Result<()> {
        positive("ffmpeg_timeout_secs", self.ffmpeg_timeout_secs)
    }

    pub fn validate_transcription(&self) -> Result<()> {
        positive("http_timeout_secs", self.http_timeout_secs)?;
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(StageError::Config(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }
        Ok(())
    }

    /// Explicit key wins over the configured one.
    pub fn resolve_api_key(&self, explicit: Option<String>) -> Option<String> {
        explicit
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.groq_api_key.clone())
    }

    pub fn download_options(&self, languages: Option<&str>) -> DownloadOptions {
        DownloadOptions {
            languages: parse_languages(languages.unwrap_or(&self.languages)),
            alternate_runtime: AlternateRuntime {
                enabled: self.use_alternate_runtime,
                runtime_path: self.deno_path.clone(),
            },
            metadata_timeout: Duration::from_secs(self.metadata_timeout_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            ..Default::default()
        }
    }

    pub fn whisper_settings(&self) -> WhisperSettings {
        WhisperSettings {
            base_url: self.api_base_url.clone(),
            model: self.model.clone(),
            request_timeout: Duration::from_secs(self.http_timeout_secs),
            ..Default::default()
        }
    }

    pub fn ffmpeg_timeout(&self) -> Duration {
        Duration::from_secs(self.ffmpeg_timeout_secs)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("subdigest").join("config.toml"))
    }
}

fn positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(StageError::Config(format!("{name} must be greater than 0")));
    }
    Ok(())
}
