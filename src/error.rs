use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::stage::ArtifactKind;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("External tool not found: {0}. Install it and make sure it is on PATH")]
    ExternalToolNotFound(String),

    #[error("{tool} exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} did not finish within {}s", .after.as_secs())]
    Timeout { tool: String, after: Duration },

    #[error("Artifact not produced: {}", .0.display())]
    ArtifactNotProduced(PathBuf),

    #[error("No matching artifact: {0}")]
    NoMatchingArtifact(String),

    #[error("Credential missing: {0}")]
    CredentialMissing(String),

    #[error("Payload of {size} bytes exceeds service limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Service error ({status}): {body}")]
    ServiceError { status: u16, body: String },

    #[error("Service returned an empty result")]
    EmptyResult,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Stage '{stage}' expects {expected} input, got {found}")]
    ArtifactMismatch {
        stage: String,
        expected: ArtifactKind,
        found: ArtifactKind,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StageError::Transport(format!("request timed out: {err}"))
        } else {
            StageError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_message() {
        let err = StageError::NonZeroExit {
            tool: "ffmpeg".to_string(),
            code: Some(1),
            stderr: "Invalid data found".to_string(),
        };
        assert_eq!(err.to_string(), "ffmpeg exited with status 1: Invalid data found");

        let err = StageError::NonZeroExit {
            tool: "yt-dlp".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = StageError::PayloadTooLarge {
            size: 30,
            limit: 25,
        };
        assert_eq!(
            err.to_string(),
            "Payload of 30 bytes exceeds service limit of 25 bytes"
        );
    }
}
