pub mod audio;
pub mod config;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod stage;
pub mod subtitle;
pub mod transcribe;

pub use config::Config;
pub use error::{Result, StageError};
pub use pipeline::{print_summary, Pipeline, PipelineBuilder, PipelineReport};
pub use stage::{Artifact, ArtifactKind, ArtifactStats, Stage, StageOutput, StageResult};
