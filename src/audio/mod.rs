pub mod extract;

pub use extract::{
    default_audio_path, ffmpeg_command, AudioExtractStage, AUDIO_BITRATE, AUDIO_CODEC,
    AUDIO_SAMPLE_RATE, DEFAULT_FFMPEG_TIMEOUT,
};
