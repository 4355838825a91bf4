pub mod ffmpeg;
pub mod sampler;

use image::RgbImage;

pub use ffmpeg::FfmpegSource;
pub use sampler::FrameSampler;

/// What the container reports about the video. Only used for progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
    pub frame_count: Option<u64>,
}

/// A decoded video, read forward on a fixed `1/R` time grid.
///
/// The n-th call to `next_frame` returns the frame shown at `(n - 1) / R`
/// seconds. `None` means the stream is exhausted (or could no longer be
/// decoded) and every later call returns `None` too.
pub trait FrameSource {
    fn info(&self) -> &SourceInfo;

    async fn next_frame(&mut self) -> Option<RgbImage>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("video file not found or unreadable: {0}")]
    NotFound(String),
    #[error("failed to probe {path}: {reason}")]
    Probe { path: String, reason: String },
    #[error("failed to start decoder: {0}")]
    Spawn(String),
}
