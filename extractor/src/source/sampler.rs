use slidegrab_common::frame::Frame;
use tracing::debug;

use super::FrameSource;

/// Turns a [`FrameSource`] into numbered, timestamped [`Frame`]s and drops
/// the warm-up prefix.
///
/// Frames with an index below `warmup_frames` are still decoded so the
/// cursor keeps moving, they are just never handed downstream. The sequence
/// is finite and cannot be restarted; the source (and with it the decoder
/// process) is released when the sampler is dropped.
pub struct FrameSampler<S> {
    source: S,
    frame_rate: f64,
    warmup_frames: u64,
    sampled: u64,
}

impl<S: FrameSource> FrameSampler<S> {
    pub fn new(source: S, frame_rate: f64, warmup_frames: u64) -> Self {
        Self {
            source,
            frame_rate,
            warmup_frames,
            sampled: 0,
        }
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let image = self.source.next_frame().await?;
            self.sampled += 1;
            let index = self.sampled;
            let timestamp_secs = (index - 1) as f64 / self.frame_rate;

            if index < self.warmup_frames {
                debug!(index, timestamp_secs, "warm-up frame skipped");
                continue;
            }
            return Some(Frame::new(index, timestamp_secs, image));
        }
    }

    /// Frames pulled from the source so far, warm-up included.
    pub fn sampled(&self) -> u64 {
        self.sampled
    }

    /// Total number of samples the video should produce, when its duration is known.
    pub fn expected_frames(&self) -> Option<u64> {
        self.source
            .info()
            .duration_secs
            .map(|d| (d * self.frame_rate).ceil() as u64)
    }
}
