use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use slidegrab_common::config::{Config, MotionConfig};
use slidegrab_common::frame::CaptureEvent;
use tracing::{debug, info, warn};

use crate::filter::{ForegroundFilter, MixtureBackground, MixtureParams};
use crate::recorder::{CaptureSink, CaptureState, CaptureStateMachine, SinkError};
use crate::source::{FfmpegSource, FrameSampler, FrameSource, SourceError};

const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source open failed: {0}")]
    SourceOpen(#[from] SourceError),
    #[error("capture write failed: {0}")]
    WriteFailure(#[from] SinkError),
}

/// One slide written during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub seq: u32,
    pub frame_index: u64,
    pub timestamp_minutes: f64,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct RunSummary {
    /// Frames pulled from the source, warm-up included.
    pub frames_sampled: u64,
    pub frames_analyzed: u64,
    pub captures: Vec<CaptureRecord>,
    /// The shutdown future fired before the source ran dry.
    pub interrupted: bool,
    /// Where the hysteresis stood after the last analyzed frame.
    pub final_state: CaptureState,
    pub elapsed: Duration,
}

/// Sampler, filter, hysteresis and sink wired into one sequential loop.
///
/// Each frame is fully analyzed (and written, if captured) before the next
/// one is decoded.
pub struct SlideExtractor<S, F> {
    sampler: FrameSampler<S>,
    filter: F,
    machine: CaptureStateMachine,
    sink: CaptureSink,
    analysis_width: u32,
}

impl<S: FrameSource, F: ForegroundFilter> SlideExtractor<S, F> {
    pub fn new(
        sampler: FrameSampler<S>,
        filter: F,
        band: MotionConfig,
        sink: CaptureSink,
        analysis_width: u32,
    ) -> Self {
        Self {
            sampler,
            filter,
            machine: CaptureStateMachine::new(band),
            sink,
            analysis_width,
        }
    }

    /// Run until the source is exhausted or `shutdown` resolves.
    ///
    /// `shutdown` is only checked between frames. The source (and its
    /// decoder) is released when the extractor is dropped.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let expected = self.sampler.expected_frames();
        info!(
            filter = self.filter.name(),
            expected_frames = expected,
            analysis_width = self.analysis_width,
            output = %self.sink.dir().display(),
            "extraction started"
        );

        tokio::pin!(shutdown);
        let mut captures = Vec::new();
        let mut interrupted = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(
                        frames_analyzed = self.machine.frames_observed(),
                        "shutdown requested, stopping between frames"
                    );
                    interrupted = true;
                    break;
                }
                frame = self.sampler.next_frame() => frame,
            };
            let Some(frame) = next else {
                break;
            };

            let view = frame.analysis_view(self.analysis_width);
            let mask = self.filter.apply(&view);
            let percent = mask.foreground_percent();

            if frame.index % PROGRESS_EVERY == 0 {
                info!(
                    sampled = frame.index,
                    expected = expected,
                    captures = self.machine.captures(),
                    "progress"
                );
            }

            if let Some(seq) = self.machine.observe(percent) {
                let event = CaptureEvent::new(seq, frame);
                let path = self.sink.persist(&event).await?;
                captures.push(CaptureRecord {
                    seq,
                    frame_index: event.frame_index,
                    timestamp_minutes: event.timestamp_minutes,
                    path,
                });
            } else {
                debug!(index = frame.index, percent, "frame held");
            }
        }

        let summary = RunSummary {
            frames_sampled: self.sampler.sampled(),
            frames_analyzed: self.machine.frames_observed(),
            captures,
            interrupted,
            final_state: self.machine.current_state(),
            elapsed: started.elapsed(),
        };
        info!(
            frames_sampled = summary.frames_sampled,
            frames_analyzed = summary.frames_analyzed,
            captures = summary.captures.len(),
            interrupted = summary.interrupted,
            final_state = ?summary.final_state,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "extraction finished"
        );
        Ok(summary)
    }

    /// Give the filter back once the run is over, with the model it built.
    pub fn into_filter(self) -> F {
        self.filter
    }
}

/// Decode `video` with ffmpeg and write its slides into `output_dir`,
/// which must already exist.
pub async fn extract_file(
    video: &Path,
    config: &Config,
    output_dir: &Path,
    shutdown: impl Future<Output = ()>,
) -> Result<RunSummary, PipelineError> {
    let source = FfmpegSource::open(video, &config.sampling, &config.decoder).await?;
    let sampler = FrameSampler::new(
        source,
        config.sampling.frame_rate,
        config.sampling.warmup_frames,
    );
    let filter = MixtureBackground::new(MixtureParams::from_config(
        &config.background,
        config.sampling.frame_rate,
    ));

    let mut extractor = SlideExtractor::new(
        sampler,
        filter,
        config.motion,
        CaptureSink::new(output_dir),
        config.sampling.analysis_width,
    );
    let summary = extractor.run(shutdown).await?;

    // Each video starts from an empty model; the finished one is dropped here.
    let model = extractor.into_filter().into_model();
    debug!(
        frames_seen = model.frames_seen(),
        dimensions = ?model.dimensions(),
        "background model released"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::{pending, ready};

    use image::{Rgb, RgbImage};
    use slidegrab_common::config::BackgroundConfig;

    use super::*;
    use crate::filter::mask::ForegroundMask;
    use crate::source::testing::{solid, ScriptedSource};

    const WIDTH: u32 = 60;
    const HEIGHT: u32 = 40;
    const WARMUP: u64 = 10;

    fn mix(mut z: u64) -> u64 {
        z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn noise(seed: u64, x: u32, y: u32) -> u64 {
        mix(seed
            .wrapping_mul(1_000_003)
            .wrapping_add(y as u64 * 4096 + x as u64))
    }

    /// Light page with five lines of dark "text".
    fn slide(seed: u64) -> RgbImage {
        let mut img = solid(WIDTH, HEIGHT, 235);
        for y in (5..35).step_by(6) {
            for x in 5..55 {
                if noise(seed, x, y) & 1 == 1 {
                    img.put_pixel(x, y, Rgb([20, 20, 20]));
                }
            }
        }
        img
    }

    /// Blinking caret covering 2% of the frame on even ticks.
    fn with_cursor(slide: &RgbImage, tick: u64) -> RgbImage {
        let mut img = slide.clone();
        if tick % 2 == 0 {
            for y in 20..32 {
                for x in 50..54 {
                    img.put_pixel(x, y, Rgb([0, 0, 200]));
                }
            }
        }
        img
    }

    /// Noisy redraw of 10% of the frame.
    fn redrawing(slide: &RgbImage, tick: u64) -> RgbImage {
        let mut img = slide.clone();
        for y in 10..30 {
            for x in 10..22 {
                let n = noise(1000 + tick, x, y);
                img.put_pixel(x, y, Rgb([n as u8, (n >> 8) as u8, (n >> 16) as u8]));
            }
        }
        img
    }

    /// 30 s at 3 fps after warm-up: 45 settled, 20 redrawing (switching
    /// slide halfway), 25 settled on the new slide. Analyzed indices run
    /// 10..=99 and the second settled span starts at index 75.
    fn lecture() -> Vec<RgbImage> {
        let (a, b) = (slide(1), slide(2));
        let mut frames = vec![a.clone(); WARMUP as usize - 1];
        frames.extend((0..45).map(|i| with_cursor(&a, i)));
        frames.extend((0..20).map(|i| redrawing(if i < 10 { &a } else { &b }, i)));
        frames.extend((0..25).map(|i| with_cursor(&b, i)));
        frames
    }

    fn mixture() -> MixtureBackground {
        MixtureBackground::new(MixtureParams::from_config(&BackgroundConfig::default(), 3.0))
    }

    fn band() -> MotionConfig {
        MotionConfig::new(0.1, 3.0).unwrap()
    }

    fn extractor<F: ForegroundFilter>(
        frames: Vec<RgbImage>,
        filter: F,
        dir: &Path,
    ) -> SlideExtractor<ScriptedSource, F> {
        let sampler = FrameSampler::new(ScriptedSource::new(frames), 3.0, WARMUP);
        SlideExtractor::new(sampler, filter, band(), CaptureSink::new(dir), WIDTH)
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Reports a fixed foreground share per frame, ignoring pixel content.
    struct ScriptedFilter {
        percents: VecDeque<u32>,
    }

    impl ForegroundFilter for ScriptedFilter {
        fn apply(&mut self, _frame: &RgbImage) -> ForegroundMask {
            let foreground = self.percents.pop_front().unwrap_or(0) as usize;
            let mut labels = vec![ForegroundMask::BACKGROUND; 100];
            labels[..foreground].fill(ForegroundMask::FOREGROUND);
            ForegroundMask::new(10, 10, labels)
        }
    }

    #[tokio::test]
    async fn lecture_captures_once_per_settled_span() {
        let dir = tempfile::tempdir().unwrap();
        let summary = extractor(lecture(), mixture(), dir.path())
            .run(pending())
            .await
            .unwrap();

        assert_eq!(summary.frames_sampled, 99);
        assert_eq!(summary.frames_analyzed, 90);
        assert!(!summary.interrupted);

        let at: Vec<u64> = summary.captures.iter().map(|c| c.frame_index).collect();
        assert_eq!(at.len(), 2, "captured at {at:?}");
        assert!((10..=15).contains(&at[0]), "first capture at {}", at[0]);
        assert!((75..=80).contains(&at[1]), "second capture at {}", at[1]);

        let written = listing(dir.path());
        assert_eq!(written.len(), 2);
        assert!(written[0].starts_with("000_"));
        assert!(written[1].starts_with("001_"));

        // Captures keep the full-resolution frame of the second slide.
        let kept = image::open(&summary.captures[1].path).unwrap().to_rgb8();
        assert_eq!(kept.dimensions(), (WIDTH, HEIGHT));
    }

    #[tokio::test]
    async fn static_video_captures_once() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![solid(WIDTH, HEIGHT, 90); 40];
        let mut run = extractor(frames, mixture(), dir.path());
        let summary = run.run(pending()).await.unwrap();

        assert_eq!(summary.captures.len(), 1);
        let capture = &summary.captures[0];
        assert_eq!(capture.seq, 0);
        // The first analyzed frame only seeds the model.
        assert_eq!(capture.frame_index, WARMUP + 1);
        assert_eq!(summary.final_state, CaptureState::CapturedSettled);
        assert_eq!(listing(dir.path()), vec!["000_0.06.png"]);

        // The model handed back has seen exactly the analyzed frames.
        let model = run.into_filter().into_model();
        assert_eq!(model.frames_seen(), summary.frames_analyzed);
        assert_eq!(model.dimensions(), (WIDTH, HEIGHT));
    }

    #[tokio::test]
    async fn alternating_motion_captures_at_each_settled_group() {
        let dir = tempfile::tempdir().unwrap();
        let (groups, below, above) = (4u64, 5u64, 3u64);
        let mut percents = VecDeque::new();
        for _ in 0..groups {
            percents.extend(std::iter::repeat(0).take(below as usize));
            percents.extend(std::iter::repeat(12).take(above as usize));
        }
        let frames = vec![solid(8, 8, 0); (WARMUP - 1 + groups * (below + above)) as usize];

        let summary = extractor(frames, ScriptedFilter { percents }, dir.path())
            .run(pending())
            .await
            .unwrap();

        let seqs: Vec<u32> = summary.captures.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(summary.final_state, CaptureState::Active);
        let at: Vec<u64> = summary.captures.iter().map(|c| c.frame_index).collect();
        let expected: Vec<u64> = (0..groups).map(|g| WARMUP + g * (below + above)).collect();
        assert_eq!(at, expected);
        assert!(summary
            .captures
            .windows(2)
            .all(|w| w[0].timestamp_minutes < w[1].timestamp_minutes));

        let paths: Vec<String> = summary
            .captures
            .iter()
            .map(|c| c.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(listing(dir.path()), paths);
    }

    #[tokio::test]
    async fn rerun_is_identical() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        let a = extractor(lecture(), mixture(), first.path())
            .run(pending())
            .await
            .unwrap();
        let b = extractor(lecture(), mixture(), second.path())
            .run(pending())
            .await
            .unwrap();

        let key = |s: &RunSummary| -> Vec<(u32, u64)> {
            s.captures.iter().map(|c| (c.seq, c.frame_index)).collect()
        };
        assert_eq!(key(&a), key(&b));
        assert_eq!(listing(first.path()), listing(second.path()));
    }

    #[tokio::test]
    async fn write_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-created");
        let frames = vec![solid(WIDTH, HEIGHT, 90); 40];

        let err = extractor(frames, mixture(), &missing)
            .run(pending())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::WriteFailure(_)));
        assert!(err.to_string().starts_with("capture write failed"));
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_frame() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![solid(WIDTH, HEIGHT, 90); 40];

        let summary = extractor(frames, mixture(), dir.path())
            .run(ready(()))
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.frames_analyzed, 0);
        assert_eq!(summary.final_state, CaptureState::SettledUncaptured);
        assert!(summary.captures.is_empty());
        assert!(listing(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn unopenable_video_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("missing.mp4");
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let err = extract_file(&video, &Config::default(), &out, pending())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourceOpen(SourceError::NotFound(_))));
        assert!(err.to_string().starts_with("source open failed"));
        assert!(listing(&out).is_empty());
    }
}
