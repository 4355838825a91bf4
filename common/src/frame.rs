use image::imageops::FilterType;
use image::RgbImage;

/// A frame pulled from the video at a fixed sampling cadence.
///
/// `image` is the full-resolution buffer; it is only ever written out
/// on capture. All analysis runs on [`Frame::analysis_view`].
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based position among sampled frames (warm-up frames included).
    pub index: u64,
    /// Position in the video, in seconds.
    pub timestamp_secs: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, timestamp_secs: f64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp_secs,
            image,
        }
    }

    /// Downscaled copy `width` pixels wide, aspect ratio preserved.
    ///
    /// Shrinking averages each target pixel over the source area it covers.
    pub fn analysis_view(&self, width: u32) -> RgbImage {
        let (w, h) = self.image.dimensions();
        if w == width || w == 0 || h == 0 {
            return self.image.clone();
        }
        let height = ((h as f64 * width as f64 / w as f64) as u32).max(1);
        if width < w {
            image::imageops::thumbnail(&self.image, width, height)
        } else {
            image::imageops::resize(&self.image, width, height, FilterType::Triangle)
        }
    }
}

/// A decision to keep one frame as a slide. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    /// 0-based, strictly increasing over a run.
    pub seq: u32,
    pub timestamp_minutes: f64,
    /// Index of the sampled frame this capture came from.
    pub frame_index: u64,
    pub image: RgbImage,
}

impl CaptureEvent {
    pub fn new(seq: u32, frame: Frame) -> Self {
        Self {
            seq,
            timestamp_minutes: frame.timestamp_secs / 60.0,
            frame_index: frame.index,
            image: frame.image,
        }
    }

    /// File name for this capture, e.g. `"007_1.25.png"`.
    pub fn file_name(&self) -> String {
        capture_file_name(self.seq, self.timestamp_minutes)
    }
}

/// Zero-padded sequence first so that lexical order equals capture order;
/// the minutes suffix is informational only.
pub fn capture_file_name(seq: u32, timestamp_minutes: f64) -> String {
    format!("{seq:03}_{timestamp_minutes:.2}.png")
}
