use image::RgbImage;

use super::mask::ForegroundMask;

/// Stateful background/foreground separation.
///
/// Implementations receive the downscaled analysis frame, fold it into
/// their background model and report which pixels do not fit that model.
pub trait ForegroundFilter {
    /// Update the model with `frame` and return its foreground mask.
    /// Always succeeds, including on the very first frame.
    fn apply(&mut self, frame: &RgbImage) -> ForegroundMask;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
