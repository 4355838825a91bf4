use image::RgbImage;
use slidegrab_common::config::BackgroundConfig;
use tracing::{debug, warn};

use super::mask::ForegroundMask;
use super::traits::ForegroundFilter;

/// Gaussians kept per pixel.
const MAX_MODES: usize = 5;
/// Heaviest modes whose weights add up to this share are "the background".
const BACKGROUND_RATIO: f32 = 0.9;
/// Squared distance (in variances) within which a sample updates an existing mode.
const GENERATE_THRESHOLD: f32 = 9.0;
const VARIANCE_INIT: f32 = 15.0;
const VARIANCE_MIN: f32 = 4.0;
const VARIANCE_MAX: f32 = 75.0;
/// Weight prior that lets unsupported modes die out.
const COMPLEXITY_REDUCTION: f32 = 0.05;
/// A shadow is at most this much darker than the background it falls on.
const SHADOW_TAU: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
struct Gaussian {
    weight: f32,
    mean: [f32; 3],
    variance: f32,
}

/// Running per-pixel background statistics.
///
/// Every pixel carries up to [`MAX_MODES`] RGB Gaussians sorted by weight.
/// Weights decay geometrically with a horizon of `history` frames, so old
/// scenes fade out instead of being cut off.
///
/// The model is a plain owned value: move it into a [`MixtureBackground`]
/// with [`MixtureBackground::with_model`] and take it back with
/// [`MixtureBackground::into_model`]. Nothing is shared between runs.
#[derive(Debug, Clone, Default)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    frames_seen: u64,
    modes: Vec<Gaussian>,
    modes_used: Vec<u8>,
}

impl BackgroundModel {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames folded into the model so far.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    fn reset(&mut self, width: u32, height: u32) {
        let pixels = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.frames_seen = 0;
        self.modes = vec![Gaussian::default(); pixels * MAX_MODES];
        self.modes_used = vec![0; pixels];
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixtureParams {
    pub history: u32,
    pub var_threshold: f32,
    pub detect_shadows: bool,
}

impl MixtureParams {
    pub fn from_config(config: &BackgroundConfig, frame_rate: f64) -> Self {
        Self {
            history: config.history_frames(frame_rate),
            var_threshold: config.var_threshold,
            detect_shadows: config.detect_shadows,
        }
    }
}

/// Adaptive Gaussian-mixture background subtractor.
pub struct MixtureBackground {
    params: MixtureParams,
    model: BackgroundModel,
}

impl MixtureBackground {
    pub fn new(params: MixtureParams) -> Self {
        Self::with_model(params, BackgroundModel::empty())
    }

    pub fn with_model(params: MixtureParams, model: BackgroundModel) -> Self {
        Self { params, model }
    }

    pub fn into_model(self) -> BackgroundModel {
        self.model
    }

    #[cfg(test)]
    pub fn model(&self) -> &BackgroundModel {
        &self.model
    }

    /// `1 / min(2n, history)`: learn fast while the model is young, then
    /// settle on the configured horizon.
    fn learning_rate(&self) -> f32 {
        let horizon = (2 * self.model.frames_seen).min(self.params.history.max(1) as u64);
        1.0 / horizon.max(1) as f32
    }
}

impl ForegroundFilter for MixtureBackground {
    fn apply(&mut self, frame: &RgbImage) -> ForegroundMask {
        let (width, height) = frame.dimensions();
        if self.model.dimensions() != (width, height) || self.model.modes_used.is_empty() {
            if self.model.frames_seen > 0 {
                warn!(
                    old = ?self.model.dimensions(),
                    new = ?(width, height),
                    "frame size changed, rebuilding background model"
                );
            }
            self.model.reset(width, height);
        }

        self.model.frames_seen += 1;
        let alpha = self.learning_rate();
        let var_threshold = self.params.var_threshold;
        let detect_shadows = self.params.detect_shadows;

        let model = &mut self.model;
        let labels: Vec<u8> = model
            .modes
            .chunks_exact_mut(MAX_MODES)
            .zip(model.modes_used.iter_mut())
            .zip(frame.pixels())
            .map(|((slots, used), pixel)| {
                let sample = pixel.0.map(f32::from);
                let mut count = *used as usize;
                let background = update_pixel(slots, &mut count, sample, alpha, var_threshold);
                *used = count as u8;

                if background {
                    ForegroundMask::BACKGROUND
                } else if detect_shadows && is_shadow(&slots[..count], sample, var_threshold) {
                    ForegroundMask::SHADOW
                } else {
                    ForegroundMask::FOREGROUND
                }
            })
            .collect();

        let mask = ForegroundMask::new(width, height, labels);
        debug!(
            frames_seen = model.frames_seen,
            alpha,
            foreground = mask.foreground_count(),
            shadow = mask.shadow_count(),
            "background model updated"
        );
        mask
    }

    fn name(&self) -> &str {
        "gaussian-mixture"
    }
}

/// Fold one sample into a pixel's mixture and report whether it belongs to
/// the background as the model stood before this sample.
fn update_pixel(
    slots: &mut [Gaussian],
    used: &mut usize,
    sample: [f32; 3],
    alpha: f32,
    var_threshold: f32,
) -> bool {
    let prune = alpha * COMPLEXITY_REDUCTION;
    let mut count = *used;
    let mut background = false;
    let mut matched = false;
    let mut cumulative = 0.0f32;

    for mode in &mut slots[..count] {
        mode.weight = (1.0 - alpha) * mode.weight - prune;
    }

    for mode in &mut slots[..count] {
        let dist2 = distance2(&mode.mean, &sample);
        if !background && cumulative < BACKGROUND_RATIO && dist2 < var_threshold * mode.variance {
            background = true;
        }
        if dist2 < GENERATE_THRESHOLD * mode.variance {
            mode.weight += alpha;
            let k = alpha / mode.weight;
            for (m, s) in mode.mean.iter_mut().zip(sample) {
                *m -= k * (*m - s);
            }
            mode.variance =
                (mode.variance + k * (dist2 - mode.variance)).clamp(VARIANCE_MIN, VARIANCE_MAX);
            matched = true;
            break;
        }
        cumulative += mode.weight;
    }

    // Drop modes whose weight decayed below the prior.
    let mut kept = 0;
    for i in 0..count {
        if slots[i].weight >= prune {
            slots[kept] = slots[i];
            kept += 1;
        }
    }
    count = kept;

    let total: f32 = slots[..count].iter().map(|m| m.weight).sum();
    if total > 0.0 {
        for mode in &mut slots[..count] {
            mode.weight /= total;
        }
    }

    if !matched {
        if count == MAX_MODES {
            count -= 1;
        }
        let weight = if count == 0 {
            1.0
        } else {
            for mode in &mut slots[..count] {
                mode.weight *= 1.0 - alpha;
            }
            alpha
        };
        slots[count] = Gaussian {
            weight,
            mean: sample,
            variance: VARIANCE_INIT,
        };
        count += 1;
    }

    slots[..count].sort_by(|a, b| b.weight.total_cmp(&a.weight));
    *used = count;
    background
}

/// A shadow keeps the chromaticity of a background mode but is darker by a
/// factor between [`SHADOW_TAU`] and 1.
fn is_shadow(modes: &[Gaussian], sample: [f32; 3], var_threshold: f32) -> bool {
    let mut cumulative = 0.0f32;
    for mode in modes {
        let numerator: f32 = mode.mean.iter().zip(sample).map(|(m, s)| m * s).sum();
        let denominator: f32 = mode.mean.iter().map(|m| m * m).sum();
        if denominator == 0.0 {
            return false;
        }

        if numerator <= denominator && numerator >= SHADOW_TAU * denominator {
            let a = numerator / denominator;
            let dist2a: f32 = mode
                .mean
                .iter()
                .zip(sample)
                .map(|(m, s)| (a * m - s).powi(2))
                .sum();
            if dist2a < var_threshold * mode.variance * a * a {
                return true;
            }
        }

        cumulative += mode.weight;
        if cumulative > BACKGROUND_RATIO {
            return false;
        }
    }
    false
}

fn distance2(mean: &[f32; 3], sample: &[f32; 3]) -> f32 {
    mean.iter().zip(sample).map(|(m, s)| (m - s).powi(2)).sum()
}
