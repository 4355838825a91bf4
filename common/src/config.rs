use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Frames sampled per second of video time.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Sampled frames with an index below this are decoded but never analyzed.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u64,
    /// Width of the downscaled copy every analysis step works on.
    #[serde(default = "default_analysis_width")]
    pub analysis_width: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    /// Effective memory of the background model, in analyzed frames.
    /// Unset means fifteen seconds worth of sampled frames.
    #[serde(default)]
    pub history: Option<u32>,
    /// Squared Mahalanobis distance above which a pixel is foreground.
    #[serde(default = "default_var_threshold")]
    pub var_threshold: f32,
    #[serde(default)]
    pub detect_shadows: bool,
}

/// Hysteresis band for the capture state machine.
///
/// Only built through [`MotionConfig::new`] (deserialization included), so
/// `min_percent < max_percent` holds for every value in existence.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "MotionSection")]
pub struct MotionConfig {
    min_percent: f64,
    max_percent: f64,
}

#[derive(Deserialize)]
struct MotionSection {
    #[serde(default = "default_min_percent")]
    min_percent: f64,
    #[serde(default = "default_max_percent")]
    max_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            warmup_frames: default_warmup_frames(),
            analysis_width: default_analysis_width(),
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            history: None,
            var_threshold: default_var_threshold(),
            detect_shadows: false,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_percent: default_min_percent(),
            max_percent: default_max_percent(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.sampling.frame_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sampling.frame_rate must be a positive number, got {rate}"
            )));
        }
        if self.sampling.analysis_width == 0 {
            return Err(ConfigError::Invalid(
                "sampling.analysis_width must be at least 1".into(),
            ));
        }
        if self.background.history == Some(0) {
            return Err(ConfigError::Invalid(
                "background.history must be at least 1".into(),
            ));
        }
        let t = self.background.var_threshold;
        if !t.is_finite() || t <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "background.var_threshold must be a positive number, got {t}"
            )));
        }
        Ok(())
    }
}

impl BackgroundConfig {
    /// History length in frames, falling back to fifteen seconds of samples.
    pub fn history_frames(&self, frame_rate: f64) -> u32 {
        self.history
            .unwrap_or_else(|| (frame_rate * 15.0).round().max(1.0) as u32)
    }
}

impl MotionConfig {
    pub fn new(min_percent: f64, max_percent: f64) -> Result<Self, ConfigError> {
        let in_range = |p: f64| p.is_finite() && (0.0..=100.0).contains(&p);
        if !in_range(min_percent) || !in_range(max_percent) {
            return Err(ConfigError::Invalid(format!(
                "motion thresholds must lie in [0, 100], got min={min_percent} max={max_percent}"
            )));
        }
        if min_percent >= max_percent {
            return Err(ConfigError::Invalid(format!(
                "motion.min_percent ({min_percent}) must be below motion.max_percent ({max_percent})"
            )));
        }
        Ok(Self {
            min_percent,
            max_percent,
        })
    }

    /// Below this the scene is settled.
    pub fn min_percent(&self) -> f64 {
        self.min_percent
    }

    /// Above this the scene is changing.
    pub fn max_percent(&self) -> f64 {
        self.max_percent
    }
}

impl TryFrom<MotionSection> for MotionConfig {
    type Error = ConfigError;

    fn try_from(section: MotionSection) -> Result<Self, Self::Error> {
        Self::new(section.min_percent, section.max_percent)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_frame_rate() -> f64 {
    3.0
}
fn default_warmup_frames() -> u64 {
    10
}
fn default_analysis_width() -> u32 {
    600
}
fn default_var_threshold() -> f32 {
    25.0
}
fn default_min_percent() -> f64 {
    0.1
}
fn default_max_percent() -> f64 {
    3.0
}
fn default_ffmpeg() -> PathBuf {
    "ffmpeg".into()
}
fn default_ffprobe() -> PathBuf {
    "ffprobe".into()
}
fn default_output_root() -> PathBuf {
    "./output".into()
}
fn default_log_level() -> String {
    "info".into()
}
