/// Per-pixel classification of one analysis frame.
///
/// Labels follow the usual background-subtraction convention: `0` for
/// background, `127` for shadow, `255` for foreground. Shadows count as
/// background when measuring motion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundMask {
    width: u32,
    height: u32,
    labels: Vec<u8>,
}

impl ForegroundMask {
    pub const BACKGROUND: u8 = 0;
    pub const SHADOW: u8 = 127;
    pub const FOREGROUND: u8 = 255;

    pub fn new(width: u32, height: u32, labels: Vec<u8>) -> Self {
        debug_assert_eq!(labels.len(), width as usize * height as usize);
        Self {
            width,
            height,
            labels,
        }
    }

    pub fn foreground_count(&self) -> usize {
        self.labels
            .iter()
            .filter(|&&l| l == Self::FOREGROUND)
            .count()
    }

    pub fn shadow_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == Self::SHADOW).count()
    }

    /// Share of foreground pixels in percent, in `[0, 100]`.
    /// An empty mask has no motion.
    pub fn foreground_percent(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.foreground_count() as f64 / self.labels.len() as f64 * 100.0
    }
}

#[cfg(test)]
impl ForegroundMask {
    pub fn filled(width: u32, height: u32, label: u8) -> Self {
        Self::new(width, height, vec![label; width as usize * height as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }
}
