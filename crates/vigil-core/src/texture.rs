//! Texture-based spoof detection on a cropped face region.
//!
//! Two interchangeable strategies sit behind [`TextureStrategy`]:
//!
//! - [`FrequencyTexture`] is always available. Printed photos and screens
//!   carry regular high-frequency patterns (halftone dots, sub-pixel grids,
//!   moiré) that pull spectral energy away from the low-frequency centre of
//!   the shifted 2D spectrum.
//! - [`LearnedTexture`] delegates to an optional binary [`SpoofClassifier`]
//!   and drops back to the frequency path whenever the classifier fails.
//!
//! The strategy is fixed when the [`TextureAnalyzer`] is built.

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use ndarray::{Array4, ArrayView4};
use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;
use serde::Serialize;

use crate::config::TextureConfig;
use crate::error::{ClassifierError, ConfigError};

const ENERGY_EPSILON: f64 = 1e-6;

/// Outcome of one texture analysis call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextureVerdict {
    pub is_real: bool,
    /// 0..=1
    pub confidence: f32,
}

impl TextureVerdict {
    /// Verdict for regions that cannot be analysed at all.
    pub const EMPTY: TextureVerdict = TextureVerdict {
        is_real: false,
        confidence: 0.0,
    };
}

/// One way of classifying a face region as real or reproduced.
pub trait TextureStrategy: Send + Sync {
    fn analyze(&self, region: &RgbImage) -> TextureVerdict;
    fn name(&self) -> &'static str;
}

/// External binary classifier returning P(real).
///
/// Input is a `1 x H x W x 3` RGB tensor with values in `0.0..=1.0`.
pub trait SpoofClassifier: Send + Sync {
    fn classify(&self, input: ArrayView4<'_, f32>) -> Result<f32, ClassifierError>;
}

/// Spectral energy split used by the frequency strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumEnergy {
    /// Central low-frequency square, edge `min(H, W) / 2`.
    pub center: f64,
    /// Four corner squares, edge `min(H, W) / 4` each.
    pub corners: f64,
    pub total: f64,
}

impl SpectrumEnergy {
    pub fn ratio(&self) -> f64 {
        self.center / (self.corners + ENERGY_EPSILON)
    }
}

/// FFT-based texture strategy.
#[derive(Debug, Clone)]
pub struct FrequencyTexture {
    ratio_threshold: f32,
}

impl FrequencyTexture {
    pub fn new(ratio_threshold: f32) -> Self {
        Self { ratio_threshold }
    }

    /// Magnitude-spectrum energy of `gray`, or `None` when the region is too
    /// small to hold a corner square.
    pub fn spectrum_energy(gray: &GrayImage) -> Option<SpectrumEnergy> {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let corner = w.min(h) / 4;
        if corner == 0 {
            return None;
        }

        let magnitude = shifted_magnitude(gray);

        let (cy, cx) = (h / 2, w / 2);
        let mut center = 0.0f64;
        for y in cy - corner..cy + corner {
            let row = &magnitude[y * w..(y + 1) * w];
            center += row[cx - corner..cx + corner].iter().sum::<f64>();
        }

        let mut corners = 0.0f64;
        for y in (0..corner).chain(h - corner..h) {
            let row = &magnitude[y * w..(y + 1) * w];
            corners += row[..corner].iter().sum::<f64>();
            corners += row[w - corner..].iter().sum::<f64>();
        }

        let total = magnitude.iter().sum::<f64>();

        Some(SpectrumEnergy {
            center,
            corners,
            total,
        })
    }
}

impl TextureStrategy for FrequencyTexture {
    fn analyze(&self, region: &RgbImage) -> TextureVerdict {
        if region.width() == 0 || region.height() == 0 {
            return TextureVerdict::EMPTY;
        }

        let gray = image::imageops::grayscale(region);

        // A perfectly flat region has a DC-only spectrum, which the energy
        // ratio would read as maximally "real".
        if is_flat(&gray) {
            tracing::debug!("texture: flat region");
            return TextureVerdict {
                is_real: false,
                confidence: 1.0,
            };
        }

        let Some(energy) = Self::spectrum_energy(&gray) else {
            return TextureVerdict::EMPTY;
        };

        let ratio = energy.ratio();
        let is_real = ratio > self.ratio_threshold as f64;
        let confidence = if energy.total > 0.0 {
            (energy.corners / energy.total).clamp(0.0, 1.0) as f32
        } else {
            0.0
        };

        tracing::debug!(ratio, is_real, confidence, "texture: frequency analysis");

        TextureVerdict {
            is_real,
            confidence,
        }
    }

    fn name(&self) -> &'static str {
        "frequency"
    }
}

/// Classifier-backed strategy with frequency-domain fallback.
pub struct LearnedTexture {
    classifier: Box<dyn SpoofClassifier>,
    input_size: u32,
    fallback: FrequencyTexture,
}

impl LearnedTexture {
    pub fn new(
        classifier: Box<dyn SpoofClassifier>,
        input_size: u32,
        fallback: FrequencyTexture,
    ) -> Self {
        Self {
            classifier,
            input_size,
            fallback,
        }
    }

    /// Resize to the classifier resolution and scale pixels to `0.0..=1.0`.
    fn preprocess(&self, region: &RgbImage) -> Array4<f32> {
        let size = self.input_size;
        let resized = image::imageops::resize(region, size, size, FilterType::Triangle);
        Array4::from_shape_fn((1, size as usize, size as usize, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    }
}

impl TextureStrategy for LearnedTexture {
    fn analyze(&self, region: &RgbImage) -> TextureVerdict {
        if region.width() == 0 || region.height() == 0 {
            return TextureVerdict::EMPTY;
        }

        let input = self.preprocess(region);
        match self.classifier.classify(input.view()) {
            Ok(p_real) if p_real.is_finite() => {
                let p_real = p_real.clamp(0.0, 1.0);
                let is_real = p_real > 0.5;
                TextureVerdict {
                    is_real,
                    confidence: p_real.max(1.0 - p_real),
                }
            }
            Ok(p_real) => {
                tracing::warn!(p_real, "classifier returned a non-finite score, using frequency analysis");
                self.fallback.analyze(region)
            }
            Err(e) => {
                tracing::warn!(error = %e, "classifier failed, using frequency analysis");
                self.fallback.analyze(region)
            }
        }
    }

    fn name(&self) -> &'static str {
        "learned"
    }
}

/// Stateless texture analyzer; one strategy chosen at construction.
pub struct TextureAnalyzer {
    strategy: Box<dyn TextureStrategy>,
}

impl TextureAnalyzer {
    /// Build the analyzer, preferring `classifier` when one is supplied.
    pub fn new(
        config: &TextureConfig,
        classifier: Option<Box<dyn SpoofClassifier>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let frequency = FrequencyTexture::new(config.energy_ratio_threshold);
        let strategy: Box<dyn TextureStrategy> = match classifier {
            Some(classifier) => {
                tracing::info!(
                    input_size = config.classifier_input_size,
                    "texture analysis: learned spoof classifier"
                );
                Box::new(LearnedTexture::new(
                    classifier,
                    config.classifier_input_size,
                    frequency,
                ))
            }
            None => {
                tracing::info!("no spoof classifier configured, texture analysis uses frequency domain");
                Box::new(frequency)
            }
        };
        Ok(Self { strategy })
    }

    pub fn with_strategy(strategy: Box<dyn TextureStrategy>) -> Self {
        Self { strategy }
    }

    pub fn analyze(&self, region: &RgbImage) -> TextureVerdict {
        self.strategy.analyze(region)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}

fn is_flat(gray: &GrayImage) -> bool {
    let mut pixels = gray.pixels();
    match pixels.next() {
        Some(first) => pixels.all(|p| p[0] == first[0]),
        None => true,
    }
}

/// 2D FFT magnitude with the zero frequency moved to the centre,
/// row-major `h x w`.
fn shifted_magnitude(gray: &GrayImage) -> Vec<f64> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let mut planner = FftPlanner::<f32>::new();

    let mut rows: Vec<Complex32> = gray
        .pixels()
        .map(|p| Complex32::new(p[0] as f32, 0.0))
        .collect();
    planner.plan_fft_forward(w).process(&mut rows);

    // Column pass on the transpose: cols[x * h + y]
    let mut cols = vec![Complex32::new(0.0, 0.0); w * h];
    for y in 0..h {
        for x in 0..w {
            cols[x * h + y] = rows[y * w + x];
        }
    }
    planner.plan_fft_forward(h).process(&mut cols);

    let mut magnitude = vec![0.0f64; w * h];
    for x in 0..w {
        let sx = (x + w / 2) % w;
        for y in 0..h {
            let sy = (y + h / 2) % h;
            magnitude[sy * w + sx] = cols[x * h + y].norm() as f64;
        }
    }
    magnitude
}
