//! Verification thresholds.
//!
//! All values are read-only once an attempt starts and may be shared across
//! every concurrent attempt. Defaults are tuned for classroom webcams.
//! Lighting and face-size bounds are camera-dependent and are expected to be
//! overridden per site.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Blink liveness parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// Average EAR below which the eyes count as closed.
    pub ear_threshold: f32,
    /// Closed frames required before re-opening registers a blink.
    pub consecutive_frames: u32,
    /// Observation window before a verdict is produced.
    pub time_window_secs: u64,
    pub min_blinks: u32,
    pub max_blinks: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            consecutive_frames: 3,
            time_window_secs: 15,
            min_blinks: 2,
            max_blinks: 8,
        }
    }
}

impl BlinkConfig {
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("blink.ear_threshold", self.ear_threshold)?;
        if self.consecutive_frames == 0 {
            return Err(ConfigError::invalid(
                "blink.consecutive_frames",
                "must be at least 1",
            ));
        }
        if self.time_window_secs == 0 {
            return Err(ConfigError::invalid(
                "blink.time_window_secs",
                "must be greater than zero",
            ));
        }
        if self.min_blinks > self.max_blinks {
            return Err(ConfigError::invalid(
                "blink.min_blinks",
                format!(
                    "min_blinks ({}) exceeds max_blinks ({})",
                    self.min_blinks, self.max_blinks
                ),
            ));
        }
        Ok(())
    }
}

/// Texture spoof analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    /// Center/corner spectral energy ratio above which a region is real.
    pub energy_ratio_threshold: f32,
    /// Square input edge expected by a learned classifier.
    pub classifier_input_size: u32,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            energy_ratio_threshold: 2.5,
            classifier_input_size: 224,
        }
    }
}

impl TextureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("texture.energy_ratio_threshold", self.energy_ratio_threshold)?;
        if self.classifier_input_size == 0 {
            return Err(ConfigError::invalid(
                "texture.classifier_input_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Challenge-response parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Whether an attempt is issued a challenge at all.
    pub enabled: bool,
    /// Response window for capturing the action.
    pub timeout_secs: u64,
    /// Minimum time a smile must be held.
    pub smile_hold_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
            smile_hold_secs: 3,
        }
    }
}

impl ChallengeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "challenge.timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.smile_hold_secs > self.timeout_secs {
            return Err(ConfigError::invalid(
                "challenge.smile_hold_secs",
                "cannot exceed the response window",
            ));
        }
        Ok(())
    }
}

/// Fraud aggregation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudConfig {
    /// Texture confidence above which a not-real verdict is a photo attack.
    pub texture_threshold: f32,
    /// Minimum face box edge lengths `(width, height)` in pixels.
    pub min_face_size: (u32, u32),
    /// Mean grayscale intensity below which the frame is too dark.
    pub dark_mean: f32,
    /// Mean grayscale intensity above which the frame is washed out.
    pub bright_mean: f32,
    /// Intensity standard deviation below which lighting is suspiciously flat.
    pub uniform_std: f32,
    /// Bounded frame history used for motion analysis.
    pub history_capacity: usize,
    /// History length required before motion analysis runs.
    pub motion_min_frames: usize,
    /// Average inter-frame difference below which the scene is static.
    pub static_motion: f32,
    /// Motion standard deviation below which movement looks looped.
    pub loop_motion_std: f32,
    /// Average motion must exceed this for the loop check to apply.
    pub loop_motion_floor: f32,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            texture_threshold: 0.7,
            min_face_size: (80, 80),
            dark_mean: 30.0,
            bright_mean: 220.0,
            uniform_std: 15.0,
            history_capacity: 30,
            motion_min_frames: 10,
            static_motion: 2.0,
            loop_motion_std: 0.5,
            loop_motion_floor: 5.0,
        }
    }
}

impl FraudConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_interval("fraud.texture_threshold", self.texture_threshold)?;
        finite("fraud.dark_mean", self.dark_mean)?;
        finite("fraud.bright_mean", self.bright_mean)?;
        if self.dark_mean >= self.bright_mean {
            return Err(ConfigError::invalid(
                "fraud.dark_mean",
                "must be below fraud.bright_mean",
            ));
        }
        finite("fraud.uniform_std", self.uniform_std)?;
        finite("fraud.static_motion", self.static_motion)?;
        finite("fraud.loop_motion_std", self.loop_motion_std)?;
        finite("fraud.loop_motion_floor", self.loop_motion_floor)?;
        if self.motion_min_frames < 2 {
            return Err(ConfigError::invalid(
                "fraud.motion_min_frames",
                "motion analysis needs at least 2 frames",
            ));
        }
        if self.history_capacity < self.motion_min_frames {
            return Err(ConfigError::invalid(
                "fraud.history_capacity",
                format!(
                    "capacity {} cannot hold the {} frames motion analysis needs",
                    self.history_capacity, self.motion_min_frames
                ),
            ));
        }
        Ok(())
    }
}

/// Caller-level attempt policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttemptConfig {
    /// Consecutive frames without a usable face before the attempt aborts.
    pub max_consecutive_bad_frames: u32,
    /// Lifetime of an attempt before it is discarded.
    pub ttl_secs: u64,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            max_consecutive_bad_frames: 30,
            ttl_secs: 60,
        }
    }
}

impl AttemptConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consecutive_bad_frames == 0 {
            return Err(ConfigError::invalid(
                "attempt.max_consecutive_bad_frames",
                "must be at least 1",
            ));
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "attempt.ttl_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Complete verification configuration, injected at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub blink: BlinkConfig,
    pub texture: TextureConfig,
    pub challenge: ChallengeConfig,
    pub fraud: FraudConfig,
    pub attempt: AttemptConfig,
}

impl VerificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.blink.validate()?;
        self.texture.validate()?;
        self.challenge.validate()?;
        self.fraud.validate()?;
        self.attempt.validate()
    }
}

fn finite(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be a finite number"))
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is not positive")))
    }
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    finite(field, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside 0..=1")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VerificationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.blink.ear_threshold, 0.25);
        assert_eq!(config.blink.consecutive_frames, 3);
        assert_eq!(config.blink.time_window(), Duration::from_secs(15));
        assert_eq!((config.blink.min_blinks, config.blink.max_blinks), (2, 8));
        assert_eq!(config.fraud.history_capacity, 30);
        assert_eq!(config.challenge.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_inverted_blink_bounds_rejected() {
        let mut config = VerificationConfig::default();
        config.blink.min_blinks = 9;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "blink.min_blinks",
                ..
            }
        ));
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let mut config = VerificationConfig::default();
        config.blink.ear_threshold = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_history_must_hold_motion_window() {
        let mut config = VerificationConfig::default();
        config.fraud.history_capacity = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_texture_threshold_outside_unit_interval_rejected() {
        let mut config = VerificationConfig::default();
        config.fraud.texture_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_consecutive_frames_rejected() {
        let mut config = VerificationConfig::default();
        config.blink.consecutive_frames = 0;
        assert!(config.validate().is_err());
    }
}
