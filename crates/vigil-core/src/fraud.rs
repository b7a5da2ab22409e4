//! Fraud signal aggregation.
//!
//! [`FraudAggregator`] runs an ordered pipeline of [`FraudCheck`]s over one
//! attempt's evidence and fuses the results into a single [`FraudVerdict`].
//!
//! Default pipeline, in order:
//!
//! 1. photo/screen texture (decisive, high)
//! 2. blink liveness (decisive, high)
//! 3. lighting anomaly (medium)
//! 4. face size (low)
//! 5. inter-frame motion (high)
//!
//! A decisive check that fails stops the pipeline. Otherwise every check
//! runs, and the verdict takes its type and severity from the most severe
//! failure, the earliest check winning ties. Every check that ran is kept
//! in the verdict's breakdown.

use image::RgbImage;
use serde::Serialize;

use crate::blink::BlinkStatus;
use crate::config::FraudConfig;
use crate::error::ConfigError;
use crate::history::FrameHistory;
use crate::texture::TextureAnalyzer;
use crate::types::{BoundingBox, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    PhotoAttack,
    LivenessFailed,
    LightingAnomaly,
    FaceTooSmall,
    MotionAnomaly,
    MultipleFaces,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    PhotoScreen,
    Liveness,
    Lighting,
    FaceSize,
    Motion,
    FaceCount,
}

/// Fraud classification attached to a failing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub fraud_type: FraudType,
    pub severity: Severity,
}

/// What a single check concluded.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub finding: Option<Finding>,
    pub message: String,
    pub confidence: Option<f32>,
}

impl CheckResult {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            finding: None,
            message: message.into(),
            confidence: None,
        }
    }

    pub fn fail(fraud_type: FraudType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            finding: Some(Finding {
                fraud_type,
                severity,
            }),
            message: message.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Audit entry for one check that ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub check: CheckKind,
    pub is_fraud: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_type: Option<FraudType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub message: String,
}

/// Terminal per-attempt fraud decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudVerdict {
    pub is_fraud: bool,
    pub fraud_type: Option<FraudType>,
    /// Confidence of the deciding check; 0 when no check failed.
    pub confidence: f32,
    /// `None` when no check failed.
    pub severity: Option<Severity>,
    pub checks: Vec<CheckReport>,
}

impl FraudVerdict {
    /// Verdict for an attempt aborted because several faces were in view.
    pub fn multiple_faces(count: usize) -> Self {
        let report = CheckReport {
            check: CheckKind::FaceCount,
            is_fraud: true,
            fraud_type: Some(FraudType::MultipleFaces),
            severity: Some(Severity::High),
            confidence: None,
            message: format!("multiple faces detected ({count})"),
        };
        Self {
            is_fraud: true,
            fraud_type: Some(FraudType::MultipleFaces),
            confidence: 1.0,
            severity: Some(Severity::High),
            checks: vec![report],
        }
    }

    pub fn check(&self, kind: CheckKind) -> Option<&CheckReport> {
        self.checks.iter().find(|c| c.check == kind)
    }

    /// Reason string for the deciding check, if any.
    pub fn reason(&self) -> Option<&str> {
        let fraud_type = self.fraud_type?;
        self.checks
            .iter()
            .find(|c| c.fraud_type == Some(fraud_type))
            .map(|c| c.message.as_str())
    }
}

/// Evidence for one attempt, borrowed for the duration of `evaluate`.
pub struct FraudInput<'a> {
    /// Full frame the decision is taken on.
    pub frame: &'a Frame,
    /// Face crop of `frame`.
    pub face_region: &'a RgbImage,
    pub face_box: BoundingBox,
    pub liveness: &'a BlinkStatus,
    pub blink_count: u32,
    pub history: &'a FrameHistory,
}

/// One step of the aggregation pipeline.
pub trait FraudCheck: Send + Sync {
    fn kind(&self) -> CheckKind;

    /// A failing decisive check ends the pipeline.
    fn decisive(&self) -> bool {
        false
    }

    fn run(&self, input: &FraudInput<'_>) -> CheckResult;
}

/// Texture-based photo/screen detection.
pub struct PhotoScreenCheck {
    texture: TextureAnalyzer,
    threshold: f32,
}

impl PhotoScreenCheck {
    pub fn new(texture: TextureAnalyzer, threshold: f32) -> Self {
        Self { texture, threshold }
    }
}

impl FraudCheck for PhotoScreenCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::PhotoScreen
    }

    fn decisive(&self) -> bool {
        true
    }

    fn run(&self, input: &FraudInput<'_>) -> CheckResult {
        let verdict = self.texture.analyze(input.face_region);
        if !verdict.is_real && verdict.confidence > self.threshold {
            CheckResult::fail(
                FraudType::PhotoAttack,
                Severity::High,
                "photo or screen detected",
            )
            .with_confidence(verdict.confidence)
        } else {
            CheckResult::pass("appears to be a real face").with_confidence(verdict.confidence)
        }
    }
}

/// Blink liveness verdict gate.
pub struct LivenessCheck;

impl FraudCheck for LivenessCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Liveness
    }

    fn decisive(&self) -> bool {
        true
    }

    fn run(&self, input: &FraudInput<'_>) -> CheckResult {
        if input.liveness.is_live() {
            CheckResult::pass(format!("liveness verified (blinks: {})", input.blink_count))
        } else {
            CheckResult::fail(
                FraudType::LivenessFailed,
                Severity::High,
                format!(
                    "liveness not verified (blinks: {}): {}",
                    input.blink_count,
                    input.liveness.message()
                ),
            )
            .with_confidence(1.0)
        }
    }
}

/// Whole-frame brightness statistics.
pub struct LightingCheck {
    dark_mean: f32,
    bright_mean: f32,
    uniform_std: f32,
}

impl LightingCheck {
    pub fn from_config(config: &FraudConfig) -> Self {
        Self {
            dark_mean: config.dark_mean,
            bright_mean: config.bright_mean,
            uniform_std: config.uniform_std,
        }
    }
}

impl FraudCheck for LightingCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Lighting
    }

    fn run(&self, input: &FraudInput<'_>) -> CheckResult {
        let gray = input.frame.to_gray();
        let (mean, std) = mean_std(gray.as_raw().iter().map(|v| *v as f64));
        let (mean, std) = (mean as f32, std as f32);

        let fail = |message: String| {
            CheckResult::fail(FraudType::LightingAnomaly, Severity::Medium, message)
        };

        if mean < self.dark_mean {
            fail(format!("too dark, possible occlusion (mean {mean:.1})"))
        } else if mean > self.bright_mean {
            fail(format!("washed out, possible screen glare (mean {mean:.1})"))
        } else if std < self.uniform_std {
            fail(format!("suspiciously uniform lighting, possible screen (std {std:.1})"))
        } else {
            CheckResult::pass(format!("lighting appears natural (mean {mean:.1}, std {std:.1})"))
        }
    }
}

/// Minimum face box dimensions.
pub struct FaceSizeCheck {
    min_width: u32,
    min_height: u32,
}

impl FaceSizeCheck {
    pub fn from_config(config: &FraudConfig) -> Self {
        Self {
            min_width: config.min_face_size.0,
            min_height: config.min_face_size.1,
        }
    }
}

impl FraudCheck for FaceSizeCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::FaceSize
    }

    fn run(&self, input: &FraudInput<'_>) -> CheckResult {
        let (w, h) = (input.face_box.width, input.face_box.height);
        if w < self.min_width as f32 || h < self.min_height as f32 {
            CheckResult::fail(
                FraudType::FaceTooSmall,
                Severity::Low,
                format!(
                    "face too small: {w:.0}x{h:.0}px (min {}x{}px)",
                    self.min_width, self.min_height
                ),
            )
        } else {
            CheckResult::pass(format!("face size acceptable ({w:.0}x{h:.0}px)"))
        }
    }
}

/// Inter-frame motion statistics over the attempt's frame history.
pub struct MotionCheck {
    min_frames: usize,
    static_motion: f32,
    loop_motion_std: f32,
    loop_motion_floor: f32,
}

impl MotionCheck {
    pub fn from_config(config: &FraudConfig) -> Self {
        Self {
            min_frames: config.motion_min_frames,
            static_motion: config.static_motion,
            loop_motion_std: config.loop_motion_std,
            loop_motion_floor: config.loop_motion_floor,
        }
    }
}

impl FraudCheck for MotionCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Motion
    }

    fn run(&self, input: &FraudInput<'_>) -> CheckResult {
        if input.history.len() < self.min_frames {
            return CheckResult::pass(format!(
                "insufficient frames for motion analysis ({} < {})",
                input.history.len(),
                self.min_frames
            ));
        }

        let diffs = input.history.inter_frame_motion();
        let required = self.min_frames.saturating_sub(1);
        if diffs.len() < required {
            return CheckResult::fail(
                FraudType::MotionAnomaly,
                Severity::High,
                format!(
                    "too few comparable frame pairs for motion analysis ({} < {required})",
                    diffs.len()
                ),
            );
        }
        let (avg, std) = mean_std(diffs.iter().map(|d| *d as f64));
        let (avg, std) = (avg as f32, std as f32);

        if avg < self.static_motion {
            CheckResult::fail(
                FraudType::MotionAnomaly,
                Severity::High,
                format!("insufficient motion detected (avg {avg:.2})"),
            )
        } else if std < self.loop_motion_std && avg > self.loop_motion_floor {
            CheckResult::fail(
                FraudType::MotionAnomaly,
                Severity::High,
                format!("unnaturally consistent motion (std {std:.2})"),
            )
        } else {
            CheckResult::pass(format!("motion appears natural (avg {avg:.2}, std {std:.2})"))
        }
    }
}

/// Ordered, short-circuiting fraud pipeline.
pub struct FraudAggregator {
    checks: Vec<Box<dyn FraudCheck>>,
}

impl FraudAggregator {
    /// Default five-check pipeline.
    pub fn new(config: &FraudConfig, texture: TextureAnalyzer) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_checks(Self::default_checks(config, texture)))
    }

    pub fn default_checks(config: &FraudConfig, texture: TextureAnalyzer) -> Vec<Box<dyn FraudCheck>> {
        vec![
            Box::new(PhotoScreenCheck::new(texture, config.texture_threshold)),
            Box::new(LivenessCheck),
            Box::new(LightingCheck::from_config(config)),
            Box::new(FaceSizeCheck::from_config(config)),
            Box::new(MotionCheck::from_config(config)),
        ]
    }

    pub fn with_checks(checks: Vec<Box<dyn FraudCheck>>) -> Self {
        Self { checks }
    }

    /// Checks in pipeline order.
    pub fn check_kinds(&self) -> Vec<CheckKind> {
        self.checks.iter().map(|c| c.kind()).collect()
    }

    pub fn evaluate(&self, input: &FraudInput<'_>) -> FraudVerdict {
        let mut reports = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            let result = check.run(input);
            let kind = check.kind();
            tracing::debug!(
                check = ?kind,
                is_fraud = result.finding.is_some(),
                message = %result.message,
                "fraud check"
            );

            let stop = result.finding.is_some() && check.decisive();
            reports.push(CheckReport {
                check: kind,
                is_fraud: result.finding.is_some(),
                fraud_type: result.finding.map(|f| f.fraud_type),
                severity: result.finding.map(|f| f.severity),
                confidence: result.confidence,
                message: result.message,
            });

            if stop {
                tracing::debug!(check = ?kind, "decisive check failed, skipping remaining checks");
                break;
            }
        }

        let verdict = fuse(reports);
        if verdict.is_fraud {
            tracing::warn!(
                fraud_type = ?verdict.fraud_type,
                severity = ?verdict.severity,
                confidence = verdict.confidence,
                reason = verdict.reason().unwrap_or_default(),
                "fraud detected"
            );
        } else {
            tracing::info!(checks = verdict.checks.len(), "no fraud detected");
        }
        verdict
    }
}

/// Pick the most severe failing report, earliest first on ties.
fn fuse(reports: Vec<CheckReport>) -> FraudVerdict {
    let mut decisive: Option<&CheckReport> = None;
    for report in reports.iter().filter(|r| r.is_fraud) {
        let better = match decisive {
            None => true,
            Some(current) => report.severity > current.severity,
        };
        if better {
            decisive = Some(report);
        }
    }

    let (fraud_type, severity, confidence) = match decisive {
        Some(r) => (r.fraud_type, r.severity, r.confidence.unwrap_or(1.0)),
        None => (None, None, 0.0),
    };

    FraudVerdict {
        is_fraud: decisive.is_some(),
        fraud_type,
        confidence,
        severity,
        checks: reports,
    }
}

/// Population mean and standard deviation; `(0, 0)` for an empty input.
fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (n, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    (mean, var.sqrt())
}
