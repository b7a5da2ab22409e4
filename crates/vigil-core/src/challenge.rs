//! Challenge-response action verification.
//!
//! A random action (smile, blink, nod, head turn) is requested from the
//! subject and verified over a short client-submitted frame burst. Replayed
//! footage cannot anticipate which action will be asked for.
//!
//! Challenge frames routinely lose face detection mid-action (motion blur,
//! the face partially leaving the frame during a turn). Every detector here
//! works on the frames that do have landmarks instead of rejecting the
//! whole burst.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use crate::config::ChallengeConfig;
use crate::ear::average_ear;
use crate::error::ConfigError;
use crate::landmarks::{LandmarkProvider, SmileDetector};
use crate::types::{Detection, Frame};

/// EAR above which the eyes count as open within a challenge burst.
const BLINK_OPEN_EAR: f32 = 0.25;
/// EAR below which the eyes count as closed within a challenge burst.
const BLINK_CLOSED_EAR: f32 = 0.20;
const BLINK_CONFIDENCE: f32 = 0.8;
/// Minimum usable samples for the blink and nod detectors.
const MIN_SAMPLES: usize = 3;
/// Nose-tip vertical travel (px) required for a nod.
const NOD_MIN_RANGE: f32 = 15.0;
/// Confidence factor for a nod without a direction reversal.
const PARTIAL_NOD_FACTOR: f32 = 0.75;
/// Nose-tip horizontal travel (px) required for a head turn.
const TURN_MIN_SHIFT: f32 = 10.0;
/// Travel (px) that maps to full confidence for nods and turns.
const MOTION_FULL_SCALE: f32 = 50.0;
const SMILE_CONFIDENCE_PER_REGION: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    Left,
    Right,
}

/// The action the subject is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "direction", rename_all = "snake_case")]
pub enum ChallengeKind {
    Smile,
    Blink,
    Nod,
    HeadTurn(TurnDirection),
}

impl ChallengeKind {
    pub fn prompt(&self) -> &'static str {
        match self {
            ChallengeKind::Smile => "Please smile naturally",
            ChallengeKind::Blink => "Please blink your eyes naturally",
            ChallengeKind::Nod => "Please nod your head up and down",
            ChallengeKind::HeadTurn(TurnDirection::Left) => "Please turn your head left",
            ChallengeKind::HeadTurn(TurnDirection::Right) => "Please turn your head right",
        }
    }

    /// Minimum detector confidence for the response to pass.
    pub fn pass_threshold(&self) -> f32 {
        match self {
            ChallengeKind::Smile | ChallengeKind::HeadTurn(_) => 0.3,
            ChallengeKind::Nod => 0.4,
            ChallengeKind::Blink => 0.5,
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Smile => f.write_str("smile"),
            ChallengeKind::Blink => f.write_str("blink"),
            ChallengeKind::Nod => f.write_str("nod"),
            ChallengeKind::HeadTurn(TurnDirection::Left) => f.write_str("head-turn-left"),
            ChallengeKind::HeadTurn(TurnDirection::Right) => f.write_str("head-turn-right"),
        }
    }
}

/// One issued challenge. Answerable once, within `timeout` of `issued_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    pub prompt: String,
    pub issued_at: Instant,
    pub timeout: Duration,
    /// Minimum time between issue and response (smile hold).
    pub min_hold: Option<Duration>,
}

impl Challenge {
    pub fn deadline(&self) -> Instant {
        self.issued_at + self.timeout
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.deadline()
    }
}

/// Result of validating a challenge response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeOutcome {
    pub kind: ChallengeKind,
    pub passed: bool,
    /// 0..=1, zero whenever `passed` is false.
    pub confidence: f32,
    pub detail: String,
}

/// Raw detector reading before the per-type pass threshold.
struct Reading {
    detected: bool,
    confidence: f32,
    detail: String,
}

impl Reading {
    fn miss(detail: impl Into<String>) -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            detail: detail.into(),
        }
    }

    fn hit(confidence: f32, detail: impl Into<String>) -> Self {
        Self {
            detected: true,
            confidence,
            detail: detail.into(),
        }
    }
}

/// Issues challenges and validates responses against landmark geometry.
pub struct ChallengeValidator {
    config: ChallengeConfig,
    provider: Arc<dyn LandmarkProvider>,
    smiles: Arc<dyn SmileDetector>,
}

impl ChallengeValidator {
    pub fn new(
        config: ChallengeConfig,
        provider: Arc<dyn LandmarkProvider>,
        smiles: Arc<dyn SmileDetector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            smiles,
        })
    }

    pub fn issue(&self) -> Challenge {
        self.issue_with(&mut rand::thread_rng(), Instant::now())
    }

    /// Pick a challenge type uniformly using `rng`, stamped at `now`.
    pub fn issue_with<R: Rng + ?Sized>(&self, rng: &mut R, now: Instant) -> Challenge {
        let kind = match rng.gen_range(0..4) {
            0 => ChallengeKind::Smile,
            1 => ChallengeKind::Nod,
            2 => ChallengeKind::Blink,
            _ => {
                if rng.gen_bool(0.5) {
                    ChallengeKind::HeadTurn(TurnDirection::Left)
                } else {
                    ChallengeKind::HeadTurn(TurnDirection::Right)
                }
            }
        };

        let min_hold = match kind {
            ChallengeKind::Smile => Some(Duration::from_secs(self.config.smile_hold_secs)),
            _ => None,
        };

        tracing::debug!(challenge = %kind, "challenge issued");

        Challenge {
            kind,
            prompt: kind.prompt().to_string(),
            issued_at: now,
            timeout: self.config.timeout(),
            min_hold,
        }
    }

    pub fn validate(&self, challenge: &Challenge, frames: &[Frame]) -> ChallengeOutcome {
        self.validate_at(challenge, frames, Instant::now())
    }

    /// Validate a response burst received at `now`.
    pub fn validate_at(
        &self,
        challenge: &Challenge,
        frames: &[Frame],
        now: Instant,
    ) -> ChallengeOutcome {
        let kind = challenge.kind;

        let reading = if frames.is_empty() {
            Reading::miss("no frames provided")
        } else if challenge.is_expired_at(now) {
            Reading::miss("challenge timed out")
        } else if let Some(hold) = challenge
            .min_hold
            .filter(|hold| now.saturating_duration_since(challenge.issued_at) < *hold)
        {
            Reading::miss(format!("action must be held for {}s", hold.as_secs()))
        } else {
            match kind {
                ChallengeKind::Smile => self.detect_smile(frames),
                ChallengeKind::Blink => self.detect_blink(frames),
                ChallengeKind::Nod => self.detect_nod(frames),
                ChallengeKind::HeadTurn(direction) => self.detect_head_turn(frames, direction),
            }
        };

        let threshold = kind.pass_threshold();
        let passed = reading.detected && reading.confidence >= threshold;
        let confidence = if passed { reading.confidence } else { 0.0 };

        tracing::info!(
            challenge = %kind,
            frames = frames.len(),
            passed,
            confidence,
            threshold,
            detail = %reading.detail,
            "challenge validated"
        );

        ChallengeOutcome {
            kind,
            passed,
            confidence,
            detail: reading.detail,
        }
    }

    /// Smile regions on the last frame only.
    fn detect_smile(&self, frames: &[Frame]) -> Reading {
        let Some(last) = frames.last() else {
            return Reading::miss("no frames provided");
        };
        let regions = self.smiles.count_smiles(last);
        tracing::debug!(regions, "smile: regions on last frame");
        if regions == 0 {
            return Reading::miss("no smile detected");
        }
        let confidence = (regions as f32 * SMILE_CONFIDENCE_PER_REGION).min(1.0);
        Reading::hit(confidence, format!("{regions} smile region(s)"))
    }

    /// Open-to-closed transition across adjacent usable EAR samples.
    fn detect_blink(&self, frames: &[Frame]) -> Reading {
        let ears: Vec<f32> = frames
            .iter()
            .filter_map(|frame| match self.provider.detect(frame) {
                Detection::Face(face) => average_ear(&face),
                _ => None,
            })
            .collect();

        tracing::debug!(usable = ears.len(), total = frames.len(), ?ears, "blink: EAR samples");

        if ears.len() < MIN_SAMPLES {
            return Reading::miss(format!(
                "not enough frames with visible eyes ({} < {MIN_SAMPLES})",
                ears.len()
            ));
        }

        let transition = ears
            .windows(2)
            .position(|w| w[0] > BLINK_OPEN_EAR && w[1] < BLINK_CLOSED_EAR);

        match transition {
            Some(i) => Reading::hit(BLINK_CONFIDENCE, format!("blink at sample {i}")),
            None => Reading::miss("no open-to-closed eye transition"),
        }
    }

    /// Vertical nose-tip travel, with or without a direction reversal.
    fn detect_nod(&self, frames: &[Frame]) -> Reading {
        let ys: Vec<f32> = frames
            .iter()
            .filter_map(|frame| self.nose_tip(frame).map(|p| p.1))
            .collect();
        nod_reading(&ys)
    }

    /// Horizontal nose-tip shift from the first frame to the last frame that
    /// still has a face.
    fn detect_head_turn(&self, frames: &[Frame], direction: TurnDirection) -> Reading {
        if frames.len() < 2 {
            return Reading::miss(format!("not enough frames ({} < 2)", frames.len()));
        }

        let Some((start_x, _)) = self.nose_tip(&frames[0]) else {
            return Reading::miss("no face in first frame");
        };

        let end = frames
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .find_map(|(i, frame)| self.nose_tip(frame).map(|(x, _)| (i, x)));

        let Some((end_idx, end_x)) = end else {
            return Reading::miss("no face after first frame");
        };

        if end_idx < frames.len() - 1 {
            tracing::debug!(
                end_idx,
                dropped = frames.len() - 1 - end_idx,
                "head turn: trailing frames without a face"
            );
        }

        turn_reading(end_x - start_x, direction)
    }

    fn nose_tip(&self, frame: &Frame) -> Option<(f32, f32)> {
        match self.provider.detect(frame) {
            Detection::Face(face) => face.nose_tip().map(|p| (p.x, p.y)),
            _ => None,
        }
    }
}

fn nod_reading(ys: &[f32]) -> Reading {
    if ys.len() < MIN_SAMPLES {
        return Reading::miss(format!(
            "not enough frames with a visible nose ({} < {MIN_SAMPLES})",
            ys.len()
        ));
    }

    let min = ys.iter().copied().fold(f32::INFINITY, f32::min);
    let max = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    let oscillates = ys.windows(3).any(|w| {
        let d1 = w[1] - w[0];
        let d2 = w[2] - w[1];
        d1 * d2 < 0.0
    });

    tracing::debug!(range, oscillates, ?ys, "nod: nose-tip vertical samples");

    if range < NOD_MIN_RANGE {
        return Reading::miss(format!(
            "vertical movement {range:.1}px below {NOD_MIN_RANGE}px"
        ));
    }

    let scale = (range / MOTION_FULL_SCALE).min(1.0);
    if oscillates {
        Reading::hit(scale, format!("full nod, {range:.1}px"))
    } else {
        Reading::hit(
            PARTIAL_NOD_FACTOR * scale,
            format!("partial nod, {range:.1}px"),
        )
    }
}

fn turn_reading(shift: f32, direction: TurnDirection) -> Reading {
    let moved = match direction {
        TurnDirection::Left => shift < -TURN_MIN_SHIFT,
        TurnDirection::Right => shift > TURN_MIN_SHIFT,
    };

    if !moved {
        return Reading::miss(format!(
            "horizontal shift {shift:.1}px does not clear {TURN_MIN_SHIFT}px {direction:?}"
        ));
    }

    let confidence = (shift.abs() / MOTION_FULL_SCALE).min(1.0);
    Reading::hit(confidence, format!("turned {direction:?} by {:.1}px", shift.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{blank_frame, FixedSmiles, ScriptedProvider};
    use crate::types::Point;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn validator(provider: ScriptedProvider, smiles: usize) -> ChallengeValidator {
        ChallengeValidator::new(
            ChallengeConfig::default(),
            Arc::new(provider),
            Arc::new(FixedSmiles(smiles)),
        )
        .unwrap()
    }

    fn frames(n: usize) -> Vec<Frame> {
        (0..n as u64).map(blank_frame).collect()
    }

    fn challenge(kind: ChallengeKind, issued_at: Instant) -> Challenge {
        Challenge {
            kind,
            prompt: kind.prompt().to_string(),
            issued_at,
            timeout: Duration::from_secs(10),
            min_hold: match kind {
                ChallengeKind::Smile => Some(Duration::from_secs(3)),
                _ => None,
            },
        }
    }

    fn run(kind: ChallengeKind, provider: ScriptedProvider, n: usize) -> ChallengeOutcome {
        let issued = Instant::now();
        validator(provider, 0).validate_at(
            &challenge(kind, issued),
            &frames(n),
            issued + Duration::from_secs(4),
        )
    }

    fn noses_y(ys: &[Option<f32>]) -> ScriptedProvider {
        let noses: Vec<Option<Point>> =
            ys.iter().map(|y| y.map(|y| Point::new(120.0, y))).collect();
        ScriptedProvider::from_noses(&noses)
    }

    fn noses_x(xs: &[Option<f32>]) -> ScriptedProvider {
        let noses: Vec<Option<Point>> =
            xs.iter().map(|x| x.map(|x| Point::new(x, 130.0))).collect();
        ScriptedProvider::from_noses(&noses)
    }

    #[test]
    fn test_issue_covers_all_kinds() {
        let v = validator(ScriptedProvider::new(), 0);
        let mut rng = StdRng::seed_from_u64(7);
        let now = Instant::now();
        let kinds: HashSet<String> = (0..200)
            .map(|_| v.issue_with(&mut rng, now).kind.to_string())
            .collect();
        for expected in ["smile", "blink", "nod", "head-turn-left", "head-turn-right"] {
            assert!(kinds.contains(expected), "never issued {expected}");
        }
    }

    #[test]
    fn test_issued_challenge_fields() {
        let v = validator(ScriptedProvider::new(), 0);
        let c = v.issue();
        assert_eq!(c.timeout, Duration::from_secs(10));
        assert_eq!(c.prompt, c.kind.prompt());
        assert_eq!(c.min_hold.is_some(), c.kind == ChallengeKind::Smile);
    }

    #[test]
    fn test_no_frames_fails() {
        let outcome = run(ChallengeKind::Nod, ScriptedProvider::new(), 0);
        assert!(!outcome.passed);
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_full_nod_passes() {
        let outcome = run(
            ChallengeKind::Nod,
            noses_y(&[Some(100.0), Some(100.0), Some(130.0), Some(100.0)]),
            4,
        );
        assert!(outcome.passed);
        assert!((outcome.confidence - 0.6).abs() < 1e-5);
        assert!(outcome.detail.starts_with("full nod"));
    }

    #[test]
    fn test_partial_nod_passes_with_reduced_confidence() {
        let outcome = run(
            ChallengeKind::Nod,
            noses_y(&[Some(100.0), Some(115.0), Some(130.0)]),
            3,
        );
        assert!(outcome.passed);
        assert!((outcome.confidence - 0.45).abs() < 1e-5);
        assert!(outcome.detail.starts_with("partial nod"));
    }

    #[test]
    fn test_small_nod_fails() {
        let outcome = run(
            ChallengeKind::Nod,
            noses_y(&[Some(100.0), Some(105.0), Some(108.0)]),
            3,
        );
        assert!(!outcome.passed);
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_nod_tolerates_dropped_frames() {
        let outcome = run(
            ChallengeKind::Nod,
            noses_y(&[Some(100.0), None, Some(130.0), None, Some(100.0)]),
            5,
        );
        assert!(outcome.passed);
    }

    #[test]
    fn test_nod_needs_three_samples() {
        let outcome = run(
            ChallengeKind::Nod,
            noses_y(&[Some(100.0), None, Some(150.0)]),
            3,
        );
        assert!(!outcome.passed);
    }

    #[test]
    fn test_partial_nod_below_threshold_fails() {
        // 0.75 * 25/50 = 0.375 < 0.4
        let outcome = run(
            ChallengeKind::Nod,
            noses_y(&[Some(100.0), Some(110.0), Some(125.0)]),
            3,
        );
        assert!(!outcome.passed);
    }

    #[test]
    fn test_blink_transition_passes() {
        let outcome = run(
            ChallengeKind::Blink,
            ScriptedProvider::from_ears(&[0.3, 0.31, 0.12, 0.3]),
            4,
        );
        assert!(outcome.passed);
        assert!((outcome.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_blink_gradual_close_fails() {
        // No single step goes from above 0.25 to below 0.20.
        let outcome = run(
            ChallengeKind::Blink,
            ScriptedProvider::from_ears(&[0.3, 0.22, 0.1, 0.3]),
            4,
        );
        assert!(!outcome.passed);
    }

    #[test]
    fn test_blink_needs_three_usable_frames() {
        let provider = ScriptedProvider::from_ears(&[0.3, 0.1]);
        let outcome = run(ChallengeKind::Blink, provider, 5);
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("not enough"));
    }

    #[test]
    fn test_smile_passes_on_last_frame() {
        let issued = Instant::now();
        let v = validator(ScriptedProvider::new(), 2);
        let outcome = v.validate_at(
            &challenge(ChallengeKind::Smile, issued),
            &frames(3),
            issued + Duration::from_secs(4),
        );
        assert!(outcome.passed);
        assert!((outcome.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_smile_confidence_caps_at_one() {
        let issued = Instant::now();
        let v = validator(ScriptedProvider::new(), 5);
        let outcome = v.validate_at(
            &challenge(ChallengeKind::Smile, issued),
            &frames(1),
            issued + Duration::from_secs(4),
        );
        assert_eq!(outcome.confidence, 1.0);
    }

    #[test]
    fn test_no_smile_fails() {
        let issued = Instant::now();
        let v = validator(ScriptedProvider::new(), 0);
        let outcome = v.validate_at(
            &challenge(ChallengeKind::Smile, issued),
            &frames(2),
            issued + Duration::from_secs(4),
        );
        assert!(!outcome.passed);
    }

    #[test]
    fn test_smile_before_hold_fails() {
        let issued = Instant::now();
        let v = validator(ScriptedProvider::new(), 3);
        let outcome = v.validate_at(
            &challenge(ChallengeKind::Smile, issued),
            &frames(2),
            issued + Duration::from_secs(1),
        );
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("held"));
    }

    #[test]
    fn test_head_turn_right_passes() {
        let outcome = run(
            ChallengeKind::HeadTurn(TurnDirection::Right),
            noses_x(&[Some(100.0), Some(115.0), Some(130.0)]),
            3,
        );
        assert!(outcome.passed);
        assert!((outcome.confidence - 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_head_turn_wrong_direction_fails() {
        let outcome = run(
            ChallengeKind::HeadTurn(TurnDirection::Left),
            noses_x(&[Some(100.0), Some(115.0), Some(130.0)]),
            3,
        );
        assert!(!outcome.passed);
    }

    #[test]
    fn test_head_turn_uses_last_frame_with_face() {
        let outcome = run(
            ChallengeKind::HeadTurn(TurnDirection::Left),
            noses_x(&[Some(100.0), Some(80.0), Some(60.0), None, None]),
            5,
        );
        assert!(outcome.passed);
        assert!((outcome.confidence - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_head_turn_needs_face_in_first_frame() {
        let outcome = run(
            ChallengeKind::HeadTurn(TurnDirection::Right),
            noses_x(&[None, Some(100.0), Some(160.0)]),
            3,
        );
        assert!(!outcome.passed);
    }

    #[test]
    fn test_small_head_turn_below_threshold_fails() {
        // 12px clears the 10px gate but 12/50 = 0.24 < 0.3.
        let outcome = run(
            ChallengeKind::HeadTurn(TurnDirection::Right),
            noses_x(&[Some(100.0), Some(112.0)]),
            2,
        );
        assert!(!outcome.passed);
    }

    #[test]
    fn test_expired_challenge_fails() {
        let issued = Instant::now();
        let v = validator(noses_y(&[Some(100.0), Some(130.0), Some(100.0)]), 0);
        let outcome = v.validate_at(
            &challenge(ChallengeKind::Nod, issued),
            &frames(3),
            issued + Duration::from_secs(11),
        );
        assert!(!outcome.passed);
        assert_eq!(outcome.detail, "challenge timed out");
    }
}
