//! Per-attempt verification state.
//!
//! An [`Attempt`] owns everything one verification accumulates: the blink
//! session, the motion history, the issued challenge and its outcome. It is
//! created at attempt start, fed frames, and consumed by
//! [`Attempt::finalize`]. Nothing is shared between attempts.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::blink::{BlinkSession, BlinkStatus};
use crate::challenge::{Challenge, ChallengeOutcome, ChallengeValidator};
use crate::config::VerificationConfig;
use crate::error::ConfigError;
use crate::fraud::{FraudAggregator, FraudInput, FraudVerdict};
use crate::history::FrameHistory;
use crate::landmarks::LandmarkProvider;
use crate::types::{BoundingBox, Frame};

/// Why an attempt stopped accepting frames before finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// Too many consecutive frames without a face.
    FaceLost { frames: u32 },
    /// More than one face in view.
    MultipleFaces { count: usize },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::FaceLost { frames } => {
                write!(f, "face lost for {frames} consecutive frames")
            }
            AbortReason::MultipleFaces { count } => {
                write!(f, "multiple faces detected ({count})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptProgress {
    Pending {
        status: BlinkStatus,
        /// Blinks within the trailing liveness window.
        recent_blinks: usize,
    },
    Aborted(AbortReason),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("no challenge was issued for this attempt")]
    NoChallenge,

    #[error("challenge already answered")]
    ChallengeAnswered,

    #[error("attempt aborted: {0}")]
    Aborted(AbortReason),
}

/// Terminal result of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptReport {
    pub id: Uuid,
    pub verdict: FraudVerdict,
    pub blinks: u32,
    pub challenge: Option<ChallengeOutcome>,
    pub aborted: Option<AbortReason>,
    /// No fraud, and the challenge passed when one was issued.
    pub accepted: bool,
}

pub struct Attempt {
    id: Uuid,
    session: BlinkSession,
    history: FrameHistory,
    challenge: Option<Challenge>,
    outcome: Option<ChallengeOutcome>,
    blink_window: Duration,
    max_bad_frames: u32,
    bad_frames: u32,
    frames_seen: u64,
    aborted: Option<AbortReason>,
    created_at: Instant,
    ttl: Duration,
}

impl Attempt {
    pub fn new(
        id: Uuid,
        config: &VerificationConfig,
        provider: Arc<dyn LandmarkProvider>,
        challenge: Option<Challenge>,
    ) -> Result<Self, ConfigError> {
        Self::starting_at(id, config, provider, challenge, Instant::now())
    }

    pub fn starting_at(
        id: Uuid,
        config: &VerificationConfig,
        provider: Arc<dyn LandmarkProvider>,
        challenge: Option<Challenge>,
        now: Instant,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let session = BlinkSession::starting_at(config.blink.clone(), provider, now)?;
        Ok(Self {
            id,
            session,
            history: FrameHistory::new(config.fraud.history_capacity),
            challenge,
            outcome: None,
            blink_window: config.blink.time_window(),
            max_bad_frames: config.attempt.max_consecutive_bad_frames,
            bad_frames: 0,
            frames_seen: 0,
            aborted: None,
            created_at: now,
            ttl: config.attempt.ttl(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn aborted(&self) -> Option<AbortReason> {
        self.aborted
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn observe(&mut self, frame: &Frame) -> AttemptProgress {
        self.observe_at(frame, Instant::now())
    }

    pub fn observe_at(&mut self, frame: &Frame, now: Instant) -> AttemptProgress {
        if let Some(reason) = self.aborted {
            return AttemptProgress::Aborted(reason);
        }
        self.frames_seen += 1;

        let status = self.session.observe_at(frame, now);
        match status {
            BlinkStatus::NoFace => {
                self.bad_frames += 1;
                if self.bad_frames > self.max_bad_frames {
                    return self.abort(AbortReason::FaceLost {
                        frames: self.bad_frames,
                    });
                }
            }
            BlinkStatus::MultipleFaces(count) => {
                return self.abort(AbortReason::MultipleFaces { count });
            }
            _ => self.bad_frames = 0,
        }

        self.history.push(frame.to_gray());

        if status.is_final() {
            tracing::info!(
                attempt = %self.id,
                live = status.is_live(),
                blinks = self.session.blink_count(),
                "liveness window closed"
            );
        }

        AttemptProgress::Pending {
            recent_blinks: self.session.blinks_in_last_at(self.blink_window, now),
            status,
        }
    }

    fn abort(&mut self, reason: AbortReason) -> AttemptProgress {
        tracing::warn!(attempt = %self.id, %reason, "attempt aborted");
        self.aborted = Some(reason);
        AttemptProgress::Aborted(reason)
    }

    pub fn answer_challenge(
        &mut self,
        validator: &ChallengeValidator,
        frames: &[Frame],
    ) -> Result<ChallengeOutcome, AttemptError> {
        self.answer_challenge_at(validator, frames, Instant::now())
    }

    /// Validate the issued challenge. Each challenge is answerable once.
    pub fn answer_challenge_at(
        &mut self,
        validator: &ChallengeValidator,
        frames: &[Frame],
        now: Instant,
    ) -> Result<ChallengeOutcome, AttemptError> {
        if let Some(reason) = self.aborted {
            return Err(AttemptError::Aborted(reason));
        }
        let challenge = self.challenge.as_ref().ok_or(AttemptError::NoChallenge)?;
        if self.outcome.is_some() {
            return Err(AttemptError::ChallengeAnswered);
        }

        let outcome = validator.validate_at(challenge, frames, now);
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    pub fn finalize(
        self,
        aggregator: &FraudAggregator,
        frame: &Frame,
        face_box: BoundingBox,
    ) -> AttemptReport {
        self.finalize_at(aggregator, frame, face_box, Instant::now())
    }

    /// Run the fraud pipeline on `frame` and close the attempt.
    pub fn finalize_at(
        self,
        aggregator: &FraudAggregator,
        frame: &Frame,
        face_box: BoundingBox,
        now: Instant,
    ) -> AttemptReport {
        let blinks = self.session.blink_count();

        let verdict = match self.aborted {
            Some(AbortReason::MultipleFaces { count }) => FraudVerdict::multiple_faces(count),
            _ => {
                let liveness = self.session.status_at(now);
                let face_region = frame.crop(&face_box);
                aggregator.evaluate(&FraudInput {
                    frame,
                    face_region: &face_region,
                    face_box,
                    liveness: &liveness,
                    blink_count: blinks,
                    history: &self.history,
                })
            }
        };

        let challenge_ok = match (&self.challenge, &self.outcome) {
            (None, _) => true,
            (Some(_), Some(outcome)) => outcome.passed,
            (Some(_), None) => false,
        };
        let accepted = !verdict.is_fraud && challenge_ok && self.aborted.is_none();

        tracing::info!(
            attempt = %self.id,
            accepted,
            fraud = verdict.is_fraud,
            blinks,
            frames = self.frames_seen,
            "attempt finalized"
        );

        AttemptReport {
            id: self.id,
            verdict,
            blinks,
            challenge: self.outcome,
            aborted: self.aborted,
            accepted,
        }
    }
}
