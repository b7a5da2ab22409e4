//! Blink-based liveness detection.
//!
//! A [`BlinkSession`] belongs to exactly one verification attempt. It is fed
//! frames in submission order, tracks open/closed eye transitions via the
//! averaged EAR, and yields a verdict once its observation window elapses.
//!
//! # Threat Coverage
//!
//! - **Blocks:** printed photographs and frozen screens (no blinks), and
//!   scripted rapid blinking aimed at a naive "any blink passes" gate
//!   (too many blinks).
//! - **Does not block:** video replays of a person blinking at a natural
//!   rate. Challenge-response covers that case.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::BlinkConfig;
use crate::ear::average_ear;
use crate::error::ConfigError;
use crate::landmarks::LandmarkProvider;
use crate::types::{Detection, Frame};

/// Why a completed window was judged not live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotLiveReason {
    TooFewBlinks,
    TooManyBlinks,
}

impl fmt::Display for NotLiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotLiveReason::TooFewBlinks => f.write_str("too few blinks — possible static image"),
            NotLiveReason::TooManyBlinks => {
                f.write_str("too many blinks — possible rapid-blink attack")
            }
        }
    }
}

/// Result of observing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BlinkStatus {
    /// Window still open; keep feeding frames.
    Undetermined { elapsed: Duration, blinks: u32 },
    /// No face in this frame. Recoverable.
    NoFace,
    /// More than one face in this frame. The caller should abort.
    MultipleFaces(usize),
    Live { blinks: u32 },
    NotLive { blinks: u32, reason: NotLiveReason },
}

impl BlinkStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, BlinkStatus::Live { .. })
    }

    /// Whether the window has closed with a final verdict.
    pub fn is_final(&self) -> bool {
        matches!(self, BlinkStatus::Live { .. } | BlinkStatus::NotLive { .. })
    }

    /// Human-readable status for client feedback.
    pub fn message(&self) -> String {
        match self {
            BlinkStatus::Undetermined { elapsed, blinks } => {
                format!("verifying ({}s, {blinks} blinks)", elapsed.as_secs())
            }
            BlinkStatus::NoFace => "no face detected".to_string(),
            BlinkStatus::MultipleFaces(n) => format!("multiple faces detected ({n})"),
            BlinkStatus::Live { blinks } => format!("liveness verified ({blinks} blinks)"),
            BlinkStatus::NotLive { reason, .. } => reason.to_string(),
        }
    }
}

/// Per-attempt blink state machine.
pub struct BlinkSession {
    config: BlinkConfig,
    provider: Arc<dyn LandmarkProvider>,
    closed_frames: u32,
    total_blinks: u32,
    blink_events: Vec<Instant>,
    started_at: Instant,
    last_ear: Option<f32>,
}

impl BlinkSession {
    /// Start a session now.
    pub fn new(
        config: BlinkConfig,
        provider: Arc<dyn LandmarkProvider>,
    ) -> Result<Self, ConfigError> {
        Self::starting_at(config, provider, Instant::now())
    }

    /// Start a session whose window opened at `started_at`.
    pub fn starting_at(
        config: BlinkConfig,
        provider: Arc<dyn LandmarkProvider>,
        started_at: Instant,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            closed_frames: 0,
            total_blinks: 0,
            blink_events: Vec::new(),
            started_at,
            last_ear: None,
        })
    }

    pub fn observe(&mut self, frame: &Frame) -> BlinkStatus {
        self.observe_at(frame, Instant::now())
    }

    /// Observe `frame` as if it arrived at `now`.
    pub fn observe_at(&mut self, frame: &Frame, now: Instant) -> BlinkStatus {
        let face = match self.provider.detect(frame) {
            Detection::Face(face) => face,
            Detection::NoFace => return BlinkStatus::NoFace,
            Detection::MultipleFaces(n) => return BlinkStatus::MultipleFaces(n),
        };

        match average_ear(&face) {
            Some(ear) => self.observe_ear_at(ear, now),
            None => {
                tracing::debug!(frame = frame.index, "eyes undetectable, frame skipped");
                self.status_at(now)
            }
        }
    }

    /// Advance the state machine with an already computed average EAR.
    pub fn observe_ear_at(&mut self, ear: f32, now: Instant) -> BlinkStatus {
        self.last_ear = Some(ear);

        if ear < self.config.ear_threshold {
            self.closed_frames += 1;
        } else {
            if self.closed_frames >= self.config.consecutive_frames {
                self.total_blinks += 1;
                self.blink_events.push(now);
                tracing::debug!(
                    blinks = self.total_blinks,
                    closed_frames = self.closed_frames,
                    "blink registered"
                );
            }
            self.closed_frames = 0;
        }

        self.status_at(now)
    }

    /// Current verdict without consuming a frame.
    pub fn status_at(&self, now: Instant) -> BlinkStatus {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed < self.config.time_window() {
            return BlinkStatus::Undetermined {
                elapsed,
                blinks: self.total_blinks,
            };
        }

        let blinks = self.total_blinks;
        if blinks < self.config.min_blinks {
            BlinkStatus::NotLive {
                blinks,
                reason: NotLiveReason::TooFewBlinks,
            }
        } else if blinks > self.config.max_blinks {
            BlinkStatus::NotLive {
                blinks,
                reason: NotLiveReason::TooManyBlinks,
            }
        } else {
            BlinkStatus::Live { blinks }
        }
    }

    pub fn blink_count(&self) -> u32 {
        self.total_blinks
    }

    pub fn last_ear(&self) -> Option<f32> {
        self.last_ear
    }

    /// Blinks registered within the trailing `window`. Feedback only; it
    /// plays no part in the verdict.
    pub fn blinks_in_last(&self, window: Duration) -> usize {
        self.blinks_in_last_at(window, Instant::now())
    }

    pub fn blinks_in_last_at(&self, window: Duration, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(window) else {
            return self.blink_events.len();
        };
        self.blink_events.iter().filter(|t| **t > cutoff).count()
    }
}
