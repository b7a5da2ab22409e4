//! vigil-core: Presentation-attack detection for face verification.
//!
//! Blink liveness from eye aspect ratio, texture spoof analysis (FFT or a
//! learned classifier behind the `onnx` feature), randomized
//! challenge-response, and a fraud aggregator fusing those signals with
//! lighting, face-size, and motion heuristics. Face landmarks come from a
//! [`LandmarkProvider`] supplied by the embedder.

pub mod attempt;
pub mod blink;
pub mod challenge;
pub mod config;
pub mod ear;
pub mod error;
pub mod fraud;
pub mod history;
pub mod landmarks;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod texture;
pub mod types;

#[cfg(test)]
mod test_support;

pub use attempt::{AbortReason, Attempt, AttemptError, AttemptProgress, AttemptReport};
pub use blink::{BlinkSession, BlinkStatus, NotLiveReason};
pub use challenge::{Challenge, ChallengeKind, ChallengeOutcome, ChallengeValidator, TurnDirection};
pub use config::VerificationConfig;
pub use error::{ClassifierError, ConfigError};
pub use fraud::{FraudAggregator, FraudType, FraudVerdict, Severity};
pub use landmarks::{LandmarkProvider, SmileDetector};
pub use texture::{SpoofClassifier, TextureAnalyzer, TextureVerdict};
pub use types::{BoundingBox, Detection, EyeLandmarks, FaceLandmarks, Frame, Point};
