//! vigild: Verification service around vigil-core.
//!
//! Loads configuration, prepares the texture analyzer (verifying any
//! configured spoof-classifier model), and runs attempts on a pool of
//! worker threads. Landmark extraction and evidence persistence are
//! supplied by the embedder through [`engine::Collaborators`]. The `vigild`
//! binary runs [`preflight`] only.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod evidence;
pub mod preflight;

pub use config::Config;
pub use engine::{spawn_engine, AttemptStarted, Collaborators, EngineError, EngineHandle};
pub use evidence::{Evidence, EvidenceSink, LogEvidenceSink};
pub use preflight::{preflight, PreflightReport};
