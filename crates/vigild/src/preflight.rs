//! Startup readiness check.
//!
//! Builds everything an engine needs from a [`Config`] without starting
//! workers: validated settings, the texture analyzer (including model
//! integrity), and the default fraud pipeline.

use std::path::PathBuf;

use serde::Serialize;
use vigil_core::fraud::CheckKind;
use vigil_core::FraudAggregator;

use crate::classifier::build_texture_analyzer;
use crate::config::{Config, ConfigError};

/// What an engine built from this configuration would run with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreflightReport {
    pub texture_strategy: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    /// A model was configured but texture analysis fell back to FFT.
    pub classifier_fallback: bool,
    pub fraud_checks: Vec<CheckKind>,
    pub challenges: bool,
    pub workers: usize,
    pub queue_depth: usize,
}

impl PreflightReport {
    pub fn is_ready(&self) -> bool {
        !self.classifier_fallback
    }
}

pub fn preflight(config: &Config) -> Result<PreflightReport, ConfigError> {
    config.validate()?;
    let v = &config.verification;

    let texture = build_texture_analyzer(&v.texture, &config.classifier)?;
    let texture_strategy = texture.strategy_name();
    let model = config.classifier.model_path.clone();
    let classifier_fallback = model.is_some() && texture_strategy != "learned";

    let aggregator = FraudAggregator::new(&v.fraud, texture)?;

    Ok(PreflightReport {
        texture_strategy,
        model,
        classifier_fallback,
        fraud_checks: aggregator.check_kinds(),
        challenges: v.challenge.enabled,
        workers: config.engine.worker_count(),
        queue_depth: config.engine.queue_depth,
    })
}
