//! Texture analyzer construction.
//!
//! A configured spoof-classifier model is integrity-checked before loading.
//! Any failure (bad pin, missing file, digest mismatch, load error, or a
//! build without the `onnx` feature) is logged and the analyzer runs on
//! frequency-domain analysis alone.

use vigil_core::config::TextureConfig;
use vigil_core::{ConfigError, SpoofClassifier, TextureAnalyzer};
use vigil_models::PinnedModel;

use crate::config::ClassifierConfig;

pub fn build_texture_analyzer(
    texture: &TextureConfig,
    classifier: &ClassifierConfig,
) -> Result<TextureAnalyzer, ConfigError> {
    TextureAnalyzer::new(texture, load_classifier(classifier))
}

fn load_classifier(config: &ClassifierConfig) -> Option<Box<dyn SpoofClassifier>> {
    let path = config.model_path.as_ref()?;

    let verified = match PinnedModel::new(path, config.sha256.as_deref()).and_then(|m| m.verify()) {
        Ok(verified) => verified,
        Err(e) => {
            tracing::warn!(error = %e, "spoof classifier rejected, falling back to frequency analysis");
            return None;
        }
    };
    if !verified.pinned {
        tracing::warn!(
            model = %verified.path.display(),
            sha256 = %verified.sha256,
            "spoof classifier digest not pinned"
        );
    }

    open(&verified.path, config.channels_first)
}

#[cfg(feature = "onnx")]
fn open(path: &std::path::Path, channels_first: bool) -> Option<Box<dyn SpoofClassifier>> {
    match vigil_core::onnx::OnnxSpoofClassifier::load(path, channels_first) {
        Ok(classifier) => Some(Box::new(classifier)),
        Err(e) => {
            tracing::warn!(error = %e, "spoof classifier failed to load, falling back to frequency analysis");
            None
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn open(path: &std::path::Path, _channels_first: bool) -> Option<Box<dyn SpoofClassifier>> {
    tracing::warn!(
        model = %path.display(),
        "built without the onnx feature, spoof classifier ignored"
    );
    None
}
