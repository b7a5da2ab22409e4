//! ONNX Runtime spoof classifier.
//!
//! Wraps a binary real/spoof model. Accepted output shapes: a single
//! probability of "real" (`[1]`, `[1, 1]`) or two class scores
//! (`[1, 2]`, index 1 = real) which are softmaxed.

use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayView4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::ClassifierError;
use crate::texture::SpoofClassifier;

pub struct OnnxSpoofClassifier {
    session: Mutex<Session>,
    channels_first: bool,
}

impl OnnxSpoofClassifier {
    /// Load the model at `path`. With `channels_first` the NHWC input is
    /// permuted to NCHW before inference.
    pub fn load(path: &Path, channels_first: bool) -> Result<Self, ClassifierError> {
        let session = Session::builder()
            .map_err(|e| ClassifierError::Load(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ClassifierError::Load(format!("optimization level: {e}")))?
            .commit_from_file(path)
            .map_err(|e| ClassifierError::Load(format!("{}: {e}", path.display())))?;

        tracing::info!(model = %path.display(), channels_first, "spoof classifier loaded");

        Ok(Self {
            session: Mutex::new(session),
            channels_first,
        })
    }
}

impl SpoofClassifier for OnnxSpoofClassifier {
    fn classify(&self, input: ArrayView4<'_, f32>) -> Result<f32, ClassifierError> {
        let view = if self.channels_first {
            input.permuted_axes([0, 3, 1, 2])
        } else {
            input
        };
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();

        let tensor = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| ClassifierError::Inference(format!("tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Inference("session poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ClassifierError::Inference(format!("run: {e}")))?;

        if outputs.len() == 0 {
            return Err(ClassifierError::EmptyOutput);
        }
        let (shape, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("extract: {e}")))?;

        real_probability(scores)
            .ok_or_else(|| ClassifierError::Shape(format!("unexpected output shape {shape:?}")))
    }
}

fn real_probability(scores: &[f32]) -> Option<f32> {
    match scores {
        [p] => Some(*p),
        [fake, real] => {
            let max = fake.max(*real);
            let (ef, er) = ((fake - max).exp(), (real - max).exp());
            Some(er / (ef + er))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_score_is_probability() {
        assert_eq!(real_probability(&[0.8]), Some(0.8));
    }

    #[test]
    fn test_two_scores_are_softmaxed() {
        let p = real_probability(&[0.0, 0.0]).unwrap();
        assert!((p - 0.5).abs() < 1e-6);
        let p = real_probability(&[-4.0, 4.0]).unwrap();
        assert!(p > 0.99);
    }

    #[test]
    fn test_other_shapes_rejected() {
        assert_eq!(real_probability(&[]), None);
        assert_eq!(real_probability(&[0.1, 0.2, 0.7]), None);
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let result = OnnxSpoofClassifier::load(Path::new("/nonexistent/vigil-spoof.onnx"), false);
        assert!(matches!(result, Err(ClassifierError::Load(_))));
    }
}
