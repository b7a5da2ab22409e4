//! Collaborator seams for face geometry.
//!
//! Vigil never ships a landmark model of its own. Whatever produces the
//! points (dlib, MediaPipe, an ONNX landmark head) is plugged in behind
//! these traits; every detector above consumes them as opaque point sets.

use crate::types::{Detection, Frame};

/// Extracts facial landmarks from a single frame.
///
/// Implementations must report `MultipleFaces` rather than picking one face,
/// so that proxy attempts are visible to the caller.
pub trait LandmarkProvider: Send + Sync {
    fn detect(&self, frame: &Frame) -> Detection;
}

/// Counts smile regions in a frame (e.g. a Haar cascade over the mouth area).
pub trait SmileDetector: Send + Sync {
    fn count_smiles(&self, frame: &Frame) -> usize;
}

impl<T: LandmarkProvider + ?Sized> LandmarkProvider for std::sync::Arc<T> {
    fn detect(&self, frame: &Frame) -> Detection {
        (**self).detect(frame)
    }
}

impl<T: SmileDetector + ?Sized> SmileDetector for std::sync::Arc<T> {
    fn count_smiles(&self, frame: &Frame) -> usize {
        (**self).count_smiles(frame)
    }
}
