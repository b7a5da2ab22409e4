//! Eye Aspect Ratio.
//!
//! EAR = (|p1 - p5| + |p2 - p4|) / (2 |p0 - p3|)
//!
//! An open eye sits around 0.3; a closed one drops towards 0.1. The ratio
//! is dimensionless, so it does not depend on how far the face is from the
//! camera.

use crate::types::{EyeLandmarks, FaceLandmarks};

/// Value returned when the eye corners coincide and the ratio is undefined.
pub const NEUTRAL_EAR: f32 = 0.3;

/// Compute the EAR of one eye.
pub fn eye_aspect_ratio(eye: &EyeLandmarks) -> f32 {
    let [p0, p1, p2, p3, p4, p5] = eye.points();
    let vertical_a = p1.distance(p5);
    let vertical_b = p2.distance(p4);
    let horizontal = p0.distance(p3);

    if horizontal == 0.0 {
        return NEUTRAL_EAR;
    }

    (vertical_a + vertical_b) / (2.0 * horizontal)
}

/// Average EAR over whichever eyes are detectable.
///
/// Returns `None` when neither eye has a usable 6-point contour.
pub fn average_ear(face: &FaceLandmarks) -> Option<f32> {
    match (&face.left_eye, &face.right_eye) {
        (Some(left), Some(right)) => {
            Some((eye_aspect_ratio(left) + eye_aspect_ratio(right)) / 2.0)
        }
        (Some(eye), None) | (None, Some(eye)) => Some(eye_aspect_ratio(eye)),
        (None, None) => None,
    }
}
