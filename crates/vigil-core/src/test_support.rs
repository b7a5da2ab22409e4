//! Synthetic landmarks, frames and scripted collaborators for unit tests.

use std::collections::HashMap;

use image::{Rgb, RgbImage};

use crate::landmarks::{LandmarkProvider, SmileDetector};
use crate::types::{BoundingBox, Detection, EyeLandmarks, FaceLandmarks, Frame, Point};

/// Eye contour 30 px wide whose EAR is exactly `ear`, left corner at `(x, y)`.
pub fn eye_with_ear(ear: f32, x: f32, y: f32) -> EyeLandmarks {
    let w = 30.0;
    // Each lid pair spans 2h, so EAR = 4h / 2w.
    let h = ear * w / 2.0;
    EyeLandmarks([
        Point::new(x, y),
        Point::new(x + w / 3.0, y - h),
        Point::new(x + 2.0 * w / 3.0, y - h),
        Point::new(x + w, y),
        Point::new(x + 2.0 * w / 3.0, y + h),
        Point::new(x + w / 3.0, y + h),
    ])
}

/// Single face with both eyes at `ear` and the nose tip at `(120, 130)`.
pub fn face_with_ear(ear: f32) -> FaceLandmarks {
    face_with(ear, Point::new(120.0, 130.0))
}

/// Single face with open eyes and the nose tip at `nose`.
pub fn face_with_nose(nose: Point) -> FaceLandmarks {
    face_with(0.3, nose)
}

fn face_with(ear: f32, nose: Point) -> FaceLandmarks {
    FaceLandmarks {
        bbox: BoundingBox::new(60.0, 60.0, 120.0, 140.0),
        left_eye: Some(eye_with_ear(ear, 80.0, 100.0)),
        right_eye: Some(eye_with_ear(ear, 130.0, 100.0)),
        nose: vec![nose, Point::new(nose.x - 5.0, nose.y - 2.0)],
        mouth: vec![Point::new(100.0, 160.0), Point::new(140.0, 160.0)],
    }
}

/// Blank 64x64 frame carrying `index`; scripted providers key on the index.
pub fn blank_frame(index: u64) -> Frame {
    Frame::new(index, RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])))
}

/// Frame whose pixels follow a deterministic textured pattern.
pub fn textured_frame(index: u64, width: u32, height: u32, seed: u32) -> Frame {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let v = ((x * 7 + y * 13 + seed * 31) ^ (x * y + seed)) % 200 + 28;
        let v = v as u8;
        Rgb([v, v, v])
    });
    Frame::new(index, image)
}

/// Landmark provider that replays a fixed detection per frame index.
/// Indices without a script entry report `NoFace`.
#[derive(Default)]
pub struct ScriptedProvider {
    script: HashMap<u64, Detection>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, index: u64, detection: Detection) -> Self {
        self.script.insert(index, detection);
        self
    }

    /// One face per EAR value, indexed from zero.
    pub fn from_ears(ears: &[f32]) -> Self {
        let mut provider = Self::new();
        for (i, ear) in ears.iter().enumerate() {
            provider = provider.with(i as u64, Detection::Face(face_with_ear(*ear)));
        }
        provider
    }

    /// One face per nose position, `None` meaning no face in that frame.
    pub fn from_noses(noses: &[Option<Point>]) -> Self {
        let mut provider = Self::new();
        for (i, nose) in noses.iter().enumerate() {
            let detection = match nose {
                Some(p) => Detection::Face(face_with_nose(*p)),
                None => Detection::NoFace,
            };
            provider = provider.with(i as u64, detection);
        }
        provider
    }
}

impl LandmarkProvider for ScriptedProvider {
    fn detect(&self, frame: &Frame) -> Detection {
        self.script
            .get(&frame.index)
            .cloned()
            .unwrap_or(Detection::NoFace)
    }
}

/// Smile detector returning a fixed region count.
pub struct FixedSmiles(pub usize);

impl SmileDetector for FixedSmiles {
    fn count_smiles(&self, _frame: &Frame) -> usize {
        self.0
    }
}
