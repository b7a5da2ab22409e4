use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// A 2D landmark coordinate in frame pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Six ordered eye landmarks.
///
/// Convention: `p0`/`p3` are the horizontal corners, `(p1, p5)` and
/// `(p2, p4)` are the vertical lid pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks(pub [Point; 6]);

impl EyeLandmarks {
    /// Build from a point slice. Anything other than exactly 6 points means
    /// the eye is undetectable for this frame.
    pub fn from_slice(points: &[Point]) -> Option<Self> {
        let arr: [Point; 6] = points.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn points(&self) -> &[Point; 6] {
        &self.0
    }
}

/// Axis-aligned face bounding box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Landmarks for the single face found in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    pub bbox: BoundingBox,
    pub left_eye: Option<EyeLandmarks>,
    pub right_eye: Option<EyeLandmarks>,
    /// Nose-tip contour; the first point is the tipmost one.
    pub nose: Vec<Point>,
    pub mouth: Vec<Point>,
}

impl FaceLandmarks {
    pub fn nose_tip(&self) -> Option<Point> {
        self.nose.first().copied()
    }
}

/// Output of a landmark provider for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Face(FaceLandmarks),
    NoFace,
    MultipleFaces(usize),
}

impl Detection {
    pub fn face(&self) -> Option<&FaceLandmarks> {
        match self {
            Detection::Face(face) => Some(face),
            _ => None,
        }
    }
}

/// One decoded, client-submitted frame and its position in the burst.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Crop `bbox` out of the frame, clamped to the frame bounds.
    /// A box entirely outside the frame yields an empty image.
    pub fn crop(&self, bbox: &BoundingBox) -> RgbImage {
        let (w, h) = self.image.dimensions();
        let x0 = bbox.x.max(0.0).floor() as u32;
        let y0 = bbox.y.max(0.0).floor() as u32;
        let x1 = (bbox.x + bbox.width).max(0.0).ceil() as u32;
        let y1 = (bbox.y + bbox.height).max(0.0).ceil() as u32;
        let x0 = x0.min(w);
        let y0 = y0.min(h);
        let x1 = x1.min(w);
        let y1 = y1.min(h);
        if x1 <= x0 || y1 <= y0 {
            return RgbImage::new(0, 0);
        }
        image::imageops::crop_imm(&self.image, x0, y0, x1 - x0, y1 - y0).to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_eye_landmarks_require_six_points() {
        let pts = [Point::default(); 6];
        assert!(EyeLandmarks::from_slice(&pts).is_some());
        assert!(EyeLandmarks::from_slice(&pts[..5]).is_none());
        assert!(EyeLandmarks::from_slice(&[Point::default(); 7]).is_none());
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = Frame::new(0, RgbImage::from_pixel(100, 80, Rgb([10, 20, 30])));
        let region = frame.crop(&BoundingBox::new(90.0, 70.0, 40.0, 40.0));
        assert_eq!(region.dimensions(), (10, 10));
    }

    #[test]
    fn test_crop_outside_frame_is_empty() {
        let frame = Frame::new(0, RgbImage::new(50, 50));
        let region = frame.crop(&BoundingBox::new(60.0, 60.0, 10.0, 10.0));
        assert_eq!(region.dimensions(), (0, 0));
    }
}
