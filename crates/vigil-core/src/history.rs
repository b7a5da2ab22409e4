use std::collections::VecDeque;

use image::imageops::FilterType;
use image::GrayImage;

/// Bounded queue of recent grayscale frames for motion analysis.
///
/// Owned by a single attempt. Pushing beyond capacity evicts the oldest
/// frame, so memory stays flat however long a client keeps streaming.
/// Every stored frame has the dimensions of the first non-empty frame
/// pushed; later frames of another size are resized to match, so every
/// adjacent pair stays comparable.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    frames: VecDeque<GrayImage>,
    capacity: usize,
    dimensions: Option<(u32, u32)>,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            dimensions: None,
        }
    }

    /// Store `frame`. Empty frames are dropped.
    pub fn push(&mut self, frame: GrayImage) {
        if self.capacity == 0 || frame.width() == 0 || frame.height() == 0 {
            return;
        }

        let (w, h) = *self.dimensions.get_or_insert(frame.dimensions());
        let frame = if frame.dimensions() == (w, h) {
            frame
        } else {
            tracing::debug!(
                from = ?frame.dimensions(),
                to = ?(w, h),
                "history: frame resized to match earlier frames"
            );
            image::imageops::resize(&frame, w, h, FilterType::Triangle)
        };

        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Mean absolute pixel difference of each adjacent frame pair.
    pub fn inter_frame_motion(&self) -> Vec<f32> {
        self.frames
            .iter()
            .zip(self.frames.iter().skip(1))
            .filter_map(|(prev, curr)| mean_abs_diff(prev, curr))
            .collect()
    }
}

fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> Option<f32> {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return None;
    }
    let sum: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| x.abs_diff(*y) as u64)
        .sum();
    Some(sum as f32 / a.as_raw().len() as f32)
}
