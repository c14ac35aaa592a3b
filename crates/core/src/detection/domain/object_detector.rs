use crate::shared::bbox::BBox;
use crate::shared::frame::Frame;

/// A single raw detection for one frame: box, class, confidence.
/// Carries no identity; the tracker assigns that.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: usize,
    pub score: f64,
}

impl Detection {
    pub fn new(bbox: BBox, class_id: usize, score: f64) -> Self {
        Self {
            bbox,
            class_id,
            score,
        }
    }
}

/// Domain interface for object detection.
///
/// Implementations may be stateful (e.g., lazily loaded sessions),
/// hence `&mut self`.
pub trait ObjectDetector: Send {
    fn predict(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;

    /// Resolve a class id to its model-assigned name, if known.
    fn class_name(&self, class_id: usize) -> Option<&str>;
}
