/// Multi-class YOLO detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, and class-aware NMS
/// post-processing. The session is created lazily on first use so a
/// pipeline can be constructed before weights finish resolving.
use std::path::{Path, PathBuf};

use crate::detection::domain::classes::coco_class_name;
use crate::detection::domain::object_detector::{Detection, ObjectDetector};
use crate::shared::bbox::BBox;
use crate::shared::frame::Frame;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// YOLO detection rows carry 4 box values followed by one score per class.
const BOX_VALUES: usize = 4;

pub struct OnnxYoloDetector {
    model_path: PathBuf,
    session: Option<ort::session::Session>,
    confidence: f64,
    nms_iou: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Prepare a detector for the given ONNX model.
    ///
    /// `input_size` is the inference input side in pixels; `confidence` is
    /// the global floor applied before class-conditional filtering.
    pub fn new(model_path: &Path, input_size: u32, confidence: f64, nms_iou: f64) -> Self {
        Self {
            model_path: model_path.to_path_buf(),
            session: None,
            confidence,
            nms_iou,
            input_size: if input_size == 0 {
                DEFAULT_INPUT_SIZE
            } else {
                input_size
            },
        }
    }

    fn session(&mut self) -> Result<&mut ort::session::Session, Box<dyn std::error::Error>> {
        if self.session.is_none() {
            log::info!("Loading detection model: {}", self.model_path.display());
            let session =
                ort::session::Session::builder()?.commit_from_file(&self.model_path)?;
            self.session = Some(session);
        }
        Ok(self.session.as_mut().unwrap())
    }
}

impl ObjectDetector for OnnxYoloDetector {
    fn predict(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        // 1. Preprocess: letterbox + normalize → NCHW float32
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);

        // 2. Inference
        let confidence = self.confidence;
        let nms_iou = self.nms_iou;
        let session = self.session()?;
        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape();

        // YOLO output shape is [1, num_features, num_detections] (transposed)
        // or [1, num_detections, num_features]. Handle both.
        let (num_dets, num_feats) = if shape.len() == 3 {
            if shape[1] < shape[2] {
                // [1, features, detections] → transpose
                (shape[2], shape[1])
            } else {
                (shape[1], shape[2])
            }
        } else {
            return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
        };
        if num_feats <= BOX_VALUES {
            return Err(format!("YOLO output rows too short: {num_feats} features").into());
        }

        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;
        let transposed = shape.len() == 3 && shape[1] < shape[2];

        // 3. Parse detections: row = [cx, cy, w, h, class scores...]
        let mut raw = Vec::new();
        for i in 0..num_dets {
            let row = if transposed {
                (0..num_feats)
                    .map(|f| data[f * num_dets + i])
                    .collect::<Vec<f32>>()
            } else {
                data[i * num_feats..(i + 1) * num_feats].to_vec()
            };

            let (class_id, score) = best_class(&row[BOX_VALUES..]);
            if score < confidence {
                continue;
            }

            let cx = row[0] as f64;
            let cy = row[1] as f64;
            let w = row[2] as f64;
            let h = row[3] as f64;

            // Convert from letterbox coords back to original frame coords
            let bbox = BBox::new(
                ((cx - w / 2.0) - pad_x as f64) / scale,
                ((cy - h / 2.0) - pad_y as f64) / scale,
                ((cx + w / 2.0) - pad_x as f64) / scale,
                ((cy + h / 2.0) - pad_y as f64) / scale,
            );

            raw.push(Detection::new(bbox, class_id, score));
        }

        // 4. Class-aware NMS
        Ok(nms(raw, nms_iou))
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        coco_class_name(class_id)
    }
}

/// Highest-scoring class index and score from a row's class-score slice.
fn best_class(scores: &[f32]) -> (usize, f64) {
    let mut best_id = 0;
    let mut best = f32::MIN;
    for (id, &score) in scores.iter().enumerate() {
        if score > best {
            best = score;
            best_id = id;
        }
    }
    (best_id, best as f64)
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = (fw * scale).round() as u32;
    let new_h = (fh * scale).round() as u32;
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Build padded image (filled with 114/255 gray, YOLO convention)
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let src = frame.data();

    // Nearest-neighbor resize + copy into padded region
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            let base = (src_y * src_w + src_x) * 3;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[base + c] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

// ---------------------------------------------------------------------------
// NMS
// ---------------------------------------------------------------------------

/// Greedy class-aware NMS: sort by confidence descending, suppress
/// overlapping boxes of the same class.
fn nms(mut dets: Vec<Detection>, iou_thresh: f64) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];

    for i in 0..dets.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..dets.len() {
            if suppressed[j] || dets[j].class_id != dets[i].class_id {
                continue;
            }
            if dets[i].bbox.iou(&dets[j].bbox) > iou_thresh {
                suppressed[j] = true;
            }
        }
        keep.push(dets[i].clone());
    }
    keep
}
