//! SCRFD face detector via ONNX Runtime.
//!
//! Decodes the anchor-free SCRFD outputs over three stride levels and
//! applies NMS. Detections carry the five facial landmarks used for
//! alignment, so detections without landmark outputs are discarded.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face: bounding box, confidence and five landmarks
/// (left eye, right eye, nose, left mouth, right mouth).
#[derive(Debug, Clone)]
pub struct Face {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: [(f32, f32); 5],
}

/// Scale and padding applied by the letterbox resize, kept around to map
/// detections back into original image coordinates.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (scores, boxes, landmarks).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Output slot per stride, discovered by tensor name at load time with
    /// a positional fallback.
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs.iter().map(|o| o.name.to_string()).collect();

        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (3 strides x scores/boxes/landmarks), got {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            stride_outputs: map_stride_outputs(&output_names),
        })
    }

    /// Detect faces in a grayscale image.
    ///
    /// Returns detections sorted by confidence, best first. An empty vec
    /// means no face cleared the confidence threshold.
    pub fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Face>, DetectorError> {
        let (input, letterbox) = preprocess(gray, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, box_idx, kps_idx) = self.stride_outputs[slot];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[box_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            detections.extend(decode_stride(scores, boxes, kps, stride, &letterbox));
        }

        let mut faces = nms(detections, NMS_IOU_THRESHOLD);
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(faces)
    }
}

/// Letterbox-resize a grayscale image into the 640x640 NCHW input tensor.
///
/// Bilinear resize, centered padding filled with the pixel mean so the
/// padded region normalizes to zero. The single gray channel is replicated
/// across all three input channels.
fn preprocess(gray: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = (width as f32 * scale).round() as usize;
    let new_h = (height as f32 * scale).round() as usize;
    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;

    let resized = bilinear_resize(gray, width, height, new_w, new_h);

    let x0 = pad_x.floor() as usize;
    let y0 = pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let pixel = if y >= y0 && y < y0 + new_h && x >= x0 && x < x0 + new_w {
                resized[(y - y0) * new_w + (x - x0)] as f32
            } else {
                PIXEL_MEAN
            };
            let normalized = (pixel - PIXEL_MEAN) / PIXEL_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Bilinear grayscale resize with half-pixel centers.
fn bilinear_resize(src: &[u8], w: usize, h: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let inv_x = w as f32 / new_w as f32;
    let inv_y = h as f32 / new_h as f32;
    let mut out = vec![0u8; new_w * new_h];

    for y in 0..new_h {
        let sy = (y as f32 + 0.5) * inv_y - 0.5;
        let y0 = (sy.floor() as i32).clamp(0, h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(h - 1);
        let fy = (sy - sy.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let sx = (x as f32 + 0.5) * inv_x - 0.5;
            let x0 = (sx.floor() as i32).clamp(0, w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(w - 1);
            let fx = (sx - sx.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * w + x0] as f32;
            let tr = src[y0 * w + x1] as f32;
            let bl = src[y1 * w + x0] as f32;
            let br = src[y1 * w + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;
            out[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Map output tensor names to (scores, boxes, landmarks) slots per stride.
///
/// SCRFD exports either named tensors ("score_8", "bbox_16", "kps_32", ...)
/// or generic numeric names; the latter fall back to the standard
/// positional layout [0-2]=scores, [3-5]=boxes, [6-8]=landmarks.
fn map_stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let all_named = STRIDES.iter().all(|&s| {
        find("score", s).is_some() && find("bbox", s).is_some() && find("kps", s).is_some()
    });

    if all_named {
        std::array::from_fn(|i| {
            let s = STRIDES[i];
            (
                find("score", s).unwrap(),
                find("bbox", s).unwrap(),
                find("kps", s).unwrap(),
            )
        })
    } else {
        tracing::debug!(?names, "SCRFD outputs not named, using positional mapping");
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode the anchor-free outputs of one stride level into faces in
/// original image coordinates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Face> {
    let grid = INPUT_SIZE / stride;
    let num_anchors = grid * grid * ANCHORS_PER_CELL;
    let mut faces = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        let b = idx * 4;
        if b + 3 >= boxes.len() {
            continue;
        }
        let (x1, y1) = letterbox.to_image(
            anchor_cx - boxes[b] * stride as f32,
            anchor_cy - boxes[b + 1] * stride as f32,
        );
        let (x2, y2) = letterbox.to_image(
            anchor_cx + boxes[b + 2] * stride as f32,
            anchor_cy + boxes[b + 3] * stride as f32,
        );

        // Landmarks are required downstream for alignment; skip anchors
        // whose landmark slice is out of range.
        let k = idx * 10;
        if k + 9 >= kps.len() {
            continue;
        }
        let mut landmarks = [(0.0f32, 0.0f32); 5];
        for (i, lm) in landmarks.iter_mut().enumerate() {
            *lm = letterbox.to_image(
                anchor_cx + kps[k + i * 2] * stride as f32,
                anchor_cy + kps[k + i * 2 + 1] * stride as f32,
            );
        }

        faces.push(Face {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    faces
}

/// Non-maximum suppression over IoU.
fn nms(mut faces: Vec<Face>, iou_threshold: f32) -> Vec<Face> {
    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Face> = Vec::new();
    for face in faces {
        if keep.iter().all(|k| iou(k, &face) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}

fn iou(a: &Face, b: &Face) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Face {
        Face {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = face(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(5.0, 0.0, 10.0, 10.0, 1.0);
        // intersection 50, union 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let faces = vec![
            face(0.0, 0.0, 100.0, 100.0, 0.9),
            face(5.0, 5.0, 100.0, 100.0, 0.8),
            face(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(faces, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let faces = vec![
            face(0.0, 0.0, 10.0, 10.0, 0.9),
            face(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(faces, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let (w, h) = (320.0f32, 240.0f32);
        let scale = (640.0 / w).min(640.0 / h);
        let lb = Letterbox {
            scale,
            pad_x: (640.0 - (w * scale).round()) / 2.0,
            pad_y: (640.0 - (h * scale).round()) / 2.0,
        };

        let (ox, oy) = (100.0f32, 50.0f32);
        let (rx, ry) = lb.to_image(ox * scale + lb.pad_x, oy * scale + lb.pad_y);
        assert!((rx - ox).abs() < 0.1);
        assert!((ry - oy).abs() < 0.1);
    }

    #[test]
    fn test_map_stride_outputs_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8",
            "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let map = map_stride_outputs(&names);
        assert_eq!(map[0], (0, 3, 6));
        assert_eq!(map[1], (1, 4, 7));
        assert_eq!(map[2], (2, 5, 8));
    }

    #[test]
    fn test_map_stride_outputs_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32",
            "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let map = map_stride_outputs(&names);
        assert_eq!(map[0], (2, 0, 1));
        assert_eq!(map[1], (5, 3, 4));
        assert_eq!(map[2], (8, 6, 7));
    }

    #[test]
    fn test_map_stride_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(map_stride_outputs(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_bilinear_resize_uniform_stays_uniform() {
        let src = vec![128u8; 100 * 100];
        let out = bilinear_resize(&src, 100, 100, 200, 200);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_preprocess_pads_to_zero() {
        // Wide image letterboxed into a square: the vertical padding bands
        // must normalize to 0.0.
        let (w, h) = (200usize, 100usize);
        let gray = vec![200u8; w * h];
        let (tensor, lb) = preprocess(&gray, w, h);
        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        assert!(lb.pad_y > 0.0);
        // Top-left corner lies inside the padding band.
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);
    }
}
