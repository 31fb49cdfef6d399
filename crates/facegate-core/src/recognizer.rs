//! ArcFace descriptor extraction via ONNX Runtime.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::descriptor::{Descriptor, DESCRIPTOR_DIM};
use crate::detector::Face;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
// ArcFace normalizes symmetrically, unlike the detector's 128.0 divisor.
const PIXEL_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based descriptor extractor for aligned face crops.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Encode a detected face from a grayscale image into a descriptor.
    ///
    /// Aligns the face to the canonical 112x112 crop using its landmarks,
    /// runs the model and L2-normalizes the output vector.
    pub fn encode(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        face: &Face,
    ) -> Result<Descriptor, RecognizerError> {
        let aligned = alignment::align_face(gray, width, height, &face.landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor output: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Descriptor::new(values))
    }
}

/// Turn a 112x112 grayscale crop into the NCHW float tensor the model
/// expects, replicating the gray channel across RGB.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));

    for y in 0..ALIGNED_SIZE {
        for x in 0..ALIGNED_SIZE {
            let pixel = aligned.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - PIXEL_MEAN) / PIXEL_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape() {
        let aligned = vec![128u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let aligned = vec![128u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = preprocess(&aligned);
        let expected = (128.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_extremes_symmetric() {
        let mut aligned = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
        aligned[1] = 255;
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 1]] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_preprocess_channels_replicated() {
        let aligned: Vec<u8> = (0..ALIGNED_SIZE * ALIGNED_SIZE)
            .map(|i| (i % 251) as u8)
            .collect();
        let tensor = preprocess(&aligned);
        for y in 0..ALIGNED_SIZE {
            for x in 0..ALIGNED_SIZE {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }
}
