//! Enrollment/verification pipeline: detect the best face, encode it.

use crate::descriptor::Descriptor;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected in image")]
    NoFaceFound,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Seam between authentication logic and the ONNX models, so callers can
/// be exercised in tests without model files.
pub trait DescriptorExtractor {
    /// Extract a facial descriptor from a grayscale image.
    fn extract_descriptor(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Descriptor, ExtractError>;
}

/// Detector + recognizer pair loaded from ONNX model files.
pub struct FacePipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FacePipeline {
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            recognizer: FaceRecognizer::load(recognizer_path)?,
        })
    }
}

impl DescriptorExtractor for FacePipeline {
    /// Detect faces and encode the highest-confidence one.
    ///
    /// When several faces are present the most confident detection wins;
    /// zero detections is `NoFaceFound`.
    fn extract_descriptor(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Descriptor, ExtractError> {
        let faces = self.detector.detect(gray, width, height)?;
        let face = faces.first().ok_or(ExtractError::NoFaceFound)?;

        if faces.len() > 1 {
            tracing::debug!(
                count = faces.len(),
                confidence = face.confidence,
                "multiple faces detected, using the most confident"
            );
        }

        Ok(self.recognizer.encode(gray, width, height, face)?)
    }
}
