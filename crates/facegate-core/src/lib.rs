//! facegate-core — Face detection, descriptor extraction and matching.
//!
//! Detects faces with SCRFD and encodes them into 512-dimensional
//! descriptors with ArcFace, both running via ONNX Runtime on the CPU.
//! Descriptors are compared by Euclidean distance against a tunable
//! threshold.

pub mod alignment;
pub mod descriptor;
pub mod detector;
pub mod imaging;
pub mod pipeline;
pub mod recognizer;

pub use descriptor::{Descriptor, DescriptorError, DESCRIPTOR_DIM};
pub use detector::{Face, FaceDetector};
pub use imaging::{decode_grayscale, GrayImage, ImageError};
pub use pipeline::{DescriptorExtractor, ExtractError, FacePipeline};
pub use recognizer::FaceRecognizer;
