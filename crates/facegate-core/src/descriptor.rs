//! Facial descriptor type and distance-based matching.

use thiserror::Error;

/// Dimension of the descriptors produced by the ArcFace model in use.
pub const DESCRIPTOR_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor blob length {0} is not a multiple of 4")]
    MisalignedBlob(usize),
    #[error("descriptor has {got} dimensions, expected {expected}")]
    WrongDimension { got: usize, expected: usize },
}

/// Fixed-length facial descriptor vector.
///
/// Stored in the user table as an opaque little-endian f32 blob,
/// produced by [`to_bytes`](Self::to_bytes) and read back by
/// [`from_bytes`](Self::from_bytes).
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another descriptor.
    ///
    /// Dimensions beyond the shorter vector are ignored; callers are
    /// expected to compare descriptors from the same extractor.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True iff the distance to `other` is within `threshold`.
    ///
    /// A descriptor always matches itself for any threshold >= 0.
    pub fn matches(&self, other: &Descriptor, threshold: f32) -> bool {
        self.euclidean_distance(other) <= threshold
    }

    /// Serialize to a little-endian f32 byte blob for BLOB storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.values.len() * 4);
        for v in &self.values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    /// Deserialize from a little-endian f32 byte blob.
    ///
    /// Enforces the stored-descriptor invariant: the blob must decode to
    /// exactly [`DESCRIPTOR_DIM`] dimensions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() % 4 != 0 {
            return Err(DescriptorError::MisalignedBlob(bytes.len()));
        }
        let dims = bytes.len() / 4;
        if dims != DESCRIPTOR_DIM {
            return Err(DescriptorError::WrongDimension {
                got: dims,
                expected: DESCRIPTOR_DIM,
            });
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { values })
    }
}
