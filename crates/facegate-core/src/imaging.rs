//! Decoding of uploaded image bytes into grayscale pixel buffers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("could not decode image: {0}")]
    Undecodable(#[from] image::ImageError),
}

/// Decoded grayscale image.
pub struct GrayImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode enrollment photo bytes (JPEG, PNG, ...) into grayscale pixels.
pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage, ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let luma = decoded.to_luma8();
    let (width, height) = luma.dimensions();
    Ok(GrayImage {
        data: luma.into_raw(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png() {
        let gray = decode_grayscale(&png_bytes(20, 10)).unwrap();
        assert_eq!(gray.width, 20);
        assert_eq!(gray.height, 10);
        assert_eq!(gray.data.len(), 200);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_grayscale(b"definitely not an image");
        assert!(matches!(result, Err(ImageError::Undecodable(_))));
    }

    #[test]
    fn test_decode_empty_fails() {
        assert!(decode_grayscale(&[]).is_err());
    }
}
