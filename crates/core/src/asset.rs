//! In-memory asset payloads passed between downloaders, the stitching
//! engine and the asset store.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::hashing::sha256_hex;

/// MIME type of every panorama produced by the stitching engine.
pub const MIME_PNG: &str = "image/png";
/// MIME type of JPEG source imagery.
pub const MIME_JPEG: &str = "image/jpeg";
/// MIME type used when the provider does not announce a content type.
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Binary content plus its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AssetData {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Encode an image as PNG.
    pub fn encode_png(image: &DynamicImage) -> Result<Self, image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(Self::new(buffer.into_inner(), MIME_PNG))
    }

    /// Decode the payload, guessing the format from its magic bytes.
    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory(&self.bytes)
    }

    /// Read the image dimensions from the header without decoding pixels.
    pub fn dimensions(&self) -> Result<(u32, u32), image::ImageError> {
        image::ImageReader::new(Cursor::new(&self.bytes))
            .with_guessed_format()?
            .into_dimensions()
    }

    pub fn is_png(&self) -> bool {
        self.mime_type == MIME_PNG
            || image::guess_format(&self.bytes).ok() == Some(ImageFormat::Png)
    }

    pub fn checksum(&self) -> String {
        sha256_hex(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
