//! Image formats and in-memory tiles

use super::Tile;
use crate::types::Envelope;
use crate::{Result, StoreError};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Accepts a file extension (`png`, `jpg`) or a MIME type (`image/png`)
pub fn parse_image_format(name: &str) -> Result<ImageFormat> {
    let name = name.trim().to_ascii_lowercase();
    let format = if name.contains('/') {
        ImageFormat::from_mime_type(&name)
    } else {
        ImageFormat::from_extension(&name)
    };
    format.ok_or_else(|| StoreError::Config(format!("unknown image format '{}'", name)))
}

/// Preferred file extension for `format`
pub fn file_extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("bin")
}

pub fn encode_image(image: &RgbaImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        // no alpha channel in JPEG
        ImageFormat::Jpeg => DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .write_to(&mut buf, format)?,
        _ => image.write_to(&mut buf, format)?,
    }
    Ok(buf.into_inner())
}

pub fn decode_image(bytes: &[u8], format: ImageFormat) -> Result<RgbaImage> {
    Ok(image::load_from_memory_with_format(bytes, format)?.to_rgba8())
}

/// Tile holding already encoded bytes, as read from a file or a blob column
#[derive(Debug, Clone)]
pub struct EncodedTile {
    bytes: Vec<u8>,
    format: ImageFormat,
    envelope: Envelope,
}

impl EncodedTile {
    pub fn new(bytes: Vec<u8>, format: ImageFormat, envelope: Envelope) -> Self {
        Self { bytes, format, envelope }
    }
}

impl Tile for EncodedTile {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn as_image(&self) -> Result<RgbaImage> {
        decode_image(&self.bytes, self.format)
    }

    fn as_encoded_bytes(&self, format: &str) -> Result<Vec<u8>> {
        let target = parse_image_format(format)?;
        if target == self.format {
            return Ok(self.bytes.clone());
        }
        encode_image(&self.as_image()?, target)
    }
}

/// Tile built from decoded pixels, e.g. to hand to a transaction's `put`
#[derive(Debug, Clone)]
pub struct ImageTile {
    image: RgbaImage,
    envelope: Envelope,
}

impl ImageTile {
    pub fn new(image: RgbaImage, envelope: Envelope) -> Self {
        Self { image, envelope }
    }
}

impl Tile for ImageTile {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn as_image(&self) -> Result<RgbaImage> {
        Ok(self.image.clone())
    }

    fn as_encoded_bytes(&self, format: &str) -> Result<Vec<u8>> {
        encode_image(&self.image, parse_image_format(format)?)
    }
}
