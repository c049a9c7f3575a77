//! Image encoding: page bytes → base64 `ImageData` for the vision request.
//!
//! PNG and JPEG bytes are forwarded untouched under their sniffed MIME type.
//! Anything else the `image` crate can decode is re-encoded as PNG, which
//! every vision API accepts; lossless output keeps small print legible.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Wrap page image bytes for the vision API.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget; without
/// it fine print is downsampled away.
pub fn encode_page_bytes(bytes: &[u8]) -> Result<ImageData, image::ImageError> {
    let (payload, mime) = match image::guess_format(bytes)? {
        ImageFormat::Png => (STANDARD.encode(bytes), "image/png"),
        ImageFormat::Jpeg => (STANDARD.encode(bytes), "image/jpeg"),
        other => {
            debug!("Re-encoding {:?} page as PNG", other);
            let img = image::load_from_memory(bytes)?;
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
            (STANDARD.encode(&buf), "image/png")
        }
    };
    debug!("Encoded page → {} bytes base64 ({})", payload.len(), mime);
    Ok(ImageData::new(payload, mime).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn png_is_forwarded_as_is() {
        let bytes = png_bytes();
        let data = encode_page_bytes(&bytes).expect("png encodes");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn jpeg_keeps_its_mime_type() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 8, image::Rgb([9, 9, 9])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg).unwrap();
        assert_eq!(encode_page_bytes(&buf).unwrap().mime_type, "image/jpeg");
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert!(encode_page_bytes(b"definitely not an image").is_err());
    }
}
