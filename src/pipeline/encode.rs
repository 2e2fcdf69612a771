//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`, plus
//! decoding of uploaded images into the same shape as a rendered page.
//!
//! PNG is lossless; JPEG artefacts on rendered text degrade OCR accuracy.
//! `detail: "high"` asks GPT-4-class models for the full tile budget so fine
//! print and small tables survive.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page image as a base64 PNG ready for the VLM API.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Decode an uploaded image and shrink it so neither edge exceeds `max_pixels`.
pub fn load_image(data: &[u8], max_pixels: u32) -> Result<DynamicImage, image::ImageError> {
    let img = image::load_from_memory(data)?;
    if img.width() <= max_pixels && img.height() <= max_pixels {
        return Ok(img);
    }
    debug!(
        "Downscaling {}x{} image to fit {} px",
        img.width(),
        img.height(),
        max_pixels
    );
    Ok(img.resize(max_pixels, max_pixels, FilterType::Lanczos3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([0, 0, 255, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(b"\x89PNG"));
    }

    #[test]
    fn load_image_keeps_small_images() {
        let img = load_image(&png_bytes(40, 20), 100).unwrap();
        assert_eq!((img.width(), img.height()), (40, 20));
    }

    #[test]
    fn load_image_downscales_preserving_aspect() {
        let img = load_image(&png_bytes(400, 200), 100).unwrap();
        assert_eq!((img.width(), img.height()), (100, 50));
    }

    #[test]
    fn load_image_rejects_garbage() {
        assert!(load_image(b"definitely not an image", 100).is_err());
    }
}
