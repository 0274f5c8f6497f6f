use std::io::Cursor;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use retouch_contracts::chat::CropRect;

/// An image ready for transmission: white background, bounded size, PNG.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Arc<[u8]>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Decodes `raw`, caps the longer side at `max_dim` (never upscaling),
/// flattens transparency onto white and re-encodes as PNG.
pub fn normalize_for_upload(raw: &[u8], max_dim: u32) -> Result<NormalizedImage> {
    let decoded = image::load_from_memory(raw).context("image decode failed")?;
    let flattened = flatten_on_white(&decoded.to_rgba8());
    let (width, height) = flattened.dimensions();
    let bound = max_dim.max(1);
    let image = if width > bound || height > bound {
        DynamicImage::ImageRgba8(flattened).resize(bound, bound, FilterType::Triangle)
    } else {
        DynamicImage::ImageRgba8(flattened)
    };
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let bytes = encode_png(&rgb)?;
    Ok(NormalizedImage {
        bytes: Arc::from(bytes),
        mime_type: "image/png",
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Cuts `rect` out of `raw`, clipped to the image bounds, as PNG.
pub fn crop_image(raw: &[u8], rect: CropRect) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(raw).context("image decode failed")?;
    let (width, height) = (decoded.width(), decoded.height());
    if rect.x >= width || rect.y >= height {
        bail!(
            "crop origin {}x{} lies outside the {width}x{height} image",
            rect.x,
            rect.y
        );
    }
    let crop_width = rect.width.min(width - rect.x);
    let crop_height = rect.height.min(height - rect.y);
    if crop_width == 0 || crop_height == 0 {
        bail!("crop rectangle is empty");
    }
    let cropped = decoded.crop_imm(rect.x, rect.y, crop_width, crop_height);
    encode_png(&cropped)
}

pub(crate) fn flatten_on_white(rgba: &RgbaImage) -> RgbaImage {
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    flattened
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, Rgba, RgbaImage};
    use retouch_contracts::chat::CropRect;

    use super::{crop_image, normalize_for_upload};

    fn png(width: u32, height: u32, pixel: Rgba<u8>) -> anyhow::Result<Vec<u8>> {
        let image = RgbaImage::from_pixel(width, height, pixel);
        let mut bytes = std::io::Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }

    #[test]
    fn large_images_are_capped_on_the_longer_side() -> anyhow::Result<()> {
        let raw = png(400, 200, Rgba([10, 20, 30, 255]))?;
        let normalized = normalize_for_upload(&raw, 100)?;
        assert_eq!((normalized.width, normalized.height), (100, 50));
        assert_eq!(normalized.mime_type, "image/png");
        assert_eq!(
            image::guess_format(&normalized.bytes)?,
            ImageFormat::Png
        );
        Ok(())
    }

    #[test]
    fn small_images_are_not_upscaled() -> anyhow::Result<()> {
        let raw = png(30, 60, Rgba([0, 0, 0, 255]))?;
        let normalized = normalize_for_upload(&raw, 1024)?;
        assert_eq!((normalized.width, normalized.height), (30, 60));
        Ok(())
    }

    #[test]
    fn transparency_becomes_white() -> anyhow::Result<()> {
        let raw = png(4, 4, Rgba([0, 0, 0, 0]))?;
        let normalized = normalize_for_upload(&raw, 1024)?;
        let decoded = image::load_from_memory(&normalized.bytes)?.to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        Ok(())
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(normalize_for_upload(b"not an image", 1024).is_err());
    }

    #[test]
    fn crop_is_clipped_to_bounds() -> anyhow::Result<()> {
        let raw = png(50, 40, Rgba([200, 0, 0, 255]))?;
        let cropped = crop_image(
            &raw,
            CropRect {
                x: 30,
                y: 10,
                width: 100,
                height: 10,
            },
        )?;
        let decoded = image::load_from_memory(&cropped)?;
        assert_eq!((decoded.width(), decoded.height()), (20, 10));

        let outside = CropRect {
            x: 60,
            y: 0,
            width: 5,
            height: 5,
        };
        assert!(crop_image(&raw, outside).is_err());
        Ok(())
    }
}
