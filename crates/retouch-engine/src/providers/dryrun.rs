use std::io::Cursor;

use image::{ImageFormat, Rgb};
use sha2::{Digest, Sha256};

use super::{GeneratedImage, ImageProvider, ProviderRequest};
use crate::errors::ProviderError;

/// Offline provider. Edits tint the image with a colour derived from the
/// instruction; analysis reports what it was given.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn requires_credential(&self) -> bool {
        false
    }

    fn analyze(&self, request: &ProviderRequest) -> Result<Option<String>, ProviderError> {
        Ok(Some(format!(
            "dryrun analysis of a {}x{} image ({}, {} instruction chars, tag {})",
            request.image.width,
            request.image.height,
            request.model,
            request.instruction.chars().count(),
            short_id(&request.instruction),
        )))
    }

    fn edit(&self, request: &ProviderRequest) -> Result<Option<GeneratedImage>, ProviderError> {
        let decoded = image::load_from_memory(&request.image.bytes)
            .map_err(|err| ProviderError::new(format!("dryrun decode failed: {err}")))?;
        let (r, g, b) = color_from_prompt(&request.instruction);
        let mut rgb = decoded.to_rgb8();
        for pixel in rgb.pixels_mut() {
            let mix = |base: u8, tint: u8| ((u16::from(base) + u16::from(tint)) / 2) as u8;
            *pixel = Rgb([mix(pixel[0], r), mix(pixel[1], g), mix(pixel[2], b)]);
        }
        let mut out = Cursor::new(Vec::new());
        rgb.write_to(&mut out, ImageFormat::Png)
            .map_err(|err| ProviderError::new(format!("dryrun encode failed: {err}")))?;
        Ok(Some(GeneratedImage {
            bytes: out.into_inner(),
            mime_type: "image/png".to_string(),
        }))
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}
