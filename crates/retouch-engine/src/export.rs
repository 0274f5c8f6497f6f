use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use retouch_contracts::state::ResultPayload;

use crate::normalize::flatten_on_white;

pub const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Jpeg { quality: u8 },
    Png,
}

impl ExportFormat {
    /// `jpeg`/`jpg` or `png`; quality only applies to JPEG and is clamped to
    /// 1..=100.
    pub fn parse(raw: Option<&str>, quality: Option<u8>) -> Result<Self> {
        let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY).clamp(1, 100);
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("jpeg") | Some("jpg") => Ok(ExportFormat::Jpeg { quality }),
            Some("png") => Ok(ExportFormat::Png),
            Some(other) => bail!("unsupported export format '{other}' (use jpeg or png)"),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Jpeg { .. } => "jpg",
            ExportFormat::Png => "png",
        }
    }
}

/// `edited-<stem>.<ext>` where every character of the stem outside ASCII
/// letters and digits becomes `_` and letters are lowercased.
pub fn export_file_name(original_name: &str, extension: &str) -> String {
    format!("edited-{}.{extension}", sanitized_stem(original_name))
}

fn sanitized_stem(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(original_name);
    stem.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn encode_image(bytes: &[u8], format: ExportFormat) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("result image decode failed")?;
    let mut out = Vec::new();
    match format {
        ExportFormat::Jpeg { quality } => {
            let flattened = flatten_on_white(&decoded.to_rgba8());
            let rgb = DynamicImage::ImageRgba8(flattened).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(rgb))
                .context("JPEG encode failed")?;
        }
        ExportFormat::Png => {
            let mut cursor = std::io::Cursor::new(&mut out);
            decoded
                .write_to(&mut cursor, ImageFormat::Png)
                .context("PNG encode failed")?;
        }
    }
    Ok(out)
}

/// Writes results of one export run into a directory. Two entries whose
/// names sanitize alike never overwrite each other: the later one gets its
/// 1-based entry number appended.
pub struct Exporter<'a> {
    dir: &'a Path,
    format: ExportFormat,
    taken: HashSet<String>,
}

impl<'a> Exporter<'a> {
    pub fn new(dir: &'a Path, format: ExportFormat) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self {
            dir,
            format,
            taken: HashSet::new(),
        })
    }

    /// Image results are re-encoded in the export format; text results
    /// become `.txt` files.
    pub fn write(
        &mut self,
        index: usize,
        original_name: &str,
        payload: &ResultPayload,
    ) -> Result<PathBuf> {
        let (extension, bytes) = match payload {
            ResultPayload::Image { bytes, .. } => {
                (self.format.extension(), encode_image(bytes, self.format)?)
            }
            ResultPayload::Text(text) => ("txt", text.as_bytes().to_vec()),
        };
        let path = self.dir.join(self.claim(index, original_name, extension));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    fn claim(&mut self, index: usize, original_name: &str, extension: &str) -> String {
        let stem = sanitized_stem(original_name);
        let mut name = format!("edited-{stem}.{extension}");
        let mut number = index + 1;
        while !self.taken.insert(name.clone()) {
            name = format!("edited-{stem}-{number}.{extension}");
            number += 1;
        }
        name
    }
}
