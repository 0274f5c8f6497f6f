use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Adjustments, CosmeticSelection};
use crate::images::DisplayRef;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    Beauty,
    #[default]
    Creative,
}

impl AppMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AppMode::Beauty => "beauty",
            AppMode::Creative => "creative",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "beauty" => Some(AppMode::Beauty),
            "creative" => Some(AppMode::Creative),
            _ => None,
        }
    }
}

/// An image in the working set.
///
/// `raw` is absent when the image came out of a previous generation step;
/// the bytes then live only behind `display` in the registry.
#[derive(Clone, PartialEq)]
pub struct ImageItem {
    pub raw: Option<Arc<[u8]>>,
    pub display: DisplayRef,
    pub name: String,
}

impl fmt::Debug for ImageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageItem")
            .field("raw_len", &self.raw.as_ref().map(|bytes| bytes.len()))
            .field("display", &self.display)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub enum ResultPayload {
    Text(String),
    Image { bytes: Arc<[u8]>, mime_type: String },
}

impl ResultPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ResultPayload::Text(_) => "text",
            ResultPayload::Image { .. } => "image",
        }
    }
}

impl fmt::Debug for ResultPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultPayload::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ResultPayload::Image { bytes, mime_type } => f
                .debug_struct("Image")
                .field("len", &bytes.len())
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}

/// Result and error are exclusive; `Pending` means neither has arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EntryOutcome {
    #[default]
    Pending,
    Resolved(ResultPayload),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResultEntry {
    pub original: DisplayRef,
    pub original_name: String,
    pub outcome: EntryOutcome,
}

impl BatchResultEntry {
    pub fn pending(image: &ImageItem) -> Self {
        Self {
            original: image.display.clone(),
            original_name: image.name.clone(),
            outcome: EntryOutcome::Pending,
        }
    }

    pub fn result(&self) -> Option<&ResultPayload> {
        match &self.outcome {
            EntryOutcome::Resolved(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            EntryOutcome::Failed(message) => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, EntryOutcome::Pending)
    }

    pub fn status(&self) -> &'static str {
        match self.outcome {
            EntryOutcome::Pending => "pending",
            EntryOutcome::Resolved(_) => "resolved",
            EntryOutcome::Failed(_) => "failed",
        }
    }
}

/// Everything the user can edit, and everything a history snapshot captures.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub images: Vec<ImageItem>,
    pub results: Vec<BatchResultEntry>,
    pub prompt: String,
    pub adjustments: Adjustments,
    pub cosmetics: CosmeticSelection,
    pub mode: AppMode,
    pub keep_clothing: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            results: Vec::new(),
            prompt: String::new(),
            adjustments: Adjustments::default(),
            cosmetics: CosmeticSelection::default(),
            mode: AppMode::default(),
            keep_clothing: true,
        }
    }
}

impl AppState {
    /// Every display reference this state keeps alive, images first.
    pub fn display_refs(&self) -> Vec<DisplayRef> {
        self.images
            .iter()
            .map(|image| image.display.clone())
            .chain(self.results.iter().map(|entry| entry.original.clone()))
            .collect()
    }
}
