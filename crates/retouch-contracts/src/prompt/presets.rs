use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::AppMode;

const DEFAULT_PRESETS_JSON: &str = include_str!("../../resources/presets.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    beauty: IndexMap<String, Vec<Preset>>,
    #[serde(default)]
    creative: IndexMap<String, Vec<Preset>>,
}

/// Named prompt suggestions grouped by category, one catalog per mode.
/// Category and preset order follow the resource file.
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    beauty: IndexMap<String, Vec<Preset>>,
    creative: IndexMap<String, Vec<Preset>>,
}

impl PresetCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_json(DEFAULT_PRESETS_JSON).context("embedded preset catalog is malformed")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw).context("parse preset catalog")?;
        Ok(Self {
            beauty: file.beauty,
            creative: file.creative,
        })
    }

    pub fn categories(&self, mode: AppMode) -> &IndexMap<String, Vec<Preset>> {
        match mode {
            AppMode::Beauty => &self.beauty,
            AppMode::Creative => &self.creative,
        }
    }

    /// Looks up a preset by name within `mode`, case-insensitively.
    pub fn find(&self, mode: AppMode, name: &str) -> Option<&Preset> {
        let wanted = name.trim().to_lowercase();
        self.categories(mode)
            .values()
            .flatten()
            .find(|preset| preset.name.to_lowercase() == wanted)
    }

    pub fn len(&self, mode: AppMode) -> usize {
        self.categories(mode).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self, mode: AppMode) -> bool {
        self.len(mode) == 0
    }
}
