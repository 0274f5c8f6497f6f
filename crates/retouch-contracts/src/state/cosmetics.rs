use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CosmeticField {
    Lashes,
    Eyeliner,
    Lipstick,
    Eyeshadow,
    Blush,
    Skin,
}

impl CosmeticField {
    pub const ALL: [CosmeticField; 6] = [
        CosmeticField::Lashes,
        CosmeticField::Eyeliner,
        CosmeticField::Lipstick,
        CosmeticField::Eyeshadow,
        CosmeticField::Blush,
        CosmeticField::Skin,
    ];

    /// Order in which selections appear in the compiled prompt.
    pub const PROMPT_ORDER: [CosmeticField; 6] = [
        CosmeticField::Lipstick,
        CosmeticField::Eyeliner,
        CosmeticField::Lashes,
        CosmeticField::Eyeshadow,
        CosmeticField::Blush,
        CosmeticField::Skin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CosmeticField::Lashes => "lashes",
            CosmeticField::Eyeliner => "eyeliner",
            CosmeticField::Lipstick => "lipstick",
            CosmeticField::Eyeshadow => "eyeshadow",
            CosmeticField::Blush => "blush",
            CosmeticField::Skin => "skin",
        }
    }

    /// Label used in the `MAKEUP STYLE` clause.
    pub fn prompt_label(self) -> &'static str {
        match self {
            CosmeticField::Lashes => "Lashes",
            CosmeticField::Eyeliner => "Eyeliner",
            CosmeticField::Lipstick => "Lips",
            CosmeticField::Eyeshadow => "Eyeshadow",
            CosmeticField::Blush => "Blush",
            CosmeticField::Skin => "Complexion",
        }
    }

    /// The closed set of styles this field accepts.
    pub fn styles(self) -> &'static [&'static str] {
        match self {
            CosmeticField::Lashes => &[
                "Natürlich getuscht",
                "Volumen & Länge",
                "Definierte Wimpern",
                "Puppen-Wimpern",
            ],
            CosmeticField::Eyeliner => &[
                "Dezenter Lidstrich",
                "Klassischer Eyeliner",
                "Cat-Eye Wing",
                "Smudged Liner",
            ],
            CosmeticField::Lipstick => &[
                "Roter Lippenstift (Matt)",
                "Roter Lippenstift (Glossy)",
                "Nude Lippenstift",
                "Zartes Rosa",
                "Dunkle Beere",
                "Koralle",
            ],
            CosmeticField::Eyeshadow => &[
                "Champagner Gold",
                "Smokey Eyes Schwarz",
                "Sanftes Braun",
                "Rosé Gold",
                "Kupfer",
            ],
            CosmeticField::Blush => &[
                "Pfirsich Rouge",
                "Rosenholz Rouge",
                "Pink Rouge",
                "Bronzer",
            ],
            CosmeticField::Skin => &[
                "Matter Teint",
                "Glowy Skin",
                "Glass Skin",
                "Gebräunter Teint",
                "Porzellan Teint",
            ],
        }
    }

    /// Resolves user input to the canonical style label (case-insensitive).
    pub fn canonical_style(self, raw: &str) -> Option<&'static str> {
        let wanted = raw.trim().to_lowercase();
        self.styles()
            .iter()
            .copied()
            .find(|style| style.to_lowercase() == wanted)
    }
}

impl fmt::Display for CosmeticField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CosmeticField {
    type Err = StateError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let field = match raw.trim().to_ascii_lowercase().as_str() {
            "lashes" => CosmeticField::Lashes,
            "eyeliner" => CosmeticField::Eyeliner,
            "lipstick" | "lips" => CosmeticField::Lipstick,
            "eyeshadow" => CosmeticField::Eyeshadow,
            "blush" => CosmeticField::Blush,
            "skin" | "complexion" => CosmeticField::Skin,
            _ => return Err(StateError::UnknownCosmetic(raw.to_string())),
        };
        Ok(field)
    }
}

/// Categorical makeup choices. `None` leaves the feature untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmeticSelection {
    pub lashes: Option<String>,
    pub eyeliner: Option<String>,
    pub lipstick: Option<String>,
    pub eyeshadow: Option<String>,
    pub blush: Option<String>,
    pub skin: Option<String>,
}

impl CosmeticSelection {
    pub fn get(&self, field: CosmeticField) -> Option<&str> {
        let slot = match field {
            CosmeticField::Lashes => &self.lashes,
            CosmeticField::Eyeliner => &self.eyeliner,
            CosmeticField::Lipstick => &self.lipstick,
            CosmeticField::Eyeshadow => &self.eyeshadow,
            CosmeticField::Blush => &self.blush,
            CosmeticField::Skin => &self.skin,
        };
        slot.as_deref()
    }

    /// Returns a copy with `field` set. An empty or absent value clears it;
    /// anything else must name one of the field's styles.
    pub fn with(&self, field: CosmeticField, value: Option<&str>) -> Result<Self, StateError> {
        let resolved = match value.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => None,
            Some(raw) => Some(
                field
                    .canonical_style(raw)
                    .ok_or_else(|| StateError::CosmeticStyle {
                        field,
                        value: raw.to_string(),
                    })?
                    .to_string(),
            ),
        };
        let mut next = self.clone();
        let slot = match field {
            CosmeticField::Lashes => &mut next.lashes,
            CosmeticField::Eyeliner => &mut next.eyeliner,
            CosmeticField::Lipstick => &mut next.lipstick,
            CosmeticField::Eyeshadow => &mut next.eyeshadow,
            CosmeticField::Blush => &mut next.blush,
            CosmeticField::Skin => &mut next.skin,
        };
        *slot = resolved;
        Ok(next)
    }

    pub fn is_active(&self) -> bool {
        CosmeticField::ALL
            .iter()
            .any(|field| self.get(*field).is_some())
    }

    /// Active selections in prompt order.
    pub fn active(&self) -> impl Iterator<Item = (CosmeticField, &str)> + '_ {
        CosmeticField::PROMPT_ORDER
            .into_iter()
            .filter_map(|field| self.get(field).map(|value| (field, value)))
    }
}
