use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::StateError;

/// One of the eight technical sliders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKey {
    Structure,
    FaceLight,
    Brightness,
    Contrast,
    Saturation,
    Vibrance,
    Dodge,
    Burn,
}

impl AdjustmentKey {
    /// Slider order as presented to the user.
    pub const ALL: [AdjustmentKey; 8] = [
        AdjustmentKey::Structure,
        AdjustmentKey::FaceLight,
        AdjustmentKey::Brightness,
        AdjustmentKey::Contrast,
        AdjustmentKey::Saturation,
        AdjustmentKey::Vibrance,
        AdjustmentKey::Dodge,
        AdjustmentKey::Burn,
    ];

    /// Order in which active sliders are listed in the compiled prompt.
    pub const PROMPT_ORDER: [AdjustmentKey; 8] = [
        AdjustmentKey::Structure,
        AdjustmentKey::Brightness,
        AdjustmentKey::Contrast,
        AdjustmentKey::Saturation,
        AdjustmentKey::Vibrance,
        AdjustmentKey::FaceLight,
        AdjustmentKey::Dodge,
        AdjustmentKey::Burn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentKey::Structure => "structure",
            AdjustmentKey::FaceLight => "face_light",
            AdjustmentKey::Brightness => "brightness",
            AdjustmentKey::Contrast => "contrast",
            AdjustmentKey::Saturation => "saturation",
            AdjustmentKey::Vibrance => "vibrance",
            AdjustmentKey::Dodge => "dodge",
            AdjustmentKey::Burn => "burn",
        }
    }

    /// Inclusive bounds for the slider.
    pub fn range(self) -> (i32, i32) {
        match self {
            AdjustmentKey::Dodge | AdjustmentKey::Burn => (-10, 10),
            _ => (-50, 50),
        }
    }
}

impl fmt::Display for AdjustmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustmentKey {
    type Err = StateError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let key = match normalized.as_str() {
            "structure" | "detail" => AdjustmentKey::Structure,
            "face_light" | "facelight" => AdjustmentKey::FaceLight,
            "brightness" => AdjustmentKey::Brightness,
            "contrast" => AdjustmentKey::Contrast,
            "saturation" => AdjustmentKey::Saturation,
            "vibrance" => AdjustmentKey::Vibrance,
            "dodge" => AdjustmentKey::Dodge,
            "burn" => AdjustmentKey::Burn,
            _ => return Err(StateError::UnknownAdjustment(raw.to_string())),
        };
        Ok(key)
    }
}

/// Signed slider values. Zero means the slider has no effect on the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustments {
    pub structure: i32,
    pub face_light: i32,
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub vibrance: i32,
    pub dodge: i32,
    pub burn: i32,
}

impl Adjustments {
    pub fn get(&self, key: AdjustmentKey) -> i32 {
        match key {
            AdjustmentKey::Structure => self.structure,
            AdjustmentKey::FaceLight => self.face_light,
            AdjustmentKey::Brightness => self.brightness,
            AdjustmentKey::Contrast => self.contrast,
            AdjustmentKey::Saturation => self.saturation,
            AdjustmentKey::Vibrance => self.vibrance,
            AdjustmentKey::Dodge => self.dodge,
            AdjustmentKey::Burn => self.burn,
        }
    }

    /// Returns a copy with `key` set to `value`, rejecting values outside the
    /// slider's range.
    pub fn with(&self, key: AdjustmentKey, value: i32) -> Result<Self, StateError> {
        let (min, max) = key.range();
        if value < min || value > max {
            return Err(StateError::AdjustmentRange {
                key,
                value,
                min,
                max,
            });
        }
        let mut next = *self;
        let slot = match key {
            AdjustmentKey::Structure => &mut next.structure,
            AdjustmentKey::FaceLight => &mut next.face_light,
            AdjustmentKey::Brightness => &mut next.brightness,
            AdjustmentKey::Contrast => &mut next.contrast,
            AdjustmentKey::Saturation => &mut next.saturation,
            AdjustmentKey::Vibrance => &mut next.vibrance,
            AdjustmentKey::Dodge => &mut next.dodge,
            AdjustmentKey::Burn => &mut next.burn,
        };
        *slot = value;
        Ok(next)
    }

    pub fn is_active(&self) -> bool {
        AdjustmentKey::ALL.iter().any(|key| self.get(*key) != 0)
    }

    /// Active sliders in prompt order.
    pub fn active(&self) -> impl Iterator<Item = (AdjustmentKey, i32)> + '_ {
        AdjustmentKey::PROMPT_ORDER
            .into_iter()
            .map(|key| (key, self.get(key)))
            .filter(|(_, value)| *value != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::{AdjustmentKey, Adjustments};
    use crate::state::StateError;

    #[test]
    fn with_rejects_values_outside_slider_range() {
        let base = Adjustments::default();
        assert!(base.with(AdjustmentKey::Structure, 50).is_ok());
        assert_eq!(
            base.with(AdjustmentKey::Dodge, 11),
            Err(StateError::AdjustmentRange {
                key: AdjustmentKey::Dodge,
                value: 11,
                min: -10,
                max: 10,
            })
        );
    }

    #[test]
    fn with_leaves_original_untouched() -> Result<(), StateError> {
        let base = Adjustments::default();
        let next = base.with(AdjustmentKey::Burn, -4)?;
        assert_eq!(base.burn, 0);
        assert_eq!(next.burn, -4);
        assert!(next.is_active());
        assert!(!base.is_active());
        Ok(())
    }

    #[test]
    fn active_follows_prompt_order() -> Result<(), StateError> {
        let adjustments = Adjustments::default()
            .with(AdjustmentKey::FaceLight, 5)?
            .with(AdjustmentKey::Structure, -3)?
            .with(AdjustmentKey::Contrast, 8)?;
        let keys: Vec<AdjustmentKey> = adjustments.active().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec![
                AdjustmentKey::Structure,
                AdjustmentKey::Contrast,
                AdjustmentKey::FaceLight
            ]
        );
        Ok(())
    }

    #[test]
    fn key_parsing_accepts_common_spellings() {
        assert_eq!("faceLight".parse::<AdjustmentKey>(), Ok(AdjustmentKey::FaceLight));
        assert_eq!("face-light".parse::<AdjustmentKey>(), Ok(AdjustmentKey::FaceLight));
        assert!("exposure".parse::<AdjustmentKey>().is_err());
    }
}
