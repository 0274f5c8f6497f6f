use crate::state::{AdjustmentKey, Adjustments, AppState, CosmeticSelection};

use super::keywords::mentions_edit_intent;

pub const KEEP_CLOTHING_CLAUSE: &str = "KEEP CLOTHING: Maintain the subject's original clothing, style, color, and fabric. Do not modify the garments.";
pub const RESTYLE_CLOTHING_CLAUSE: &str = "RESTYLE: You are encouraged to change the subject's clothing to match the requested scene or style.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPrompt {
    pub instruction: String,
    /// True when the request should produce an edited image rather than a
    /// description.
    pub is_edit: bool,
    /// True when any slider or makeup field is active.
    pub has_structured_settings: bool,
}

/// Merges the free text and the structured controls into one instruction.
///
/// Output layout: free text, a blank line, then one clause per line
/// (clothing, technical adjustments, makeup). The clothing clause is always
/// present.
pub fn compile(
    free_text: &str,
    keep_clothing: bool,
    adjustments: &Adjustments,
    cosmetics: &CosmeticSelection,
) -> CompiledPrompt {
    let mut clauses = Vec::with_capacity(3);
    clauses.push(
        if keep_clothing {
            KEEP_CLOTHING_CLAUSE
        } else {
            RESTYLE_CLOTHING_CLAUSE
        }
        .to_string(),
    );

    let adjustment_parts: Vec<String> = adjustments
        .active()
        .map(|(key, value)| describe_adjustment(key, value))
        .collect();
    if !adjustment_parts.is_empty() {
        clauses.push(format!(
            "TECHNICAL ADJUSTMENTS: {}.",
            adjustment_parts.join(", ")
        ));
    }

    let makeup_parts: Vec<String> = cosmetics
        .active()
        .map(|(field, value)| format!("{}: {value}", field.prompt_label()))
        .collect();
    if !makeup_parts.is_empty() {
        clauses.push(format!("MAKEUP STYLE: {}.", makeup_parts.join(", ")));
    }

    let clause_block = clauses.join("\n");
    let instruction = if free_text.is_empty() {
        clause_block
    } else {
        format!("{free_text}\n\n{clause_block}")
    };

    let has_structured_settings = adjustments.is_active() || cosmetics.is_active();
    CompiledPrompt {
        instruction,
        is_edit: has_structured_settings || mentions_edit_intent(free_text),
        has_structured_settings,
    }
}

pub fn compile_state(state: &AppState) -> CompiledPrompt {
    compile(
        &state.prompt,
        state.keep_clothing,
        &state.adjustments,
        &state.cosmetics,
    )
}

fn describe_adjustment(key: AdjustmentKey, value: i32) -> String {
    let magnitude = value.abs();
    match key {
        AdjustmentKey::Structure if value > 0 => {
            format!("DETAIL: Enhance texture by {magnitude}%")
        }
        AdjustmentKey::Structure => format!("SOFTEN: Smooth texture by {magnitude}%"),
        AdjustmentKey::Brightness => format!("BRIGHTNESS: {value:+}%"),
        AdjustmentKey::Contrast => format!("CONTRAST: {value:+}%"),
        AdjustmentKey::Saturation => format!("SATURATION: {value:+}%"),
        AdjustmentKey::Vibrance => format!("VIBRANCE: {value:+}%"),
        AdjustmentKey::FaceLight => {
            let direction = if value > 0 { "Lighten" } else { "Darken" };
            format!("FACE LIGHTING: {direction} face by {magnitude}%")
        }
        AdjustmentKey::Dodge if value > 0 => format!("DODGE: Boost highlights ({value:+})"),
        AdjustmentKey::Dodge => format!("DODGE: Tone down highlights ({value:+})"),
        AdjustmentKey::Burn if value > 0 => format!("BURN: Deepen shadows ({value:+})"),
        AdjustmentKey::Burn => format!("BURN: Lift shadows ({value:+})"),
    }
}
