mod compiler;
mod keywords;
mod presets;

pub use compiler::{
    compile, compile_state, CompiledPrompt, KEEP_CLOTHING_CLAUSE, RESTYLE_CLOTHING_CLAUSE,
};
pub use keywords::{mentions_edit_intent, EDIT_KEYWORDS};
pub use presets::{Preset, PresetCatalog};
