mod adjustments;
mod app_state;
mod cosmetics;
mod error;
mod reducer;

pub use adjustments::{AdjustmentKey, Adjustments};
pub use app_state::{AppMode, AppState, BatchResultEntry, EntryOutcome, ImageItem, ResultPayload};
pub use cosmetics::{CosmeticField, CosmeticSelection};
pub use error::StateError;
pub use reducer::{reduce, StateEvent};
