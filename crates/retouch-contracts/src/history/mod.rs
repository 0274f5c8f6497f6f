mod manager;

pub use manager::{HistoryManager, RecordOutcome};
