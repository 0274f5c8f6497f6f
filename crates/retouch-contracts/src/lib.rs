pub mod chat;
pub mod events;
pub mod history;
pub mod images;
pub mod prompt;
pub mod runs;
pub mod session;
pub mod state;
