pub mod command_registry;
pub mod intent_parser;

pub use command_registry::{help_lines, CommandSpec, SESSION_COMMANDS};
pub use intent_parser::{parse_command_line, CropRect, SessionCommand};
