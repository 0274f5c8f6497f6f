use std::str::FromStr;

use super::command_registry::find_command;
use crate::state::{AdjustmentKey, AppMode, CosmeticField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Noop,
    Upload(Vec<String>),
    Remove(usize),
    Crop { index: usize, rect: CropRect },
    SetPrompt(String),
    Preset(String),
    Adjust { key: AdjustmentKey, value: i32 },
    Makeup { field: CosmeticField, style: Option<String> },
    ResetAdjustments,
    ResetMakeup,
    Mode(AppMode),
    Clothing { keep: bool },
    Submit,
    Retry(usize),
    UseResult(usize),
    Export {
        dir: String,
        format: Option<String>,
        quality: Option<u8>,
    },
    Undo,
    Redo,
    Reset,
    Status,
    Compile,
    Presets,
    Help,
    Quit,
    /// A known command with arguments that could not be understood.
    Invalid { command: String, reason: String },
    Unknown { command: String, arg: String },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// Image numbers are typed 1-based, as they are listed; the result is the
/// 0-based slot.
fn image_slot(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("image numbers start at 1".to_string()),
        Ok(number) => Ok(number - 1),
        Err(_) => Err(format!("'{raw}' is not an image number")),
    }
}

fn parse_index(arg: &str) -> Result<usize, String> {
    let parts = split_args(arg);
    match parts.as_slice() {
        [single] => image_slot(single),
        [] => Err("missing image number".to_string()),
        _ => Err("expected a single image number".to_string()),
    }
}

fn parse_crop(arg: &str) -> Result<SessionCommand, String> {
    let parts = split_args(arg);
    if parts.len() != 5 {
        return Err("expected <n> <x> <y> <width> <height>".to_string());
    }
    let index = image_slot(&parts[0])?;
    let mut numbers = [0u32; 4];
    for (slot, raw) in numbers.iter_mut().zip(&parts[1..]) {
        *slot = raw
            .parse::<u32>()
            .map_err(|_| format!("'{raw}' is not a pixel value"))?;
    }
    let [x, y, width, height] = numbers;
    if width == 0 || height == 0 {
        return Err("crop width and height must be positive".to_string());
    }
    Ok(SessionCommand::Crop {
        index,
        rect: CropRect {
            x,
            y,
            width,
            height,
        },
    })
}

fn parse_adjust(arg: &str) -> Result<SessionCommand, String> {
    let parts = split_args(arg);
    let [key, value] = parts.as_slice() else {
        return Err("expected <key> <value>".to_string());
    };
    let key = AdjustmentKey::from_str(key).map_err(|err| err.to_string())?;
    let value = value
        .parse::<i32>()
        .map_err(|_| format!("'{value}' is not a whole number"))?;
    Ok(SessionCommand::Adjust { key, value })
}

fn parse_makeup(arg: &str) -> Result<SessionCommand, String> {
    let parts = split_args(arg);
    let Some((field, rest)) = parts.split_first() else {
        return Err("expected <field> [style]".to_string());
    };
    let field = CosmeticField::from_str(field).map_err(|err| err.to_string())?;
    let style = rest.join(" ");
    let style = match style.to_ascii_lowercase().as_str() {
        "" | "none" | "off" | "-" => None,
        _ => Some(style),
    };
    Ok(SessionCommand::Makeup { field, style })
}

fn parse_clothing(arg: &str) -> Result<SessionCommand, String> {
    match arg.trim().to_ascii_lowercase().as_str() {
        "keep" | "on" | "true" | "yes" => Ok(SessionCommand::Clothing { keep: true }),
        "restyle" | "change" | "off" | "false" | "no" => {
            Ok(SessionCommand::Clothing { keep: false })
        }
        other => Err(format!("expected keep or restyle, got '{other}'")),
    }
}

fn parse_export(arg: &str) -> Result<SessionCommand, String> {
    let parts = split_args(arg);
    let Some((dir, rest)) = parts.split_first() else {
        return Err("missing output directory".to_string());
    };
    let mut format = None;
    let mut quality = None;
    for part in rest {
        if let Ok(value) = part.parse::<u8>() {
            if !(1..=100).contains(&value) {
                return Err(format!("quality must be within 1..=100, got {value}"));
            }
            quality = Some(value);
        } else {
            format = Some(part.to_ascii_lowercase());
        }
    }
    Ok(SessionCommand::Export {
        dir: dir.clone(),
        format,
        quality,
    })
}

fn parse_command(command: &str, arg: &str) -> Result<SessionCommand, String> {
    let parsed = match command {
        "upload" => {
            let paths = split_args(arg);
            if paths.is_empty() {
                return Err("expected at least one path".to_string());
            }
            SessionCommand::Upload(paths)
        }
        "remove" => SessionCommand::Remove(parse_index(arg)?),
        "crop" => parse_crop(arg)?,
        "prompt" => SessionCommand::SetPrompt(arg.to_string()),
        "preset" => {
            if arg.is_empty() {
                return Err("missing preset name".to_string());
            }
            SessionCommand::Preset(split_args(arg).join(" "))
        }
        "adjust" => parse_adjust(arg)?,
        "makeup" => parse_makeup(arg)?,
        "reset_adjustments" => SessionCommand::ResetAdjustments,
        "reset_makeup" => SessionCommand::ResetMakeup,
        "mode" => SessionCommand::Mode(
            AppMode::parse(arg).ok_or_else(|| format!("unknown mode '{arg}'"))?,
        ),
        "clothing" => parse_clothing(arg)?,
        "submit" => SessionCommand::Submit,
        "retry" => SessionCommand::Retry(parse_index(arg)?),
        "use" => SessionCommand::UseResult(parse_index(arg)?),
        "export" => parse_export(arg)?,
        "undo" => SessionCommand::Undo,
        "redo" => SessionCommand::Redo,
        "reset" => SessionCommand::Reset,
        "status" => SessionCommand::Status,
        "compile" => SessionCommand::Compile,
        "presets" => SessionCommand::Presets,
        "help" => SessionCommand::Help,
        "quit" => SessionCommand::Quit,
        other => return Err(format!("no handler for /{other}")),
    };
    Ok(parsed)
}

/// Parses one line of session input. Lines without a leading slash set the
/// prompt.
pub fn parse_command_line(text: &str) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if find_command(&command).is_none() {
                return SessionCommand::Unknown {
                    command,
                    arg: arg.to_string(),
                };
            }
            return match parse_command(&command, arg) {
                Ok(parsed) => parsed,
                Err(reason) => SessionCommand::Invalid { command, reason },
            };
        }
    }

    SessionCommand::SetPrompt(raw_trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{parse_command_line, CropRect, SessionCommand};
    use crate::state::{AdjustmentKey, AppMode, CosmeticField};

    #[test]
    fn bare_text_sets_the_prompt() {
        assert_eq!(
            parse_command_line("  make the sky purple "),
            SessionCommand::SetPrompt("make the sky purple".to_string())
        );
        assert_eq!(parse_command_line("   "), SessionCommand::Noop);
    }

    #[test]
    fn upload_accepts_quoted_paths() {
        assert_eq!(
            parse_command_line("/upload \"/tmp/a b.png\" c.jpg"),
            SessionCommand::Upload(vec!["/tmp/a b.png".to_string(), "c.jpg".to_string()])
        );
    }

    #[test]
    fn adjust_and_makeup_are_typed() {
        assert_eq!(
            parse_command_line("/adjust face-light -12"),
            SessionCommand::Adjust {
                key: AdjustmentKey::FaceLight,
                value: -12
            }
        );
        assert_eq!(
            parse_command_line("/makeup lips \"Nude Lippenstift\""),
            SessionCommand::Makeup {
                field: CosmeticField::Lipstick,
                style: Some("Nude Lippenstift".to_string())
            }
        );
        assert_eq!(
            parse_command_line("/makeup blush none"),
            SessionCommand::Makeup {
                field: CosmeticField::Blush,
                style: None
            }
        );
    }

    #[test]
    fn crop_needs_five_numbers() {
        assert_eq!(
            parse_command_line("/crop 1 10 20 300 400"),
            SessionCommand::Crop {
                index: 0,
                rect: CropRect {
                    x: 10,
                    y: 20,
                    width: 300,
                    height: 400
                }
            }
        );
        assert!(matches!(
            parse_command_line("/crop 0 10 20"),
            SessionCommand::Invalid { .. }
        ));
    }

    #[test]
    fn export_reads_format_and_quality_in_any_order() {
        assert_eq!(
            parse_command_line("/export out 80 PNG"),
            SessionCommand::Export {
                dir: "out".to_string(),
                format: Some("png".to_string()),
                quality: Some(80)
            }
        );
        assert!(matches!(
            parse_command_line("/export out 0"),
            SessionCommand::Invalid { .. }
        ));
    }

    #[test]
    fn mode_clothing_and_indices() {
        assert_eq!(
            parse_command_line("/mode Beauty"),
            SessionCommand::Mode(AppMode::Beauty)
        );
        assert_eq!(
            parse_command_line("/clothing restyle"),
            SessionCommand::Clothing { keep: false }
        );
        assert_eq!(parse_command_line("/retry 2"), SessionCommand::Retry(1));
        assert_eq!(parse_command_line("/use 1"), SessionCommand::UseResult(0));
        match parse_command_line("/remove x") {
            SessionCommand::Invalid { command, reason } => {
                assert_eq!(command, "remove");
                assert!(reason.contains("'x'"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn image_numbers_are_one_based() {
        assert_eq!(parse_command_line("/remove 3"), SessionCommand::Remove(2));
        for line in ["/retry 0", "/use 0", "/crop 0 1 1 5 5"] {
            match parse_command_line(line) {
                SessionCommand::Invalid { reason, .. } => {
                    assert_eq!(reason, "image numbers start at 1");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_commands_keep_their_argument() {
        assert_eq!(
            parse_command_line("/magic foo bar"),
            SessionCommand::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string()
            }
        );
        assert_eq!(parse_command_line("/quit"), SessionCommand::Quit);
    }
}
