#[derive(Clone, Copy, Debug)]
pub struct CommandSpec {
    pub command: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const SESSION_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        usage: "/upload <path>...",
        summary: "add images to the working set",
    },
    CommandSpec {
        command: "remove",
        usage: "/remove <n>",
        summary: "drop an image and its result",
    },
    CommandSpec {
        command: "crop",
        usage: "/crop <n> <x> <y> <width> <height>",
        summary: "replace an image with a cropped copy",
    },
    CommandSpec {
        command: "prompt",
        usage: "/prompt <text>",
        summary: "set the free-text instruction",
    },
    CommandSpec {
        command: "preset",
        usage: "/preset <name>",
        summary: "use a preset prompt from the current mode",
    },
    CommandSpec {
        command: "adjust",
        usage: "/adjust <key> <value>",
        summary: "set a technical adjustment slider",
    },
    CommandSpec {
        command: "makeup",
        usage: "/makeup <field> [style]",
        summary: "pick a makeup style, or clear it",
    },
    CommandSpec {
        command: "reset_adjustments",
        usage: "/reset_adjustments",
        summary: "zero every slider",
    },
    CommandSpec {
        command: "reset_makeup",
        usage: "/reset_makeup",
        summary: "clear every makeup field",
    },
    CommandSpec {
        command: "mode",
        usage: "/mode beauty|creative",
        summary: "switch the preset catalog",
    },
    CommandSpec {
        command: "clothing",
        usage: "/clothing keep|restyle",
        summary: "keep or allow changing the subject's clothing",
    },
    CommandSpec {
        command: "submit",
        usage: "/submit",
        summary: "run the instruction over every image",
    },
    CommandSpec {
        command: "retry",
        usage: "/retry <n>",
        summary: "re-run a single image",
    },
    CommandSpec {
        command: "use",
        usage: "/use <n>",
        summary: "make a generated image the new source",
    },
    CommandSpec {
        command: "export",
        usage: "/export <dir> [jpeg|png] [quality]",
        summary: "write results to disk",
    },
    CommandSpec {
        command: "undo",
        usage: "/undo",
        summary: "step back one snapshot",
    },
    CommandSpec {
        command: "redo",
        usage: "/redo",
        summary: "step forward one snapshot",
    },
    CommandSpec {
        command: "reset",
        usage: "/reset",
        summary: "clear everything except the mode",
    },
    CommandSpec {
        command: "status",
        usage: "/status",
        summary: "show images, results and settings",
    },
    CommandSpec {
        command: "compile",
        usage: "/compile",
        summary: "show the instruction that would be sent",
    },
    CommandSpec {
        command: "presets",
        usage: "/presets",
        summary: "list presets for the current mode",
    },
    CommandSpec {
        command: "help",
        usage: "/help",
        summary: "list commands",
    },
    CommandSpec {
        command: "quit",
        usage: "/quit",
        summary: "end the session",
    },
];

pub fn find_command(command: &str) -> Option<&'static CommandSpec> {
    SESSION_COMMANDS.iter().find(|spec| spec.command == command)
}

pub fn help_lines() -> Vec<String> {
    let width = SESSION_COMMANDS
        .iter()
        .map(|spec| spec.usage.len())
        .max()
        .unwrap_or(0);
    SESSION_COMMANDS
        .iter()
        .map(|spec| format!("{:width$}  {}", spec.usage, spec.summary))
        .collect()
}
