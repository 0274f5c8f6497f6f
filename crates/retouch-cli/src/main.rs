use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retouch_contracts::chat::{help_lines, parse_command_line, SessionCommand};
use retouch_contracts::events::EventWriter;
use retouch_contracts::prompt::{compile_state, PresetCatalog};
use retouch_contracts::session::Session;
use retouch_contracts::state::{
    AdjustmentKey, AppMode, AppState, CosmeticField, EntryOutcome, StateEvent,
};
use retouch_engine::batch::BatchProgress;
use retouch_engine::config::{api_key_from_env, ConcurrencyPolicy, EngineConfig};
use retouch_engine::export::ExportFormat;
use retouch_engine::{StudioEngine, SubmitReport};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "Prompt-driven photo retouching")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the instruction the controls compile to.
    Compile(CompileArgs),
    /// List the preset catalog.
    Presets(PresetsArgs),
    /// Submit a batch of images once and export the results.
    Run(RunArgs),
    /// Interactive slash-command session with undo/redo.
    Session(SessionArgs),
}

#[derive(Debug, Clone, Args)]
struct ControlArgs {
    #[arg(long)]
    prompt: Option<String>,
    /// Preset name; replaces --prompt.
    #[arg(long)]
    preset: Option<String>,
    #[arg(long, default_value = "creative")]
    mode: String,
    /// `key=value`, e.g. `brightness=10`.
    #[arg(long = "adjust")]
    adjust: Vec<String>,
    /// `field=style`, e.g. `lipstick=Zartes Rosa`.
    #[arg(long = "makeup")]
    makeup: Vec<String>,
    /// Allow the clothing to change.
    #[arg(long)]
    restyle: bool,
}

#[derive(Debug, Args)]
struct CompileArgs {
    #[command(flatten)]
    controls: ControlArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct PresetsArgs {
    #[arg(long)]
    mode: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct EngineArgs {
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-call deadline in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    max_dimension: Option<u32>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    quality: Option<u8>,
    #[command(flatten)]
    controls: ControlArgs,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Compile(args) => run_compile(args),
        Command::Presets(args) => run_presets(args),
        Command::Run(args) => run_batch(args),
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
    }
}

fn run_compile(args: CompileArgs) -> Result<i32> {
    let catalog = PresetCatalog::builtin()?;
    let mut session = Session::new(16);
    for event in control_events(&args.controls, &catalog)? {
        session.apply(event)?;
    }
    let compiled = compile_state(session.state());
    if args.json {
        let payload = json!({
            "instruction": compiled.instruction,
            "is_edit": compiled.is_edit,
            "has_structured_settings": compiled.has_structured_settings,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", compiled.instruction);
        println!(
            "-- {} request",
            if compiled.is_edit { "edit" } else { "analyze" }
        );
    }
    Ok(0)
}

fn run_presets(args: PresetsArgs) -> Result<i32> {
    let catalog = PresetCatalog::builtin()?;
    let modes = match args.mode.as_deref() {
        Some(raw) => vec![parse_mode(raw)?],
        None => vec![AppMode::Beauty, AppMode::Creative],
    };
    for mode in modes {
        println!("[{}]", mode.as_str());
        for (category, presets) in catalog.categories(mode) {
            println!("  {category}");
            for preset in presets {
                println!("    - {}", preset.name);
            }
        }
    }
    Ok(0)
}

fn run_batch(args: RunArgs) -> Result<i32> {
    let format = ExportFormat::parse(args.format.as_deref(), args.quality)?;
    let mut engine = open_engine(&args.engine, &args.out)?;
    let result = run_batch_inner(&mut engine, &args, format);
    engine.finish()?;
    result
}

fn run_batch_inner(engine: &mut StudioEngine, args: &RunArgs, format: ExportFormat) -> Result<i32> {
    engine.upload_paths(&args.images)?;
    let events = control_events(&args.controls, engine.presets())?;
    for event in events {
        engine.apply(event)?;
    }

    let report = engine.submit(print_progress)?;
    let exported = engine.export(&args.out, format)?;
    engine.write_summary(&args.out.join("summary.json"), &exported)?;
    for (index, path) in &exported {
        println!("[{}] {}", index + 1, path.display());
    }
    Ok(match report {
        SubmitReport::Completed { failed: 0, .. } => 0,
        SubmitReport::Completed { failed, .. } => {
            eprintln!("{failed} image(s) failed");
            2
        }
        SubmitReport::Aborted { message, .. } => {
            eprintln!("{message}");
            3
        }
        SubmitReport::Blocked { message } => {
            eprintln!("{message}");
            1
        }
    })
}

fn run_session(args: SessionArgs) -> Result<()> {
    let mut engine = open_engine(&args.engine, &args.out)?;
    let result = session_loop(&mut engine);
    engine.finish()?;
    result
}

fn session_loop(engine: &mut StudioEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    println!(
        "Retouch session started ({}). Type /help for commands.",
        engine.provider_name()
    );
    if !engine.has_credential() && engine.provider_name() != "dryrun" {
        println!("No API key found. Set GEMINI_API_KEY or use --provider dryrun.");
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let command = parse_command_line(line.trim_end_matches(['\n', '\r']));
        match handle_command(engine, command) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn handle_command(engine: &mut StudioEngine, command: SessionCommand) -> Result<Flow> {
    match command {
        SessionCommand::Noop => {}
        SessionCommand::Help => {
            for line in help_lines() {
                println!("{line}");
            }
        }
        SessionCommand::Quit => return Ok(Flow::Quit),
        SessionCommand::Upload(paths) => {
            let paths: Vec<PathBuf> = paths.into_iter().map(PathBuf::from).collect();
            engine.upload_paths(&paths)?;
            println!("{} image(s) loaded", engine.state().images.len());
        }
        SessionCommand::Remove(index) => {
            engine.apply(StateEvent::ImageRemoved(index))?;
        }
        SessionCommand::Crop { index, rect } => {
            engine.crop(index, rect)?;
            println!("Cropped image {}", index + 1);
        }
        SessionCommand::SetPrompt(text) => {
            engine.apply(StateEvent::PromptChanged(text))?;
        }
        SessionCommand::Preset(name) => {
            engine.apply_preset(&name)?;
            println!("Prompt: {}", engine.state().prompt);
        }
        SessionCommand::Adjust { key, value } => {
            engine.apply(StateEvent::AdjustmentChanged(key, value))?;
        }
        SessionCommand::Makeup { field, style } => {
            engine.apply(StateEvent::CosmeticChanged(field, style))?;
        }
        SessionCommand::ResetAdjustments => {
            engine.apply(StateEvent::AdjustmentsReset)?;
        }
        SessionCommand::ResetMakeup => {
            engine.apply(StateEvent::CosmeticsReset)?;
        }
        SessionCommand::Mode(mode) => {
            engine.apply(StateEvent::ModeChanged(mode))?;
            println!("Mode: {}", mode.as_str());
        }
        SessionCommand::Clothing { keep } => {
            engine.apply(StateEvent::ClothingToggled(keep))?;
        }
        SessionCommand::Submit => match engine.submit(print_progress)? {
            SubmitReport::Completed { resolved, failed } => {
                println!("Done: {resolved} resolved, {failed} failed");
            }
            SubmitReport::Aborted { message, .. } | SubmitReport::Blocked { message } => {
                println!("{message}");
            }
        },
        SessionCommand::Retry(index) => {
            let outcome = engine.retry(index)?;
            println!("[{}] {}", index + 1, describe_outcome(&outcome));
        }
        SessionCommand::UseResult(index) => {
            engine.use_result(index)?;
            println!("Result {} is now the source image", index + 1);
        }
        SessionCommand::Export {
            dir,
            format,
            quality,
        } => {
            let format = ExportFormat::parse(format.as_deref(), quality)?;
            let written = engine.export(Path::new(&dir), format)?;
            for (index, path) in written {
                println!("[{}] {}", index + 1, path.display());
            }
        }
        SessionCommand::Undo => {
            if !engine.undo()? {
                println!("Nothing to undo");
            }
        }
        SessionCommand::Redo => {
            if !engine.redo()? {
                println!("Nothing to redo");
            }
        }
        SessionCommand::Reset => {
            engine.reset()?;
            println!("Session reset");
        }
        SessionCommand::Status => {
            for line in status_lines(engine.state()) {
                println!("{line}");
            }
            let history = engine.session().history();
            println!(
                "history {}/{} (undo: {}, redo: {})",
                history.position().map(|at| at + 1).unwrap_or(0),
                history.len(),
                history.can_undo(),
                history.can_redo()
            );
            if !engine.credential_valid() {
                println!("credential: invalid");
            }
        }
        SessionCommand::Compile => {
            let compiled = engine.compile();
            println!("{}", compiled.instruction);
            println!(
                "-- {} request",
                if compiled.is_edit { "edit" } else { "analyze" }
            );
        }
        SessionCommand::Presets => {
            let mode = engine.state().mode;
            for (category, presets) in engine.presets().categories(mode) {
                let names: Vec<&str> = presets.iter().map(|preset| preset.name.as_str()).collect();
                println!("{category}: {}", names.join(", "));
            }
        }
        SessionCommand::Invalid { command, reason } => {
            println!("/{command}: {reason}");
        }
        SessionCommand::Unknown { command, .. } => {
            println!("Unknown command /{command}. Type /help for commands.");
        }
    }
    Ok(Flow::Continue)
}

fn open_engine(args: &EngineArgs, out: &Path) -> Result<StudioEngine> {
    std::fs::create_dir_all(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    let session_id = out
        .file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("retouch-session")
        .to_string();
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| out.join("events.jsonl"));
    let events = EventWriter::new(events_path, session_id);
    StudioEngine::with_provider_name(
        engine_config(args),
        &args.provider,
        events,
        api_key_from_env(),
    )
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(limit) = args.concurrency {
        config.concurrency = ConcurrencyPolicy::from_limit(limit.clamp(1, 8));
    }
    if let Some(seconds) = args.timeout {
        config.request_timeout = Duration::from_secs(seconds.clamp(5, 600));
    }
    if let Some(max_dimension) = args.max_dimension {
        config.max_dimension = max_dimension.clamp(64, 4096);
    }
    config
}

/// Turns the control flags into the state events a user would have produced.
/// The mode is applied first so a preset resolves against it.
fn control_events(args: &ControlArgs, catalog: &PresetCatalog) -> Result<Vec<StateEvent>> {
    let mode = parse_mode(&args.mode)?;
    let mut events = vec![StateEvent::ModeChanged(mode)];
    if let Some(name) = &args.preset {
        let preset = catalog
            .find(mode, name)
            .ok_or_else(|| anyhow!("no preset named '{name}' in {} mode", mode.as_str()))?;
        events.push(StateEvent::PresetApplied(preset.prompt.clone()));
    } else if let Some(prompt) = &args.prompt {
        events.push(StateEvent::PromptChanged(prompt.clone()));
    }
    for raw in &args.adjust {
        let (key, value) = split_pair(raw, "--adjust")?;
        let key = AdjustmentKey::from_str(key)?;
        let value = value
            .parse::<i32>()
            .with_context(|| format!("--adjust {raw}: '{value}' is not a whole number"))?;
        events.push(StateEvent::AdjustmentChanged(key, value));
    }
    for raw in &args.makeup {
        let (field, style) = split_pair(raw, "--makeup")?;
        let field = CosmeticField::from_str(field)?;
        events.push(StateEvent::CosmeticChanged(field, Some(style.to_string())));
    }
    if args.restyle {
        events.push(StateEvent::ClothingToggled(false));
    }
    Ok(events)
}

fn split_pair<'a>(raw: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("{flag} expects key=value, got '{raw}'");
    };
    Ok((key.trim(), value.trim()))
}

fn parse_mode(raw: &str) -> Result<AppMode> {
    AppMode::parse(raw).ok_or_else(|| anyhow!("unknown mode '{raw}' (use beauty or creative)"))
}

fn print_progress(progress: &BatchProgress) {
    match progress {
        BatchProgress::Started { index, total } => {
            println!("Processing image {} of {total}...", index + 1);
        }
        BatchProgress::Resolved { index, payload, .. } => {
            println!("[{}] done ({})", index + 1, payload.kind());
        }
        BatchProgress::Failed { index, error, .. } => {
            println!("[{}] failed: {}", index + 1, error.message);
        }
        BatchProgress::Aborted { index, error } => {
            println!("[{}] aborted: {}", index + 1, error.message);
        }
    }
}

fn describe_outcome(outcome: &EntryOutcome) -> String {
    match outcome {
        EntryOutcome::Pending => "pending".to_string(),
        EntryOutcome::Resolved(payload) => format!("done ({})", payload.kind()),
        EntryOutcome::Failed(message) => format!("failed: {message}"),
    }
}

fn status_lines(state: &AppState) -> Vec<String> {
    let mut lines = vec![format!(
        "mode {} | clothing {} | {} image(s)",
        state.mode.as_str(),
        if state.keep_clothing { "kept" } else { "restyled" },
        state.images.len()
    )];
    if !state.prompt.is_empty() {
        lines.push(format!("prompt: {}", state.prompt));
    }
    for (key, value) in state.adjustments.active() {
        lines.push(format!("adjust {key} = {value}"));
    }
    for (field, style) in state.cosmetics.active() {
        lines.push(format!("makeup {field} = {style}"));
    }
    for (index, image) in state.images.iter().enumerate() {
        let status = state
            .results
            .get(index)
            .map(|entry| describe_outcome(&entry.outcome))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!("[{}] {} {status}", index + 1, image.name));
    }
    lines
}
