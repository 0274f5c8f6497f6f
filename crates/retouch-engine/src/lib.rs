use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use retouch_contracts::chat::CropRect;
use retouch_contracts::events::{now_utc_iso, EventPayload, EventWriter};
use retouch_contracts::prompt::{compile_state, CompiledPrompt, PresetCatalog};
use retouch_contracts::runs::summary::{write_summary, BatchSummary};
use retouch_contracts::session::{Session, SessionError, Transition};
use retouch_contracts::state::{AppState, EntryOutcome, StateEvent};
use serde_json::{json, Map, Value};

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod export;
pub mod normalize;
pub mod providers;

use batch::{BatchOrchestrator, BatchProgress};
use config::EngineConfig;
use dispatcher::Dispatcher;
use errors::ErrorKind;
use export::{ExportFormat, Exporter};
use normalize::crop_image;
use providers::{default_provider_registry, ImageProvider};

const MISSING_CREDENTIAL_MESSAGE: &str = "API key missing. Please connect a key.";

/// How a submit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReport {
    /// Every entry was attempted.
    Completed { resolved: usize, failed: usize },
    /// An authentication-class failure stopped the batch at `index`.
    Aborted {
        index: usize,
        kind: ErrorKind,
        message: String,
    },
    /// Nothing was dispatched and state is unchanged.
    Blocked { message: String },
}

/// The working session plus everything needed to talk to a provider.
pub struct StudioEngine {
    config: EngineConfig,
    session: Session,
    orchestrator: BatchOrchestrator,
    events: EventWriter,
    presets: PresetCatalog,
    credential: Option<String>,
    credential_valid: bool,
    started_at: String,
    last_abort: Option<String>,
}

impl StudioEngine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn ImageProvider>,
        events: EventWriter,
        credential: Option<String>,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(provider, &config);
        let orchestrator = BatchOrchestrator::from_config(dispatcher, &config);
        let presets = PresetCatalog::builtin()?;
        let credential = credential
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let started_at = now_utc_iso();

        events.emit(
            "session_started",
            map_object(json!({
                "provider": orchestrator.dispatcher().provider_name(),
                "analyze_model": config.analyze_model,
                "edit_model": config.edit_model,
                "concurrency": config.concurrency.width(),
                "request_timeout_s": config.request_timeout.as_secs(),
                "history_limit": config.history_limit,
                "credential": credential.is_some(),
            })),
        )?;

        Ok(Self {
            session: Session::new(config.history_limit),
            config,
            orchestrator,
            events,
            presets,
            credential,
            credential_valid: true,
            started_at,
            last_abort: None,
        })
    }

    /// Looks `provider` up among the built-in providers.
    pub fn with_provider_name(
        config: EngineConfig,
        provider: &str,
        events: EventWriter,
        credential: Option<String>,
    ) -> Result<Self> {
        let providers = default_provider_registry(&config.api_base);
        let Some(selected) = providers.get(provider) else {
            bail!(
                "unknown provider '{provider}' (available: {})",
                providers.names().join(", ")
            );
        };
        Self::new(config, selected, events, credential)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        self.session.state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    pub fn provider_name(&self) -> &str {
        self.orchestrator.dispatcher().provider_name()
    }

    pub fn credential_valid(&self) -> bool {
        self.credential_valid
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Kind of the last authentication abort, cleared by the next
    /// successful batch or a new credential.
    pub fn last_abort(&self) -> Option<&str> {
        self.last_abort.as_deref()
    }

    /// Installs a new credential and clears any invalid mark.
    pub fn set_credential(&mut self, credential: Option<String>) {
        self.credential = credential
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self.credential_valid = true;
        self.last_abort = None;
    }

    pub fn compile(&self) -> CompiledPrompt {
        compile_state(self.session.state())
    }

    pub fn apply(&mut self, event: StateEvent) -> Result<Transition> {
        let transition = self.session.apply(event)?;
        self.note_transition(&transition)?;
        Ok(transition)
    }

    pub fn upload_bytes(&mut self, files: Vec<(Vec<u8>, String)>) -> Result<Transition> {
        let transition = self.session.upload(files)?;
        self.note_transition(&transition)?;
        Ok(transition)
    }

    pub fn upload_paths(&mut self, paths: &[PathBuf]) -> Result<Transition> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .and_then(|value| value.to_str())
                .unwrap_or("image")
                .to_string();
            files.push((bytes, name));
        }
        self.upload_bytes(files)
    }

    pub fn apply_preset(&mut self, name: &str) -> Result<Transition> {
        let transition = self.session.apply_preset(&self.presets, name)?;
        self.note_transition(&transition)?;
        Ok(transition)
    }

    /// Replaces image `index` with a cropped copy named `cropped-<name>`.
    pub fn crop(&mut self, index: usize, rect: CropRect) -> Result<Transition> {
        let state = self.session.state();
        let image = state.images.get(index).ok_or_else(|| {
            anyhow!(
                "image index {index} out of range ({} images)",
                state.images.len()
            )
        })?;
        let source = image
            .raw
            .clone()
            .or_else(|| self.session.registry().resolve(&image.display))
            .ok_or(SessionError::ImageUnavailable(index))?;
        let name = format!("cropped-{}", image.name);
        let cropped = crop_image(&source, rect)
            .with_context(|| format!("failed to crop image {index}"))?;
        let transition = self.session.crop(index, cropped, name)?;
        self.note_transition(&transition)?;
        Ok(transition)
    }

    pub fn use_result(&mut self, index: usize) -> Result<Transition> {
        let transition = self.session.promote_result(index)?;
        self.note_transition(&transition)?;
        Ok(transition)
    }

    pub fn reset(&mut self) -> Result<Transition> {
        self.apply(StateEvent::Reset)
    }

    /// Runs the current state through the provider, one entry per image.
    ///
    /// `observe` sees every progress event after the session has absorbed it.
    pub fn submit(&mut self, mut observe: impl FnMut(&BatchProgress)) -> Result<SubmitReport> {
        if let Some(message) = self.credential_block()? {
            return Ok(SubmitReport::Blocked { message });
        }
        if let Err(err) = self.session.validate_submit() {
            return Ok(SubmitReport::Blocked {
                message: err.to_string(),
            });
        }
        let compiled = compile_state(self.session.state());
        // Logged before the session takes its holds, so a failing log leaves
        // state untouched.
        self.events.emit(
            "batch_started",
            map_object(json!({
                "total": self.session.state().images.len(),
                "is_edit": compiled.is_edit,
                "structured": compiled.has_structured_settings,
                "instruction": compiled.instruction,
                "concurrency": self.orchestrator.policy().width(),
            })),
        )?;
        let inputs = match self.session.begin_batch() {
            Ok(inputs) => inputs,
            Err(err @ (SessionError::NoImages | SessionError::NothingToSubmit)) => {
                return Ok(SubmitReport::Blocked {
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let orchestrator = &self.orchestrator;
        let session = &mut self.session;
        let events = &self.events;
        let mut failure: Option<anyhow::Error> = None;
        let outcome = orchestrator.run(
            &inputs,
            &compiled.instruction,
            compiled.is_edit,
            self.credential.as_deref(),
            |progress| {
                if failure.is_none() {
                    if let Err(err) = absorb_progress(session, events, &progress) {
                        failure = Some(err);
                    }
                }
                observe(&progress);
            },
        );
        let finished = self.session.finish_batch(outcome.outcomes.clone(), &inputs);
        if let Some(error) = &outcome.aborted {
            self.invalidate_credential(error.kind);
        }
        if let Some(err) = failure {
            return Err(err);
        }
        self.note_transition(&finished?)?;

        let resolved = outcome.resolved();
        let failed = outcome.failed();
        let pending = outcome.outcomes.len() - resolved - failed;
        self.events.emit(
            "batch_finished",
            map_object(json!({
                "resolved": resolved,
                "failed": failed,
                "pending": pending,
                "aborted": outcome.aborted.as_ref().map(|error| error.kind.as_str()),
            })),
        )?;

        match outcome.aborted {
            Some(error) => {
                let index = outcome
                    .outcomes
                    .iter()
                    .position(|entry| *entry == EntryOutcome::Pending)
                    .unwrap_or(0);
                Ok(SubmitReport::Aborted {
                    index,
                    kind: error.kind,
                    message: error.message,
                })
            }
            None => {
                self.last_abort = None;
                Ok(SubmitReport::Completed { resolved, failed })
            }
        }
    }

    /// Re-dispatches entry `index` alone with the current instruction.
    ///
    /// Unlike a batch, an authentication failure is written into the entry;
    /// it still marks the credential invalid.
    pub fn retry(&mut self, index: usize) -> Result<EntryOutcome> {
        if let Some(message) = self.credential_block()? {
            bail!(message);
        }
        let compiled = compile_state(self.session.state());
        let input = self.session.begin_retry(index)?;
        let result = self.orchestrator.retry_one(
            &input,
            &compiled.instruction,
            compiled.is_edit,
            self.credential.as_deref(),
        );
        let (outcome, failure) = match result {
            Ok(payload) => (EntryOutcome::Resolved(payload), None),
            Err(error) => {
                if error.kind.aborts_batch() {
                    self.invalidate_credential(error.kind);
                }
                (EntryOutcome::Failed(error.message.clone()), Some(error))
            }
        };
        let transition = self.session.finish_retry(&input, outcome.clone())?;

        if let Some(error) = failure {
            self.events.emit(
                "image_failed",
                map_object(json!({
                    "index": index,
                    "kind": error.kind.as_str(),
                    "message": error.message,
                    "detail": error.detail,
                })),
            )?;
        }
        self.note_transition(&transition)?;
        self.events.emit(
            "retry_finished",
            map_object(json!({
                "index": index,
                "status": entry_status(&outcome),
            })),
        )?;
        Ok(outcome)
    }

    /// Writes every resolved entry into `dir`; returns `(index, path)` pairs.
    pub fn export(&self, dir: &Path, format: ExportFormat) -> Result<Vec<(usize, PathBuf)>> {
        let mut exporter = Exporter::new(dir, format)?;
        let mut written = Vec::new();
        for (index, entry) in self.session.state().results.iter().enumerate() {
            let Some(payload) = entry.result() else {
                continue;
            };
            let path = exporter
                .write(index, &entry.original_name, payload)
                .with_context(|| format!("failed to export result {index}"))?;
            self.events.emit(
                "export_written",
                map_object(json!({
                    "index": index,
                    "kind": payload.kind(),
                    "path": path.to_string_lossy().to_string(),
                })),
            )?;
            written.push((index, path));
        }
        Ok(written)
    }

    /// Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        let restored = self.session.undo().is_some();
        if restored {
            self.emit_history("history_undo")?;
        }
        Ok(restored)
    }

    pub fn redo(&mut self) -> Result<bool> {
        let restored = self.session.redo().is_some();
        if restored {
            self.emit_history("history_redo")?;
        }
        Ok(restored)
    }

    pub fn summary(&self, exported: &[(usize, PathBuf)]) -> BatchSummary {
        let exported: Vec<(usize, String)> = exported
            .iter()
            .map(|(index, path)| (*index, path.to_string_lossy().to_string()))
            .collect();
        BatchSummary::from_results(
            self.events.session_id(),
            self.started_at.clone(),
            &self.session.state().results,
            self.last_abort.clone(),
            &exported,
        )
    }

    pub fn write_summary(&self, path: &Path, exported: &[(usize, PathBuf)]) -> Result<()> {
        let extra = map_object(json!({
            "provider": self.provider_name(),
            "credential_valid": self.credential_valid,
        }));
        write_summary(path, &self.summary(exported), Some(&extra))
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Drops history and revokes every outstanding reference.
    pub fn finish(&mut self) -> Result<usize> {
        let revoked = self.session.teardown();
        let stats = self.session.registry().stats();
        self.events.emit(
            "session_finished",
            map_object(json!({
                "revoked": revoked,
                "acquired": stats.acquired,
                "adopted": stats.adopted,
                "live": stats.live,
            })),
        )?;
        Ok(revoked)
    }

    /// The user message that blocks a submission before anything changes:
    /// no credential at all, or one marked invalid by an earlier failure.
    fn credential_block(&self) -> Result<Option<String>> {
        if !self.orchestrator.dispatcher().requires_credential() {
            return Ok(None);
        }
        if self.credential.is_none() {
            self.events.emit(
                "credential_missing",
                map_object(json!({ "provider": self.provider_name() })),
            )?;
            return Ok(Some(MISSING_CREDENTIAL_MESSAGE.to_string()));
        }
        if !self.credential_valid {
            return Ok(Some(match self.last_abort.as_deref() {
                Some("missing_credential") => MISSING_CREDENTIAL_MESSAGE.to_string(),
                _ => "Access denied. Check the API key.".to_string(),
            }));
        }
        Ok(None)
    }

    fn invalidate_credential(&mut self, kind: ErrorKind) {
        self.credential_valid = false;
        self.last_abort = Some(kind.as_str().to_string());
    }

    fn note_transition(&self, transition: &Transition) -> Result<()> {
        if transition.recorded {
            let mut payload = transition.to_payload();
            payload.insert(
                "history_len".to_string(),
                Value::from(self.session.history().len() as u64),
            );
            self.events.emit("state_recorded", payload)?;
        }
        Ok(())
    }

    fn emit_history(&self, event_type: &str) -> Result<()> {
        let history = self.session.history();
        self.events.emit(
            event_type,
            map_object(json!({
                "position": history.position(),
                "len": history.len(),
                "can_undo": history.can_undo(),
                "can_redo": history.can_redo(),
            })),
        )?;
        Ok(())
    }
}

fn absorb_progress(
    session: &mut Session,
    events: &EventWriter,
    progress: &BatchProgress,
) -> Result<()> {
    match progress {
        BatchProgress::Started { index, total } => {
            let name = session
                .state()
                .images
                .get(*index)
                .map(|image| image.name.clone())
                .unwrap_or_default();
            events.emit(
                "image_started",
                map_object(json!({ "index": index, "total": total, "name": name })),
            )?;
        }
        BatchProgress::Resolved {
            index,
            total,
            payload,
        } => {
            session.update_entry(*index, EntryOutcome::Resolved(payload.clone()))?;
            events.emit(
                "image_resolved",
                map_object(json!({ "index": index, "total": total, "kind": payload.kind() })),
            )?;
        }
        BatchProgress::Failed {
            index,
            total,
            error,
        } => {
            session.update_entry(*index, EntryOutcome::Failed(error.message.clone()))?;
            events.emit(
                "image_failed",
                map_object(json!({
                    "index": index,
                    "total": total,
                    "kind": error.kind.as_str(),
                    "message": error.message,
                    "detail": truncate_text(&error.detail, 512),
                })),
            )?;
        }
        BatchProgress::Aborted { index, error } => {
            events.emit(
                "batch_aborted",
                map_object(json!({
                    "index": index,
                    "kind": error.kind.as_str(),
                    "message": error.message,
                })),
            )?;
        }
    }
    Ok(())
}

fn entry_status(outcome: &EntryOutcome) -> &'static str {
    match outcome {
        EntryOutcome::Pending => "pending",
        EntryOutcome::Resolved(_) => "resolved",
        EntryOutcome::Failed(_) => "failed",
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
