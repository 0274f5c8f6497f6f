use std::sync::Arc;

use serde_json::Value;
use similar::TextDiff;
use thiserror::Error;

use crate::events::EventPayload;
use crate::history::{HistoryManager, RecordOutcome};
use crate::images::{DisplayRef, ImageRegistry};
use crate::prompt::PresetCatalog;
use crate::state::{
    reduce, AppState, BatchResultEntry, EntryOutcome, ImageItem, ResultPayload, StateError,
    StateEvent,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("Please upload at least one image.")]
    NoImages,

    #[error("Please enter a prompt or choose an adjustment.")]
    NothingToSubmit,

    #[error("no preset named '{0}' in this mode")]
    UnknownPreset(String),

    #[error("image {0} is no longer available")]
    ImageUnavailable(usize),
}

/// Bytes handed to a dispatch, kept alive by a registry hold until
/// [`Session::finish_batch`] or [`Session::finish_retry`] lets go.
#[derive(Debug, Clone)]
pub struct DispatchInput {
    pub index: usize,
    pub display: DisplayRef,
    pub name: String,
    pub bytes: Arc<[u8]>,
}

/// What a single state change did to history.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub event: &'static str,
    pub recorded: bool,
    pub discarded: usize,
    pub prompt_diff: Option<Vec<String>>,
}

impl Transition {
    pub fn to_payload(&self) -> EventPayload {
        let mut payload = EventPayload::new();
        payload.insert("event".to_string(), Value::String(self.event.to_string()));
        payload.insert("recorded".to_string(), Value::Bool(self.recorded));
        payload.insert("discarded".to_string(), Value::from(self.discarded as u64));
        if let Some(diff) = &self.prompt_diff {
            payload.insert(
                "prompt_diff".to_string(),
                Value::Array(diff.iter().cloned().map(Value::String).collect()),
            );
        }
        payload
    }
}

/// The working state, its undo history, and the registry that keeps image
/// references alive for both.
///
/// Every state installed here goes through [`Session::commit`], which takes a
/// registry count for each reference the new state holds before giving up
/// the counts of the state it replaces. History snapshots hold their own
/// counts, so a reference dropped by the current state stays alive until no
/// snapshot needs it either.
#[derive(Debug)]
pub struct Session {
    state: AppState,
    history: HistoryManager<AppState>,
    registry: ImageRegistry,
}

impl Session {
    pub fn new(history_limit: usize) -> Self {
        let mut session = Self {
            state: AppState::default(),
            history: HistoryManager::new(history_limit),
            registry: ImageRegistry::new(),
        };
        session.record_current();
        session
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn history(&self) -> &HistoryManager<AppState> {
        &self.history
    }

    pub fn registry(&self) -> &ImageRegistry {
        &self.registry
    }

    /// Applies a user-driven change. Ends any restoration in progress first.
    pub fn apply(&mut self, event: StateEvent) -> Result<Transition, SessionError> {
        self.history.settle();
        let next = reduce(&self.state, &event)?;
        let prompt_diff = prompt_diff(&self.state.prompt, &next.prompt);
        self.commit(next);
        let (recorded, discarded) = if event.records_history() {
            self.record_current()
        } else {
            (false, 0)
        };
        Ok(Transition {
            event: event.name(),
            recorded,
            discarded,
            prompt_diff,
        })
    }

    pub fn upload(
        &mut self,
        files: Vec<(Vec<u8>, String)>,
    ) -> Result<Transition, SessionError> {
        let images: Vec<ImageItem> = files
            .into_iter()
            .map(|(bytes, name)| self.registry.acquire(bytes, name))
            .collect();
        let displays: Vec<DisplayRef> = images.iter().map(|image| image.display.clone()).collect();
        let outcome = self.apply(StateEvent::ImagesAdded(images));
        for display in &displays {
            self.registry.release(display);
        }
        outcome
    }

    pub fn crop(
        &mut self,
        index: usize,
        bytes: Vec<u8>,
        name: impl Into<String>,
    ) -> Result<Transition, SessionError> {
        let image = self.registry.acquire(bytes, name);
        let display = image.display.clone();
        let outcome = self.apply(StateEvent::ImageCropped { index, image });
        self.registry.release(&display);
        outcome
    }

    /// Makes the generated image at `index` the new source for that slot.
    pub fn promote_result(&mut self, index: usize) -> Result<Transition, SessionError> {
        let entry = self
            .state
            .results
            .get(index)
            .ok_or(StateError::ResultIndex {
                index,
                len: self.state.results.len(),
            })?;
        let Some(ResultPayload::Image { bytes, .. }) = entry.result() else {
            return Err(StateError::NoImageResult(index).into());
        };
        let name = format!("edited-{}", entry.original_name);
        let image = self.registry.adopt(bytes.clone(), name);
        let display = image.display.clone();
        let outcome = self.apply(StateEvent::ResultPromoted { index, image });
        self.registry.release(&display);
        outcome
    }

    pub fn apply_preset(
        &mut self,
        catalog: &PresetCatalog,
        name: &str,
    ) -> Result<Transition, SessionError> {
        let preset = catalog
            .find(self.state.mode, name)
            .ok_or_else(|| SessionError::UnknownPreset(name.to_string()))?;
        self.apply(StateEvent::PresetApplied(preset.prompt.clone()))
    }

    /// Rejects a submission that has nothing to work on. Leaves state alone.
    pub fn validate_submit(&self) -> Result<(), SessionError> {
        if self.state.images.is_empty() {
            return Err(SessionError::NoImages);
        }
        let structured = self.state.adjustments.is_active() || self.state.cosmetics.is_active();
        if self.state.prompt.trim().is_empty() && !structured {
            return Err(SessionError::NothingToSubmit);
        }
        Ok(())
    }

    /// Replaces the results with one pending entry per image and holds every
    /// input until the batch finishes.
    pub fn begin_batch(&mut self) -> Result<Vec<DispatchInput>, SessionError> {
        self.validate_submit()?;
        let inputs = (0..self.state.images.len())
            .map(|index| self.dispatch_input(index))
            .collect::<Result<Vec<_>, _>>()?;
        let pending = self
            .state
            .images
            .iter()
            .map(BatchResultEntry::pending)
            .collect();
        self.apply(StateEvent::BatchStarted(pending))?;
        self.hold(&inputs);
        Ok(inputs)
    }

    pub fn update_entry(
        &mut self,
        index: usize,
        outcome: EntryOutcome,
    ) -> Result<Transition, SessionError> {
        self.apply(StateEvent::EntryUpdated { index, outcome })
    }

    pub fn finish_batch(
        &mut self,
        outcomes: Vec<EntryOutcome>,
        inputs: &[DispatchInput],
    ) -> Result<Transition, SessionError> {
        let entries = self
            .state
            .results
            .iter()
            .zip(outcomes)
            .map(|(entry, outcome)| BatchResultEntry {
                outcome,
                ..entry.clone()
            })
            .collect();
        let outcome = self.apply(StateEvent::BatchFinished(entries));
        self.unhold(inputs);
        outcome
    }

    /// Marks entry `index` pending again and holds its input.
    pub fn begin_retry(&mut self, index: usize) -> Result<DispatchInput, SessionError> {
        let input = self.dispatch_input(index)?;
        self.apply(StateEvent::EntryUpdated {
            index,
            outcome: EntryOutcome::Pending,
        })?;
        self.hold(std::slice::from_ref(&input));
        Ok(input)
    }

    pub fn finish_retry(
        &mut self,
        input: &DispatchInput,
        outcome: EntryOutcome,
    ) -> Result<Transition, SessionError> {
        let result = self.apply(StateEvent::RetryFinished {
            index: input.index,
            outcome,
        });
        self.unhold(std::slice::from_ref(input));
        result
    }

    /// Steps back one snapshot. `None` when already at the oldest.
    pub fn undo(&mut self) -> Option<&AppState> {
        let snapshot = self.history.undo()?;
        self.restore(snapshot);
        Some(&self.state)
    }

    /// Steps forward one snapshot. `None` when already at the newest.
    pub fn redo(&mut self) -> Option<&AppState> {
        let snapshot = self.history.redo()?;
        self.restore(snapshot);
        Some(&self.state)
    }

    /// Drops history and revokes every reference still outstanding. Returns
    /// the number of revoked references.
    pub fn teardown(&mut self) -> usize {
        self.history.clear();
        self.state = AppState::default();
        self.registry.teardown()
    }

    fn restore(&mut self, snapshot: AppState) {
        self.commit(snapshot);
        // Suppressed by the restoring guard; the returned snapshot's counts
        // are given back.
        self.record_current();
    }

    fn commit(&mut self, next: AppState) {
        for display in next.display_refs() {
            self.registry.retain(&display);
        }
        let previous = std::mem::replace(&mut self.state, next);
        for display in previous.display_refs() {
            self.registry.release(&display);
        }
    }

    fn record_current(&mut self) -> (bool, usize) {
        let snapshot = self.state.clone();
        for display in snapshot.display_refs() {
            self.registry.retain(&display);
        }
        match self.history.record(snapshot) {
            RecordOutcome::Recorded { discarded } => {
                for dropped in &discarded {
                    for display in dropped.display_refs() {
                        self.registry.release(&display);
                    }
                }
                (true, discarded.len())
            }
            RecordOutcome::Suppressed(snapshot) => {
                for display in snapshot.display_refs() {
                    self.registry.release(&display);
                }
                (false, 0)
            }
        }
    }

    fn dispatch_input(&self, index: usize) -> Result<DispatchInput, SessionError> {
        let image = self.state.images.get(index).ok_or(StateError::ImageIndex {
            index,
            len: self.state.images.len(),
        })?;
        let bytes = image
            .raw
            .clone()
            .or_else(|| self.registry.resolve(&image.display))
            .ok_or(SessionError::ImageUnavailable(index))?;
        Ok(DispatchInput {
            index,
            display: image.display.clone(),
            name: image.name.clone(),
            bytes,
        })
    }

    fn hold(&mut self, inputs: &[DispatchInput]) {
        for input in inputs {
            self.registry.retain(&input.display);
        }
    }

    fn unhold(&mut self, inputs: &[DispatchInput]) {
        for input in inputs {
            self.registry.release(&input.display);
        }
    }
}

fn prompt_diff(prev: &str, curr: &str) -> Option<Vec<String>> {
    if prev == curr {
        return None;
    }
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Session, SessionError};
    use crate::prompt::PresetCatalog;
    use crate::state::{
        AdjustmentKey, AppMode, EntryOutcome, ResultPayload, StateError, StateEvent,
    };

    fn png_result(tag: &str) -> EntryOutcome {
        EntryOutcome::Resolved(ResultPayload::Image {
            bytes: Arc::from(tag.as_bytes()),
            mime_type: "image/png".to_string(),
        })
    }

    fn uploaded(names: &[&str]) -> anyhow::Result<Session> {
        let mut session = Session::new(100);
        session.upload(
            names
                .iter()
                .map(|name| (name.as_bytes().to_vec(), name.to_string()))
                .collect(),
        )?;
        Ok(session)
    }

    #[test]
    fn initial_state_is_the_first_snapshot() {
        let session = Session::new(10);
        assert_eq!(session.history().len(), 1);
        assert!(!session.history().can_undo());
    }

    #[test]
    fn upload_is_held_by_state_and_snapshot() -> anyhow::Result<()> {
        let session = uploaded(&["a.png"])?;
        let display = &session.state().images[0].display;
        assert_eq!(session.registry().holders(display), 2);
        assert_eq!(session.history().len(), 2);
        Ok(())
    }

    #[test]
    fn undo_restores_without_recording() -> anyhow::Result<()> {
        let mut session = uploaded(&["a.png"])?;
        session.apply(StateEvent::PromptChanged("warm light".to_string()))?;
        assert_eq!(session.history().len(), 3);

        let restored = session.undo().map(|state| state.prompt.clone());
        assert_eq!(restored.as_deref(), Some(""));
        assert_eq!(session.history().len(), 3);
        assert!(session.history().is_restoring());

        let transition = session.apply(StateEvent::PromptChanged("cool light".to_string()))?;
        assert!(transition.recorded);
        assert_eq!(transition.discarded, 1);
        assert!(!session.history().can_redo());
        Ok(())
    }

    #[test]
    fn prompt_changes_carry_a_diff() -> anyhow::Result<()> {
        let mut session = Session::new(10);
        let transition = session.apply(StateEvent::PromptChanged("beach".to_string()))?;
        let diff = transition.prompt_diff.unwrap_or_default();
        assert!(diff.iter().any(|line| line == "+beach"));
        let unchanged = session.apply(StateEvent::ModeChanged(AppMode::Beauty))?;
        assert!(unchanged.prompt_diff.is_none());
        Ok(())
    }

    #[test]
    fn removed_image_survives_while_history_holds_it() -> anyhow::Result<()> {
        let mut session = uploaded(&["a.png"])?;
        let display = session.state().images[0].display.clone();
        session.apply(StateEvent::ImageRemoved(0))?;
        assert!(session.registry().resolve(&display).is_some());
        assert_eq!(session.registry().stats().revoked, 0);

        session.undo();
        assert_eq!(session.state().images[0].display, display);
        Ok(())
    }

    #[test]
    fn history_eviction_revokes_unreachable_images() -> anyhow::Result<()> {
        let mut session = Session::new(2);
        session.upload(vec![(b"a".to_vec(), "a.png".to_string())])?;
        let display = session.state().images[0].display.clone();
        session.apply(StateEvent::Reset)?;
        assert!(session.registry().resolve(&display).is_some());
        session.apply(StateEvent::PromptChanged("x".to_string()))?;
        assert!(session.registry().resolve(&display).is_none());
        assert_eq!(session.registry().stats().revoked, 1);
        Ok(())
    }

    #[test]
    fn submit_validation_leaves_state_alone() -> anyhow::Result<()> {
        let mut session = Session::new(10);
        assert_eq!(session.begin_batch().err(), Some(SessionError::NoImages));

        let mut session = uploaded(&["a.png"])?;
        let before = session.state().clone();
        assert_eq!(
            session.begin_batch().err(),
            Some(SessionError::NothingToSubmit)
        );
        assert_eq!(session.state(), &before);

        session.apply(StateEvent::AdjustmentChanged(AdjustmentKey::Contrast, 5))?;
        assert!(session.validate_submit().is_ok());
        Ok(())
    }

    #[test]
    fn batch_progress_is_not_recorded_but_completion_is() -> anyhow::Result<()> {
        let mut session = uploaded(&["a.png", "b.png"])?;
        session.apply(StateEvent::PromptChanged("add a hat".to_string()))?;
        let before = session.history().len();

        let inputs = session.begin_batch()?;
        let display = inputs[0].display.clone();
        assert_eq!(session.registry().holders(&display), 5);
        session.update_entry(0, png_result("a"))?;
        assert_eq!(session.history().len(), before);

        let transition = session.finish_batch(
            vec![png_result("a"), EntryOutcome::Failed("boom".to_string())],
            &inputs,
        )?;
        assert!(transition.recorded);
        assert_eq!(session.history().len(), before + 1);
        assert_eq!(session.state().results[1].error_message(), Some("boom"));
        Ok(())
    }

    #[test]
    fn promote_replaces_source_and_clears_controls() -> anyhow::Result<()> {
        let mut session = uploaded(&["a.png"])?;
        session.apply(StateEvent::PromptChanged("add a hat".to_string()))?;
        let inputs = session.begin_batch()?;
        session.finish_batch(vec![png_result("generated")], &inputs)?;

        session.promote_result(0)?;
        let state = session.state();
        assert_eq!(state.images[0].name, "edited-a.png");
        assert!(state.images[0].raw.is_none());
        assert!(state.results[0].is_pending());
        assert!(state.prompt.is_empty());

        let retry = session.begin_retry(0)?;
        assert_eq!(&retry.bytes[..], b"generated");
        session.finish_retry(&retry, png_result("again"))?;
        Ok(())
    }

    #[test]
    fn promote_requires_an_image_result() -> anyhow::Result<()> {
        let mut session = uploaded(&["a.png"])?;
        session.apply(StateEvent::PromptChanged("what is this".to_string()))?;
        let inputs = session.begin_batch()?;
        session.finish_batch(
            vec![EntryOutcome::Resolved(ResultPayload::Text("a cat".to_string()))],
            &inputs,
        )?;
        assert_eq!(
            session.promote_result(0).err(),
            Some(SessionError::State(StateError::NoImageResult(0)))
        );
        Ok(())
    }

    #[test]
    fn presets_resolve_in_current_mode() -> anyhow::Result<()> {
        let catalog = PresetCatalog::builtin()?;
        let mut session = Session::new(10);
        session.apply_preset(&catalog, "Tropical Beach")?;
        assert!(session.state().prompt.contains("Sandstrand"));
        assert!(matches!(
            session.apply_preset(&catalog, "nope"),
            Err(SessionError::UnknownPreset(_))
        ));
        Ok(())
    }

    #[test]
    fn teardown_revokes_each_reference_once() -> anyhow::Result<()> {
        let mut session = uploaded(&["a.png", "b.png"])?;
        session.apply(StateEvent::ImageRemoved(0))?;
        assert_eq!(session.teardown(), 2);
        assert_eq!(session.registry().stats().revoked, 2);
        assert_eq!(session.teardown(), 0);
        Ok(())
    }
}
