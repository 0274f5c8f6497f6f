use super::{
    AdjustmentKey, Adjustments, AppMode, AppState, BatchResultEntry, CosmeticField,
    CosmeticSelection, EntryOutcome, ImageItem, StateError,
};

/// A discrete mutation of [`AppState`].
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    ImagesAdded(Vec<ImageItem>),
    ImageRemoved(usize),
    ImageCropped { index: usize, image: ImageItem },
    PromptChanged(String),
    PresetApplied(String),
    AdjustmentChanged(AdjustmentKey, i32),
    AdjustmentsReset,
    CosmeticChanged(CosmeticField, Option<String>),
    CosmeticsReset,
    ModeChanged(AppMode),
    ClothingToggled(bool),
    BatchStarted(Vec<BatchResultEntry>),
    EntryUpdated { index: usize, outcome: EntryOutcome },
    BatchFinished(Vec<BatchResultEntry>),
    RetryFinished { index: usize, outcome: EntryOutcome },
    ResultPromoted { index: usize, image: ImageItem },
    Reset,
}

impl StateEvent {
    /// In-flight batch progress is transient; everything else lands in history.
    pub fn records_history(&self) -> bool {
        !matches!(
            self,
            StateEvent::BatchStarted(_) | StateEvent::EntryUpdated { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::ImagesAdded(_) => "images_added",
            StateEvent::ImageRemoved(_) => "image_removed",
            StateEvent::ImageCropped { .. } => "image_cropped",
            StateEvent::PromptChanged(_) => "prompt_changed",
            StateEvent::PresetApplied(_) => "preset_applied",
            StateEvent::AdjustmentChanged(..) => "adjustment_changed",
            StateEvent::AdjustmentsReset => "adjustments_reset",
            StateEvent::CosmeticChanged(..) => "cosmetic_changed",
            StateEvent::CosmeticsReset => "cosmetics_reset",
            StateEvent::ModeChanged(_) => "mode_changed",
            StateEvent::ClothingToggled(_) => "clothing_toggled",
            StateEvent::BatchStarted(_) => "batch_started",
            StateEvent::EntryUpdated { .. } => "entry_updated",
            StateEvent::BatchFinished(_) => "batch_finished",
            StateEvent::RetryFinished { .. } => "retry_finished",
            StateEvent::ResultPromoted { .. } => "result_promoted",
            StateEvent::Reset => "reset",
        }
    }
}

/// Applies `event` to `state`, producing the next state. Pure: `state` is
/// never modified and no side effects happen here.
pub fn reduce(state: &AppState, event: &StateEvent) -> Result<AppState, StateError> {
    let mut next = state.clone();
    match event {
        StateEvent::ImagesAdded(images) => {
            next.images.extend(images.iter().cloned());
            next.results.clear();
        }
        StateEvent::ImageRemoved(index) => {
            check_image_index(state, *index)?;
            next.images.remove(*index);
            if *index < next.results.len() {
                next.results.remove(*index);
            }
        }
        StateEvent::ImageCropped { index, image } => {
            check_image_index(state, *index)?;
            next.images[*index] = image.clone();
            if let Some(entry) = next.results.get_mut(*index) {
                entry.original = image.display.clone();
                entry.original_name = image.name.clone();
            }
        }
        StateEvent::PromptChanged(prompt) | StateEvent::PresetApplied(prompt) => {
            next.prompt = prompt.clone();
        }
        StateEvent::AdjustmentChanged(key, value) => {
            next.adjustments = state.adjustments.with(*key, *value)?;
        }
        StateEvent::AdjustmentsReset => {
            next.adjustments = Adjustments::default();
        }
        StateEvent::CosmeticChanged(field, value) => {
            next.cosmetics = state.cosmetics.with(*field, value.as_deref())?;
        }
        StateEvent::CosmeticsReset => {
            next.cosmetics = CosmeticSelection::default();
        }
        StateEvent::ModeChanged(mode) => {
            next.mode = *mode;
        }
        StateEvent::ClothingToggled(keep) => {
            next.keep_clothing = *keep;
        }
        StateEvent::BatchStarted(entries) | StateEvent::BatchFinished(entries) => {
            if entries.len() != state.images.len() {
                return Err(StateError::ResultCount {
                    expected: state.images.len(),
                    actual: entries.len(),
                });
            }
            next.results = entries.clone();
        }
        StateEvent::EntryUpdated { index, outcome }
        | StateEvent::RetryFinished { index, outcome } => {
            let len = next.results.len();
            let entry = next
                .results
                .get_mut(*index)
                .ok_or(StateError::ResultIndex { index: *index, len })?;
            entry.outcome = outcome.clone();
        }
        StateEvent::ResultPromoted { index, image } => {
            check_image_index(state, *index)?;
            let has_image = state
                .results
                .get(*index)
                .and_then(BatchResultEntry::result)
                .map(|payload| payload.kind() == "image")
                .unwrap_or(false);
            if !has_image {
                return Err(StateError::NoImageResult(*index));
            }
            next.images[*index] = image.clone();
            next.results[*index] = BatchResultEntry::pending(image);
            next.prompt.clear();
            next.adjustments = Adjustments::default();
            next.cosmetics = CosmeticSelection::default();
        }
        StateEvent::Reset => {
            next = AppState {
                mode: state.mode,
                ..AppState::default()
            };
        }
    }
    Ok(next)
}

fn check_image_index(state: &AppState, index: usize) -> Result<(), StateError> {
    if index >= state.images.len() {
        return Err(StateError::ImageIndex {
            index,
            len: state.images.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{reduce, StateEvent};
    use crate::images::DisplayRef;
    use crate::state::{
        AdjustmentKey, AppMode, AppState, BatchResultEntry, EntryOutcome, ImageItem,
        ResultPayload, StateError,
    };

    fn image(name: &str) -> ImageItem {
        ImageItem {
            raw: Some(Arc::from(name.as_bytes())),
            display: DisplayRef::new(format!("blob:test/{name}")),
            name: name.to_string(),
        }
    }

    fn with_images(names: &[&str]) -> AppState {
        AppState {
            images: names.iter().map(|name| image(name)).collect(),
            ..AppState::default()
        }
    }

    #[test]
    fn adding_images_clears_previous_results() -> Result<(), StateError> {
        let mut state = with_images(&["a.png"]);
        state.results = vec![BatchResultEntry::pending(&state.images[0])];
        let next = reduce(&state, &StateEvent::ImagesAdded(vec![image("b.png")]))?;
        assert_eq!(next.images.len(), 2);
        assert!(next.results.is_empty());
        assert_eq!(state.results.len(), 1);
        Ok(())
    }

    #[test]
    fn removing_an_image_keeps_results_index_aligned() -> Result<(), StateError> {
        let mut state = with_images(&["a.png", "b.png", "c.png"]);
        state.results = state.images.iter().map(BatchResultEntry::pending).collect();
        let next = reduce(&state, &StateEvent::ImageRemoved(1))?;
        let names: Vec<&str> = next.results.iter().map(|e| e.original_name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "c.png"]);
        Ok(())
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let state = with_images(&["a.png"]);
        assert_eq!(
            reduce(&state, &StateEvent::ImageRemoved(3)),
            Err(StateError::ImageIndex { index: 3, len: 1 })
        );
    }

    #[test]
    fn entry_update_requires_started_batch() {
        let state = with_images(&["a.png"]);
        let err = reduce(
            &state,
            &StateEvent::EntryUpdated {
                index: 0,
                outcome: EntryOutcome::Failed("boom".to_string()),
            },
        );
        assert_eq!(err, Err(StateError::ResultIndex { index: 0, len: 0 }));
    }

    #[test]
    fn promoting_a_result_resets_edit_controls() -> Result<(), StateError> {
        let mut state = with_images(&["a.png"]);
        state.prompt = "make it moody".to_string();
        state.adjustments = state.adjustments.with(AdjustmentKey::Contrast, 12)?;
        state.results = vec![BatchResultEntry {
            original: state.images[0].display.clone(),
            original_name: "a.png".to_string(),
            outcome: EntryOutcome::Resolved(ResultPayload::Image {
                bytes: Arc::from(&b"png"[..]),
                mime_type: "image/png".to_string(),
            }),
        }];
        let promoted = ImageItem {
            raw: None,
            display: DisplayRef::new("result:test/1"),
            name: "edited-a.png".to_string(),
        };
        let next = reduce(
            &state,
            &StateEvent::ResultPromoted {
                index: 0,
                image: promoted.clone(),
            },
        )?;
        assert_eq!(next.images[0], promoted);
        assert!(next.results[0].is_pending());
        assert_eq!(next.results[0].original_name, "edited-a.png");
        assert!(next.prompt.is_empty());
        assert!(!next.adjustments.is_active());
        Ok(())
    }

    #[test]
    fn promoting_a_text_result_is_rejected() {
        let mut state = with_images(&["a.png"]);
        state.results = vec![BatchResultEntry {
            original: state.images[0].display.clone(),
            original_name: "a.png".to_string(),
            outcome: EntryOutcome::Resolved(ResultPayload::Text("a portrait".to_string())),
        }];
        let err = reduce(
            &state,
            &StateEvent::ResultPromoted {
                index: 0,
                image: image("x.png"),
            },
        );
        assert_eq!(err, Err(StateError::NoImageResult(0)));
    }

    #[test]
    fn reset_keeps_mode_and_restores_clothing_default() -> Result<(), StateError> {
        let mut state = with_images(&["a.png"]);
        state.mode = AppMode::Beauty;
        state.keep_clothing = false;
        state.prompt = "x".to_string();
        let next = reduce(&state, &StateEvent::Reset)?;
        assert_eq!(next.mode, AppMode::Beauty);
        assert!(next.keep_clothing);
        assert!(next.images.is_empty());
        assert!(next.prompt.is_empty());
        Ok(())
    }

    #[test]
    fn batch_progress_is_not_recorded() {
        assert!(!StateEvent::BatchStarted(Vec::new()).records_history());
        assert!(StateEvent::BatchFinished(Vec::new()).records_history());
        assert!(StateEvent::Reset.records_history());
    }
}
