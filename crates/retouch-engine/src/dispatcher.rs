use std::sync::Arc;
use std::time::Duration;

use retouch_contracts::state::ResultPayload;

use crate::config::EngineConfig;
use crate::errors::{classify, DispatchError, ErrorKind, ProviderError};
use crate::normalize::normalize_for_upload;
use crate::providers::{ImageProvider, ProviderRequest};

pub const ANATOMY_LOCK: &str = "[PROTECTED ANATOMY]\n\
Keep identity 100% intact. Do not change jawline, eye shape, or nose structure.\n\
Only apply lighting, background changes, or textures as requested.";
pub const CAMERA_LOCK: &str = "Maintain original camera perspective and shadows.";
pub const DEFAULT_ANALYZE_INSTRUCTION: &str = "Describe the image.";
pub const NO_TEXT_PLACEHOLDER: &str = "No response received.";
pub const NO_IMAGE_MESSAGE: &str = "No image generated. The request may have been blocked.";

/// The text actually sent for an edit call.
pub fn wrap_edit_instruction(instruction: &str) -> String {
    format!("TASK: {instruction}\n\n{ANATOMY_LOCK}\n\n{CAMERA_LOCK}")
}

/// Routes one image to the provider's edit or analyze call.
#[derive(Clone)]
pub struct Dispatcher {
    provider: Arc<dyn ImageProvider>,
    analyze_model: String,
    edit_model: String,
    max_dimension: u32,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn ImageProvider>, config: &EngineConfig) -> Self {
        Self {
            provider,
            analyze_model: config.analyze_model.clone(),
            edit_model: config.edit_model.clone(),
            max_dimension: config.max_dimension,
            request_timeout: config.request_timeout,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn requires_credential(&self) -> bool {
        self.provider.requires_credential()
    }

    /// Never panics and never returns an unclassified failure.
    pub fn dispatch(
        &self,
        image: &[u8],
        instruction: &str,
        is_edit: bool,
        api_key: Option<&str>,
    ) -> Result<ResultPayload, DispatchError> {
        if self.provider.requires_credential() && api_key.map_or(true, |key| key.trim().is_empty())
        {
            return Err(classify(&ProviderError::missing_credential()));
        }
        let normalized = normalize_for_upload(image, self.max_dimension)
            .map_err(|err| DispatchError::new(ErrorKind::InvalidInput, format!("{err:#}")))?;

        let mut request = ProviderRequest {
            model: String::new(),
            instruction: String::new(),
            image: normalized,
            api_key: api_key.map(str::to_string),
            timeout: self.request_timeout,
        };
        if is_edit {
            request.model = self.edit_model.clone();
            request.instruction = wrap_edit_instruction(instruction);
            let generated = self.provider.edit(&request).map_err(DispatchError::from)?;
            let image = generated
                .ok_or_else(|| DispatchError::new(ErrorKind::Unknown, NO_IMAGE_MESSAGE))?;
            Ok(ResultPayload::Image {
                bytes: Arc::from(image.bytes),
                mime_type: image.mime_type,
            })
        } else {
            request.model = self.analyze_model.clone();
            request.instruction = if instruction.trim().is_empty() {
                DEFAULT_ANALYZE_INSTRUCTION.to_string()
            } else {
                instruction.to_string()
            };
            let text = self.provider.analyze(&request).map_err(DispatchError::from)?;
            Ok(ResultPayload::Text(
                text.unwrap_or_else(|| NO_TEXT_PLACEHOLDER.to_string()),
            ))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use image::{Rgba, RgbaImage};
    use retouch_contracts::state::ResultPayload;

    use super::{
        wrap_edit_instruction, Dispatcher, ANATOMY_LOCK, CAMERA_LOCK, NO_IMAGE_MESSAGE,
        NO_TEXT_PLACEHOLDER,
    };
    use crate::config::EngineConfig;
    use crate::errors::{ErrorKind, ProviderError};
    use crate::providers::{GeneratedImage, ImageProvider, ProviderRequest};

    pub(crate) type Scripted = Result<Option<Vec<u8>>, ProviderError>;

    /// Replays canned replies in call order and remembers what it was sent.
    #[derive(Default)]
    pub(crate) struct ScriptedProvider {
        pub(crate) replies: Mutex<VecDeque<Scripted>>,
        pub(crate) seen: Mutex<Vec<ProviderRequest>>,
        pub(crate) credential_free: bool,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: Vec<Scripted>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
                credential_free: true,
            }
        }

        fn next(&self, request: &ProviderRequest) -> Scripted {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .unwrap_or(Ok(Some(b"default".to_vec())))
        }

        pub(crate) fn calls(&self) -> usize {
            self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
        }
    }

    impl ImageProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn requires_credential(&self) -> bool {
            !self.credential_free
        }

        fn analyze(&self, request: &ProviderRequest) -> Result<Option<String>, ProviderError> {
            self.next(request)
                .map(|reply| reply.map(|bytes| String::from_utf8_lossy(&bytes).to_string()))
        }

        fn edit(&self, request: &ProviderRequest) -> Result<Option<GeneratedImage>, ProviderError> {
            self.next(request).map(|reply| {
                reply.map(|bytes| GeneratedImage {
                    bytes,
                    mime_type: "image/png".to_string(),
                })
            })
        }
    }

    pub(crate) fn sample_png() -> Vec<u8> {
        let image = RgbaImage::from_pixel(2, 2, Rgba([90, 90, 90, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        let _ = image.write_to(&mut bytes, image::ImageFormat::Png);
        bytes.into_inner()
    }

    fn dispatcher(provider: Arc<ScriptedProvider>) -> Dispatcher {
        Dispatcher::new(provider, &EngineConfig::default())
    }

    #[test]
    fn edit_wraps_instruction_and_uses_edit_model() -> anyhow::Result<()> {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Some(b"img".to_vec()))]));
        let result = dispatcher(provider.clone()).dispatch(&sample_png(), "add a hat", true, None)?;
        assert!(matches!(result, ResultPayload::Image { .. }));

        let seen = provider.seen.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen[0].model, "gemini-2.5-flash-image");
        assert!(seen[0].instruction.starts_with("TASK: add a hat"));
        assert!(seen[0].instruction.contains(ANATOMY_LOCK));
        assert!(seen[0].instruction.ends_with(CAMERA_LOCK));
        assert_eq!(seen[0].image.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn edit_without_image_data_is_unknown() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(None)]));
        let err = dispatcher(provider).dispatch(&sample_png(), "x", true, None).err();
        assert_eq!(err.as_ref().map(|err| err.kind), Some(ErrorKind::Unknown));
        assert_eq!(err.map(|err| err.message).as_deref(), Some(NO_IMAGE_MESSAGE));
    }

    #[test]
    fn analyze_defaults_instruction_and_placeholder() -> anyhow::Result<()> {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(None)]));
        let result = dispatcher(provider.clone()).dispatch(&sample_png(), "  ", false, None)?;
        assert_eq!(result, ResultPayload::Text(NO_TEXT_PLACEHOLDER.to_string()));
        let seen = provider.seen.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen[0].instruction, "Describe the image.");
        assert_eq!(seen[0].model, "gemini-3-flash-preview");
        Ok(())
    }

    #[test]
    fn provider_failures_are_classified() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::new("quota").with_http_status(429)
        )]));
        let err = dispatcher(provider).dispatch(&sample_png(), "x", true, None).err();
        assert_eq!(err.map(|err| err.kind), Some(ErrorKind::RateLimited));
    }

    #[test]
    fn undecodable_input_is_invalid_and_never_sent() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let err = dispatcher(provider.clone()).dispatch(b"junk", "x", true, None).err();
        assert_eq!(err.map(|err| err.kind), Some(ErrorKind::InvalidInput));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn credential_is_checked_before_calling() {
        let provider = Arc::new(ScriptedProvider {
            credential_free: false,
            ..ScriptedProvider::default()
        });
        let err = dispatcher(provider.clone()).dispatch(&sample_png(), "x", true, Some(" ")).err();
        assert_eq!(err.map(|err| err.kind), Some(ErrorKind::MissingCredential));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn edit_wrapper_layout() {
        let wrapped = wrap_edit_instruction("warm light");
        assert_eq!(wrapped.lines().next(), Some("TASK: warm light"));
        assert!(wrapped.contains("Keep identity 100% intact."));
    }
}
