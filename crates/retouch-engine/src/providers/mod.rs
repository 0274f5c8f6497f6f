use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::normalize::NormalizedImage;

mod dryrun;
mod gemini;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub instruction: String,
    pub image: NormalizedImage,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// The external generative service. Implementations report failures as
/// [`ProviderError`] with as much structure as the transport gives them;
/// classification happens in the dispatcher.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn requires_credential(&self) -> bool {
        true
    }

    /// Image and text in, text out. `None` when the response carried no text.
    fn analyze(&self, request: &ProviderRequest) -> Result<Option<String>, ProviderError>;

    /// Image and text in, image out. `None` when the response carried no
    /// image data.
    fn edit(&self, request: &ProviderRequest) -> Result<Option<GeneratedImage>, ProviderError>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(api_base: &str) -> ImageProviderRegistry {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new(api_base));
    providers
}
