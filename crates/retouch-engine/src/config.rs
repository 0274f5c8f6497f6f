use std::time::Duration;

use crate::non_empty_env;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ANALYZE_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash-image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    Sequential,
    /// At most `n` calls in flight; results are still published in index
    /// order.
    Bounded(usize),
}

impl ConcurrencyPolicy {
    pub fn from_limit(limit: usize) -> Self {
        if limit <= 1 {
            ConcurrencyPolicy::Sequential
        } else {
            ConcurrencyPolicy::Bounded(limit)
        }
    }

    pub fn width(self) -> usize {
        match self {
            ConcurrencyPolicy::Sequential => 1,
            ConcurrencyPolicy::Bounded(limit) => limit.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub analyze_model: String,
    pub edit_model: String,
    pub request_timeout: Duration,
    pub max_dimension: u32,
    pub concurrency: ConcurrencyPolicy,
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            analyze_model: DEFAULT_ANALYZE_MODEL.to_string(),
            edit_model: DEFAULT_EDIT_MODEL.to_string(),
            request_timeout: Duration::from_secs(90),
            max_dimension: 1024,
            concurrency: ConcurrencyPolicy::Sequential,
            history_limit: 100,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| non_empty_env(key))
    }

    /// Builds a config from an arbitrary key lookup. Numeric values are
    /// clamped to their supported range; unparsable values fall back to the
    /// default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let api_base = lookup("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base);
        let number = |key: &str, default: u64, min: u64, max: u64| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .unwrap_or(default)
                .clamp(min, max)
        };
        Self {
            api_base,
            analyze_model: lookup("RETOUCH_ANALYZE_MODEL").unwrap_or(defaults.analyze_model),
            edit_model: lookup("RETOUCH_EDIT_MODEL").unwrap_or(defaults.edit_model),
            request_timeout: Duration::from_secs(number("RETOUCH_REQUEST_TIMEOUT", 90, 5, 600)),
            max_dimension: number("RETOUCH_MAX_DIMENSION", 1024, 64, 4096) as u32,
            concurrency: ConcurrencyPolicy::from_limit(
                number("RETOUCH_BATCH_CONCURRENCY", 1, 1, 8) as usize,
            ),
            history_limit: number("RETOUCH_HISTORY_LIMIT", 100, 2, 1000) as usize,
        }
    }
}

/// First non-empty credential among `GEMINI_API_KEY`, `GOOGLE_API_KEY` and
/// `API_KEY`.
pub fn api_key_from_env() -> Option<String> {
    api_key_from_lookup(|key| non_empty_env(key))
}

pub fn api_key_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"]
        .into_iter()
        .find_map(|key| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
}
