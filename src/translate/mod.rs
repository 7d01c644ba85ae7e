// Translation client architecture
//
// The engine only sees the `Translator` trait; the concrete client
// (Gemini REST) lives in `gemini`, and the tag-integrity gate every
// implementation must pass lives in `integrity`.

pub mod gemini;
pub mod integrity;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiTranslator;

/// Outcome taxonomy for a single segment translation.
///
/// `Quota` is special: it never consumes retry budget and pauses the
/// whole engine until the caller resumes it.
#[derive(Error, Debug, Clone)]
pub enum TranslateError {
    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("blocked by safety filters: {0}")]
    SafetyBlocked(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("translated markup does not preserve the original tags")]
    IntegrityMismatch,

    #[error("transport error: {0}")]
    Transport(String),
}

impl TranslateError {
    pub fn is_quota(&self) -> bool {
        matches!(self, TranslateError::Quota(_))
    }
}

pub type TranslateResult<T> = std::result::Result<T, TranslateError>;

/// Main trait for translation operations
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate a markup fragment, preserving its tag structure.
    async fn translate(&self, markup: &str) -> TranslateResult<String>;
}
