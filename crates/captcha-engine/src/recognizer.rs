//! Recognition collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type returned by collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Text read from a challenge image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    /// Recognised answer
    pub text: String,
    /// Recognizer confidence in `0..=1`
    pub confidence: f64,
}

impl Recognition {
    /// Create a recognition result.
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Turns a captured challenge image into text.
///
/// Implementations may be slow or remote; the engine bounds every call with
/// the configured recognizer timeout.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognise the text in `image`.
    async fn recognize(&self, image: &[u8]) -> Result<Recognition, BoxError>;
}

/// Recognizer that always answers with the same text.
///
/// Useful for wiring tests and dry runs.
#[derive(Debug, Clone)]
pub struct FixedRecognizer {
    answer: Recognition,
}

impl FixedRecognizer {
    /// Answer every image with `text` at `confidence`.
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            answer: Recognition::new(text, confidence),
        }
    }
}

#[async_trait]
impl Recognizer for FixedRecognizer {
    async fn recognize(&self, _image: &[u8]) -> Result<Recognition, BoxError> {
        Ok(self.answer.clone())
    }
}
