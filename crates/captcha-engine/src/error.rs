//! Engine error types.

use crate::manual::ManualState;
use std::time::Duration;
use thiserror::Error;

/// Errors from building the engine or driving its operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(#[from] captcha_core::ConfigError),

    /// Document access or selector generation failed
    #[error("document error: {0}")]
    Dom(#[from] captcha_dom::DomError),

    /// Detector setup failed
    #[error("detection error: {0}")]
    Detect(#[from] captcha_detect::DetectError),

    /// Persistence failed
    #[error("store error: {0}")]
    Store(#[from] captcha_store::StoreError),

    /// The page context or session was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// A manual selection action is not valid in the current state
    #[error("cannot {action} while manual selection is {state}")]
    InvalidTransition {
        /// Current state
        state: ManualState,
        /// Attempted action
        action: &'static str,
    },

    /// The manual selection session ran past its deadline
    #[error("manual selection timed out")]
    SelectionTimedOut,

    /// Node handle does not belong to the page
    #[error("node is not part of this page")]
    UnknownNode,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a resolution attempt failed.
///
/// Every variant except [`ResolutionFailure::Cancelled`] counts as a failed
/// attempt on the locator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionFailure {
    /// The locator's selector no longer matches exactly one node
    #[error("selector '{selector}' matched {matches} nodes")]
    SelectorAmbiguous {
        /// The selector
        selector: String,
        /// Nodes matched
        matches: usize,
    },

    /// The challenge image could not be captured
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// Capturing the image took too long
    #[error("capture timed out after {0:?}")]
    CaptureTimeout(Duration),

    /// The recognizer reported an error
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    /// The recognizer took too long
    #[error("recognition timed out after {0:?}")]
    RecognitionTimeout(Duration),

    /// The recognizer was not confident enough
    #[error("recognition confidence {confidence:.2} below minimum {minimum:.2}")]
    LowConfidence {
        /// Reported confidence
        confidence: f64,
        /// Configured minimum
        minimum: f64,
    },

    /// The page context was cancelled
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolutionFailure {
    /// Whether the failure counts against the locator.
    #[must_use]
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
