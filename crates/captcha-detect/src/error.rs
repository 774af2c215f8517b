//! Error types for the detection subsystem.

use captcha_core::ChallengeType;
use thiserror::Error;

/// Errors that can occur while building or loading detectors.
#[derive(Error, Debug)]
pub enum DetectError {
    /// A rule set failed validation
    #[error("invalid rule set for {challenge_type}: {reason}")]
    InvalidRuleSet {
        /// Challenge type the rule set targets
        challenge_type: ChallengeType,
        /// Reason for validation failure
        reason: String,
    },

    /// A matcher for this challenge type is already registered
    #[error("a matcher for {0} is already registered")]
    DuplicateMatcher(ChallengeType),

    /// No rule set file exists for a challenge type
    #[error("rule set not found: {0}")]
    NotFound(ChallengeType),

    /// Failed to read a rule set file
    #[error("failed to load rule set from {path}: {source}")]
    LoadError {
        /// Path to the rule set file
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse rule set TOML
    #[error("failed to parse rule set TOML in {path}: {source}")]
    ParseError {
        /// Path to the rule set file
        path: String,
        /// TOML parse error
        #[source]
        source: toml::de::Error,
    },

    /// Rule set directory not found
    #[error("rule set directory not found at {path}")]
    DirectoryNotFound {
        /// Expected directory path
        path: String,
    },

    /// I/O error while accessing rule sets
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document access failed
    #[error(transparent)]
    Dom(#[from] captcha_dom::DomError),
}

/// Result type for detection operations.
pub type Result<T> = std::result::Result<T, DetectError>;
