//! Error types for document access and selector generation.

use thiserror::Error;

/// Errors raised while querying a page or generating selectors.
#[derive(Debug, Error)]
pub enum DomError {
    /// A selector string could not be parsed
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// The selector text
        selector: String,
        /// Parser message
        reason: String,
    },

    /// A selector matched zero or several nodes where exactly one was required
    #[error("selector '{selector}' matched {matches} nodes, expected exactly one")]
    SelectorAmbiguous {
        /// The selector text
        selector: String,
        /// Number of nodes matched
        matches: usize,
    },

    /// A volatility pattern could not be compiled
    #[error("invalid volatility pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern text
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// Node handle does not belong to this page
    #[error("node is not part of this page")]
    UnknownNode,
}

/// Result type for DOM operations.
pub type Result<T> = std::result::Result<T, DomError>;
