//! Captcha DOM - document snapshots and per-node analysis.
//!
//! This crate reads a parsed page and turns nodes into the inputs the
//! detectors need:
//!
//! - [`page`] - `Page` document handle with an optional layout map
//! - [`geometry`] - sizes and layout boxes
//! - [`features`] - `FeatureExtractor` producing `FeatureRecord`s
//! - [`volatility`] - detection of machine-generated ids and classes
//! - [`selector`] - unique, durable selector generation
//!
//! # Example
//!
//! ```rust
//! use captcha_core::SelectorConfig;
//! use captcha_dom::{Page, SelectorGenerator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let page = Page::parse(r#"<html><body><form><img id="captcha" width="120" height="40"></form></body></html>"#);
//! let img = page.resolve_unique("img")?;
//!
//! let generator = SelectorGenerator::new(SelectorConfig::default())?;
//! assert_eq!(generator.generate(&page, img)?.selector, "#captcha");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod features;
pub mod geometry;
pub mod page;
pub mod selector;
pub mod volatility;

/// Stable handle to a node within a [`Page`].
pub type NodeId = ego_tree::NodeId;

// Re-export commonly used types
pub use error::{DomError, Result};
pub use features::{FeatureExtractor, FeatureRecord, SizeHints};
pub use geometry::{Rect, Size};
pub use page::Page;
pub use scraper::ElementRef;
pub use selector::{GeneratedSelector, SelectorGenerator, SelectorStrategy};
pub use volatility::{RuleVolatility, VolatilityPredicate, VolatilityReason};
