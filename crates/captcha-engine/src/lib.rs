//! Captcha Engine - finding, remembering and resolving challenges.
//!
//! [`LocatorEngine`] ties the detection and storage crates together:
//!
//! - [`LocatorEngine::find_or_create_locator`] reuses a site's stored
//!   locator or scans the page for a new one
//! - [`LocatorEngine::resolve`] captures the challenge image and asks the
//!   [`Recognizer`], with results cached per image fingerprint
//! - [`LocatorEngine::visit`] runs lookup, scan and resolution as one visit
//! - [`LocatorEngine::begin_manual_selection`] lets a user point at the
//!   challenge directly
//!
//! A [`PageContext`] wraps one document: concurrent scans on it are
//! coalesced, and cancelling it aborts pending work without persisting a
//! partial locator.
//!
//! # Example
//!
//! ```rust
//! use captcha_core::{EngineConfig, SiteKey};
//! use captcha_dom::Page;
//! use captcha_engine::{FixedRecognizer, LocatorEngine, PageContext};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = LocatorEngine::builder(EngineConfig::default())
//!     .recognizer(Arc::new(FixedRecognizer::new("7XK2", 0.9)))
//!     .build()?;
//!
//! let ctx = PageContext::new(Page::parse(r#"<html><body><form>
//!     <input name="vcode">
//!     <img id="captcha" alt="verify code" width="120" height="40">
//! </form></body></html>"#));
//! let site = SiteKey::new("example.com")?;
//!
//! let locator = engine.find_or_create_locator(&site, &ctx).await?;
//! assert_eq!(locator.map(|l| l.selector), Some("#captcha".to_string()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod capture;
pub mod context;
pub mod engine;
pub mod error;
pub mod manual;
pub mod recognizer;

// Re-export commonly used types
pub use capture::{CaptureRequest, CapturedImage, ImageSource, StaticImageSource};
pub use context::PageContext;
pub use engine::{
    LocatorEngine, LocatorEngineBuilder, Resolution, ScanOutcome, VisitReport, VisitState,
};
pub use error::{EngineError, ResolutionFailure, Result};
pub use manual::{CancelReason, ManualSelection, ManualState, NoopCallbacks, SelectionCallbacks};
pub use recognizer::{BoxError, FixedRecognizer, Recognition, Recognizer};
