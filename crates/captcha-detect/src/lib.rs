//! Captcha Detect - scoring and scanning for challenge elements.
//!
//! This crate decides which node on a page is a challenge:
//!
//! - [`rules`] - weighted rule model (`Rule`, `RuleSet`, `ScoreDetail`)
//! - [`scorer`] - `RuleScorer`, applies a rule set to a feature record
//! - [`matcher`] - `Matcher` trait and the rule-backed `RuleMatcher`
//! - [`registry`] - ordered `MatcherRegistry`, one matcher per challenge type
//! - [`profiles`] - built-in rule sets for character, slide and click challenges
//! - [`loader`] - `RuleSetLoader` for TOML rule set files
//! - [`planner`] - `ScanPlanner`, three widening candidate passes
//! - [`related`] - discovery of inputs, refresh and submit controls
//!
//! # Example
//!
//! ```rust
//! use captcha_core::{ChallengeType, DetectionConfig, FeatureConfig, ScanConfig};
//! use captcha_detect::{MatcherRegistry, ScanPlanner};
//! use captcha_dom::{FeatureExtractor, Page, SizeHints};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let page = Page::parse(r#"<html><body><form>
//!     <input name="vcode">
//!     <img id="captcha123" alt="verify code" width="120" height="40">
//! </form></body></html>"#);
//!
//! let registry = MatcherRegistry::with_defaults(FeatureExtractor::default(), &DetectionConfig::default())?;
//! let planner = ScanPlanner::new(ScanConfig::default(), &FeatureConfig::default());
//!
//! let detection = planner.scan(&page, &registry, &SizeHints::new()).expect("challenge found");
//! assert_eq!(detection.result.challenge_type, ChallengeType::Character);
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
pub mod loader;
pub mod matcher;
pub mod planner;
pub mod profiles;
pub mod registry;
pub mod related;
pub mod rules;
pub mod scorer;

// Re-export commonly used types
pub use error::{DetectError, Result};
pub use loader::RuleSetLoader;
pub use matcher::{MatchResult, MatchTarget, Matcher, RuleMatcher};
pub use planner::{Candidate, Detection, ScanPass, ScanPlanner};
pub use registry::MatcherRegistry;
pub use related::{RelatedFinder, RelatedNodes};
pub use rules::{Band, MatchMode, Rule, RuleCheck, RuleSet, ScoreDetail};
pub use scorer::RuleScorer;
