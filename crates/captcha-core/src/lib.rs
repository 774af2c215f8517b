//! Captcha Core - Foundation crate for the captcha locator engine.
//!
//! This crate provides shared types, error handling and configuration
//! management that all other captcha crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`SiteKey`, `LocatorId`, `ChallengeType`, `RelatedElement`, `Timestamp`)
//!
//! # Example
//!
//! ```rust
//! use captcha_core::{ChallengeType, EngineConfig, SiteKey};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! config.validate()?;
//!
//! let site = SiteKey::from_url("https://login.example.com/signin")?;
//! assert_eq!(site.as_str(), "login.example.com");
//! assert_eq!(ChallengeType::Character.to_string(), "character");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    CacheConfig, DetectionConfig, EngineConfig, FeatureConfig, LocatorConfig,
    ManualSelectionConfig, RelatedConfig, ResolutionConfig, ScanConfig, SelectorConfig,
    VolatilityRules,
};
pub use error::{ConfigError, ConfigResult, CoreError, Result};
pub use types::{ChallengeType, LocatorId, RelatedElement, RelatedRole, SiteKey, Timestamp};
