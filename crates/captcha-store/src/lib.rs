//! Captcha Store - persistence for locators and recognition results.
//!
//! # Architecture
//!
//! - **Backends**: anything implementing [`PersistenceStore`] (get, put,
//!   remove, prefix listing). [`MemoryStore`] and [`SqliteStore`] ship here.
//! - **Locators**: [`LocatorStore`] keeps one JSON [`Locator`] per site under
//!   `locator:{site}`.
//! - **Cache**: [`ResolutionCache`] keeps recognition results under
//!   `cache:{site}:{locator}:{image sha256}` with per-entry expiry.
//!
//! Store calls are bounded by a timeout; callers on the resolution path
//! treat store failures as best-effort.
//!
//! # Example
//!
//! ```rust
//! use captcha_core::{ChallengeType, SiteKey};
//! use captcha_store::{Locator, LocatorOrigin, LocatorStore, MemoryStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocatorStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(2));
//! let site = SiteKey::new("example.com")?;
//!
//! let locator = Locator::new(site.clone(), ChallengeType::Character, "#captcha", LocatorOrigin::Auto);
//! store.save(&locator).await?;
//! assert_eq!(store.get(&site).await?.map(|l| l.selector), Some("#captcha".to_string()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cache;
pub mod error;
pub mod locator;
pub mod locator_store;
pub mod sqlite;
pub mod store;

// Re-export commonly used types
pub use cache::{cache_key, fingerprint, CacheEntry, ResolutionCache};
pub use error::{Result, StoreError};
pub use locator::{Locator, LocatorFailure, LocatorOrigin};
pub use locator_store::LocatorStore;
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, PersistenceStore};
