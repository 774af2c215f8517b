//! Shared types used across the captcha locator engine.
//!
//! This module defines common newtypes and enums that provide type safety
//! and clear domain modeling.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// Newtype for site identities (origin host, optionally with a port).
///
/// Site keys are lowercase hostnames such as `login.example.com` or
/// `127.0.0.1:8080`. Locators are persisted under their site key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteKey(String);

impl SiteKey {
    /// Create a new `SiteKey` from a bare host string.
    ///
    /// # Errors
    /// Returns error if the key is empty, too long, or not a lowercase host.
    pub fn new(key: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Derive a `SiteKey` from a page URL.
    ///
    /// The host is used as-is (the URL parser lower-cases it); a port is
    /// appended only when it differs from the scheme's default.
    pub fn from_url(raw: &str) -> Result<Self, CoreError> {
        let parsed = url::Url::parse(raw)
            .map_err(|e| CoreError::Validation(format!("invalid URL '{raw}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CoreError::Validation(format!("URL has no host: '{raw}'")))?;

        let key = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Self::new(key)
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), CoreError> {
        static HOST_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = HOST_REGEX.get_or_init(|| {
            Regex::new(
                r"^(?:[a-z0-9](?:[a-z0-9.\-]*[a-z0-9])?|\[[0-9a-f:.]+\])(?::[0-9]{1,5})?$",
            )
            .expect("valid regex")
        });

        if key.is_empty() || key.len() > 253 {
            return Err(CoreError::Validation(format!(
                "invalid site key: must be 1-253 characters, got {} characters",
                key.len()
            )));
        }

        if regex.is_match(key) {
            Ok(())
        } else {
            Err(CoreError::Validation(format!(
                "invalid site key: must be a lowercase host with optional port, got '{key}'"
            )))
        }
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SiteKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SiteKey> for String {
    fn from(key: SiteKey) -> Self {
        key.0
    }
}

/// Newtype for locator identifiers (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocatorId(String);

impl LocatorId {
    /// Create a new random `LocatorId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID.
    pub fn parse(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        uuid::Uuid::parse_str(&id)
            .map_err(|e| CoreError::Validation(format!("invalid locator ID '{id}': {e}")))?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of challenge the engine knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    /// Distorted text rendered into an image
    Character,
    /// Drag-a-piece-into-place puzzle
    Slide,
    /// Click the shown symbols in order
    Click,
}

impl ChallengeType {
    /// All built-in challenge types, in default registration order.
    pub const ALL: [ChallengeType; 3] = [Self::Character, Self::Slide, Self::Click];

    /// Stable lowercase name used in keys and config files.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Slide => "slide",
            Self::Click => "click",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChallengeType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(Self::Character),
            "slide" => Ok(Self::Slide),
            "click" => Ok(Self::Click),
            other => Err(CoreError::Validation(format!(
                "unknown challenge type '{other}'"
            ))),
        }
    }
}

/// Role of an element that accompanies a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedRole {
    /// Text field the answer is typed into
    Input,
    /// Control that loads a new challenge
    RefreshControl,
    /// Control that submits the enclosing form
    SubmitControl,
}

impl RelatedRole {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::RefreshControl => "refresh_control",
            Self::SubmitControl => "submit_control",
        }
    }
}

impl fmt::Display for RelatedRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An element found next to a challenge, with a selector to re-find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedElement {
    /// What the element is for
    pub role: RelatedRole,
    /// Unique CSS selector at discovery time
    pub selector: String,
    /// Attributes captured at discovery time
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from a `DateTime<Utc>`.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Timestamp `duration` after this one, saturating at the maximum.
    #[must_use]
    pub fn after(&self, duration: Duration) -> Self {
        let delta = chrono::Duration::from_std(duration)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        Self(
            self.0
                .checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, CoreError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| CoreError::Validation(format!("invalid timestamp: {e}")))
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get seconds since Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}
