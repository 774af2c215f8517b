//! The durable locator record.

use captcha_core::{
    ChallengeType, LocatorConfig, LocatorId, RelatedElement, RelatedRole, SiteKey, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a locator was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorOrigin {
    /// Found by a scan
    Auto,
    /// Designated by the user
    Manual,
}

impl fmt::Display for LocatorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// A failed resolution kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorFailure {
    /// When the attempt failed
    pub at: Timestamp,
    /// What went wrong
    pub message: String,
}

/// How to find and interact with a challenge on a site.
///
/// Every resolution attempt increments `try_count` and exactly one of
/// `success_count` or `error_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    /// Unique identifier
    pub id: LocatorId,
    /// Site the locator belongs to
    pub site_key: SiteKey,
    /// Kind of challenge
    pub challenge_type: ChallengeType,
    /// Primary selector
    pub selector: String,
    /// Input, refresh and submit elements, at most one of each
    #[serde(default)]
    pub related_elements: Vec<RelatedElement>,
    /// Scan or manual designation
    pub origin: LocatorOrigin,
    /// Creation time
    pub created_at: Timestamp,
    /// Time of the last resolution attempt
    #[serde(default)]
    pub last_resolved_at: Option<Timestamp>,
    /// Resolution attempts
    #[serde(default)]
    pub try_count: u32,
    /// Successful attempts
    #[serde(default)]
    pub success_count: u32,
    /// Failed attempts
    #[serde(default)]
    pub error_count: u32,
    /// Last recognised answer
    #[serde(default)]
    pub last_result: Option<String>,
    /// Most recent failures, oldest first
    #[serde(default)]
    pub recent_errors: Vec<LocatorFailure>,
    /// Match score that produced the locator (scans only)
    #[serde(default)]
    pub score: Option<f64>,
    /// Locator this one replaced
    #[serde(default)]
    pub supersedes: Option<LocatorId>,
}

impl Locator {
    /// Create a fresh locator with zeroed counters.
    #[must_use]
    pub fn new(
        site_key: SiteKey,
        challenge_type: ChallengeType,
        selector: impl Into<String>,
        origin: LocatorOrigin,
    ) -> Self {
        Self {
            id: LocatorId::generate(),
            site_key,
            challenge_type,
            selector: selector.into(),
            related_elements: Vec::new(),
            origin,
            created_at: Timestamp::now(),
            last_resolved_at: None,
            try_count: 0,
            success_count: 0,
            error_count: 0,
            last_result: None,
            recent_errors: Vec::new(),
            score: None,
            supersedes: None,
        }
    }

    /// Attach related elements, keeping the first of each role.
    #[must_use]
    pub fn with_related(mut self, related: Vec<RelatedElement>) -> Self {
        for element in related {
            if self.related(element.role).is_none() {
                self.related_elements.push(element);
            }
        }
        self
    }

    /// Record the match score.
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Mark this locator as the replacement for `previous`.
    #[must_use]
    pub fn superseding(mut self, previous: &Locator) -> Self {
        self.supersedes = Some(previous.id.clone());
        self
    }

    /// Related element with the given role.
    #[must_use]
    pub fn related(&self, role: RelatedRole) -> Option<&RelatedElement> {
        self.related_elements.iter().find(|e| e.role == role)
    }

    /// Count a successful resolution.
    pub fn record_success(&mut self, result: &str) {
        self.try_count = self.try_count.saturating_add(1);
        self.success_count = self.success_count.saturating_add(1);
        self.last_result = Some(result.to_string());
        self.last_resolved_at = Some(Timestamp::now());
    }

    /// Count a failed resolution, keeping at most `max_recent` messages.
    pub fn record_failure(&mut self, message: impl Into<String>, max_recent: usize) {
        let now = Timestamp::now();
        self.try_count = self.try_count.saturating_add(1);
        self.error_count = self.error_count.saturating_add(1);
        self.last_resolved_at = Some(now);
        self.recent_errors.push(LocatorFailure {
            at: now,
            message: message.into(),
        });
        if self.recent_errors.len() > max_recent {
            let excess = self.recent_errors.len() - max_recent;
            self.recent_errors.drain(..excess);
        }
    }

    /// Failed attempts as a fraction of all attempts.
    #[must_use]
    pub fn error_ratio(&self) -> f64 {
        if self.try_count == 0 {
            0.0
        } else {
            f64::from(self.error_count) / f64::from(self.try_count)
        }
    }

    /// Whether enough attempts have failed to warrant a re-scan.
    #[must_use]
    pub fn is_unreliable(&self, config: &LocatorConfig) -> bool {
        self.try_count >= config.min_attempts && self.error_ratio() > config.max_error_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> Locator {
        Locator::new(
            SiteKey::new("example.com").expect("valid site key"),
            ChallengeType::Character,
            "#captcha",
            LocatorOrigin::Auto,
        )
    }

    #[test]
    fn test_counters_stay_consistent() {
        let mut locator = locator();
        locator.record_success("ab12");
        locator.record_failure("recognizer timed out", 10);
        locator.record_success("cd34");

        assert_eq!(locator.try_count, 3);
        assert_eq!(locator.try_count, locator.success_count + locator.error_count);
        assert_eq!(locator.last_result.as_deref(), Some("cd34"));
        assert!(locator.last_resolved_at.is_some());
    }

    #[test]
    fn test_recent_errors_bounded() {
        let mut locator = locator();
        for i in 0..15 {
            locator.record_failure(format!("failure {i}"), 10);
        }
        assert_eq!(locator.recent_errors.len(), 10);
        assert_eq!(locator.recent_errors[0].message, "failure 5");
        assert_eq!(locator.recent_errors[9].message, "failure 14");
    }

    #[test]
    fn test_unreliable_threshold() {
        let config = LocatorConfig::default();
        let mut locator = locator();
        locator.try_count = 10;
        locator.success_count = 4;
        locator.error_count = 6;
        assert!(locator.is_unreliable(&config));

        locator.success_count = 5;
        locator.error_count = 5;
        assert!(!locator.is_unreliable(&config));

        // Too few attempts to judge
        locator.try_count = 2;
        locator.success_count = 0;
        locator.error_count = 2;
        assert!(!locator.is_unreliable(&config));
    }

    #[test]
    fn test_related_dedup_and_serde() {
        let input = RelatedElement {
            role: RelatedRole::Input,
            selector: "input[name=\"vcode\"]".to_string(),
            attributes: std::collections::BTreeMap::new(),
        };
        let mut second = input.clone();
        second.selector = "#other".to_string();

        let locator = locator().with_related(vec![input.clone(), second]).with_score(0.9);
        assert_eq!(locator.related_elements.len(), 1);
        assert_eq!(locator.related(RelatedRole::Input), Some(&input));

        let json = serde_json::to_string(&locator).expect("serialize");
        let back: Locator = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, locator);
    }
}
