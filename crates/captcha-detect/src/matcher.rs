//! Per-challenge-type matchers.

use crate::rules::{RuleSet, ScoreDetail};
use crate::scorer::RuleScorer;
use captcha_core::ChallengeType;
use captcha_dom::{ElementRef, FeatureRecord, Page};
use serde::{Deserialize, Serialize};

/// Result of one matcher against one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Challenge type evaluated
    pub challenge_type: ChallengeType,
    /// Normalized score in `0..=1`
    pub score: f64,
    /// Per-rule breakdown
    pub details: Vec<ScoreDetail>,
    /// Whether the score cleared the matcher's threshold
    pub passed: bool,
}

/// A candidate node offered to matchers.
///
/// Features are extracted once per candidate and shared by every matcher;
/// the page and node are there for matchers that need more, such as the
/// children of a hosting `iframe`.
#[derive(Clone, Copy)]
pub struct MatchTarget<'a> {
    /// Document the node belongs to
    pub page: &'a Page,
    /// The candidate
    pub node: ElementRef<'a>,
    /// Its extracted features
    pub feature: &'a FeatureRecord,
}

/// Evaluates candidates for a single challenge type.
///
/// Matchers are independent: none may depend on another's state.
pub trait Matcher: Send + Sync {
    /// Challenge type this matcher detects.
    fn challenge_type(&self) -> ChallengeType;

    /// Minimum normalized score to accept a candidate.
    fn threshold(&self) -> f64;

    /// Score a candidate node.
    fn evaluate(&self, target: &MatchTarget<'_>) -> MatchResult;
}

/// Matcher backed by a [`RuleSet`].
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rule_set: RuleSet,
    scorer: RuleScorer,
}

impl RuleMatcher {
    /// Create a matcher from a validated rule set.
    pub fn new(rule_set: RuleSet) -> crate::Result<Self> {
        rule_set.validate()?;
        Ok(Self {
            rule_set,
            scorer: RuleScorer::new(),
        })
    }

    /// The underlying rule set.
    #[must_use]
    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    /// Score a feature record against the rule set.
    #[must_use]
    pub fn score_features(&self, feature: &FeatureRecord) -> MatchResult {
        let mut details = self.scorer.score(feature, &self.rule_set);

        // Zero-size nodes are never accepted, whatever their attributes say.
        let score = if feature.is_degraded() {
            details.push(ScoreDetail {
                rule_name: "rendered".to_string(),
                points: 0.0,
                max_points: 0.0,
                passed: false,
                reason: "node has no rendered size; score forced to 0".to_string(),
            });
            0.0
        } else {
            self.scorer.normalized(&details, &self.rule_set)
        };

        MatchResult {
            challenge_type: self.rule_set.challenge_type,
            score,
            details,
            passed: score >= self.rule_set.threshold,
        }
    }
}

impl Matcher for RuleMatcher {
    fn challenge_type(&self) -> ChallengeType {
        self.rule_set.challenge_type
    }

    fn threshold(&self) -> f64 {
        self.rule_set.threshold
    }

    fn evaluate(&self, target: &MatchTarget<'_>) -> MatchResult {
        self.score_features(target.feature)
    }
}
