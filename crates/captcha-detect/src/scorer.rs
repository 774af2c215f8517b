//! Applies rule sets to feature records.

use crate::rules::{RuleSet, ScoreDetail};
use captcha_dom::FeatureRecord;

/// Stateless scorer. Every rule always runs; points are summed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleScorer;

impl RuleScorer {
    /// Create a scorer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every rule in order and return the breakdown.
    #[must_use]
    pub fn score(&self, feature: &FeatureRecord, rule_set: &RuleSet) -> Vec<ScoreDetail> {
        rule_set.rules.iter().map(|rule| rule.evaluate(feature)).collect()
    }

    /// Sum of awarded points divided by the rule set's max score, in `0..=1`.
    #[must_use]
    pub fn normalized(&self, details: &[ScoreDetail], rule_set: &RuleSet) -> f64 {
        let max = rule_set.max_score();
        if !max.is_finite() || max <= 0.0 {
            return 0.0;
        }
        let total: f64 = details.iter().map(|d| d.points).sum();
        (total / max).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles;
    use captcha_core::ChallengeType;
    use std::collections::BTreeMap;

    fn captcha_record() -> FeatureRecord {
        FeatureRecord {
            tag: "img".to_string(),
            attributes: BTreeMap::new(),
            width: 120.0,
            height: 40.0,
            aspect_ratio: 3.0,
            nearby_text: String::new(),
            has_nearby_input: true,
            has_nearby_refresh_control: false,
            in_form: true,
            keyword_text: "captcha123 verify code".to_string(),
        }
    }

    #[test]
    fn test_score_character_profile() {
        let scorer = RuleScorer::new();
        let rule_set = profiles::default_rule_set(ChallengeType::Character);
        let details = scorer.score(&captcha_record(), &rule_set);

        assert_eq!(details.len(), rule_set.rules.len());
        let score = scorer.normalized(&details, &rule_set);
        assert!((score - 0.9).abs() < 1e-9, "score was {score}");
        assert!(details.iter().any(|d| !d.passed && d.rule_name == "refresh_control"));
    }

    #[test]
    fn test_rule_order_does_not_change_total() {
        let scorer = RuleScorer::new();
        let rule_set = profiles::default_rule_set(ChallengeType::Character);
        let mut reversed = rule_set.clone();
        reversed.rules.reverse();

        let record = captcha_record();
        let forward = scorer.normalized(&scorer.score(&record, &rule_set), &rule_set);
        let backward = scorer.normalized(&scorer.score(&record, &reversed), &reversed);
        assert!((forward - backward).abs() < 1e-12);
    }

    #[test]
    fn test_degraded_record_scores_low() {
        let scorer = RuleScorer::new();
        let rule_set = profiles::default_rule_set(ChallengeType::Character);
        let mut record = captcha_record();
        record.width = 0.0;
        record.height = 0.0;
        record.aspect_ratio = 0.0;

        let score = scorer.normalized(&scorer.score(&record, &rule_set), &rule_set);
        assert!(score < 0.9);
    }
}
