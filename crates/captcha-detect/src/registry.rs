//! Ordered registry of challenge matchers.

use crate::{
    error::{DetectError, Result},
    matcher::{MatchResult, MatchTarget, Matcher, RuleMatcher},
    profiles,
    rules::RuleSet,
};
use captcha_core::{ChallengeType, DetectionConfig};
use captcha_dom::{ElementRef, FeatureExtractor, Page, Size};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Matchers in registration order, one per challenge type.
///
/// Evaluation runs every matcher and keeps the best passing result; equal
/// scores go to the matcher registered first.
#[derive(Clone)]
pub struct MatcherRegistry {
    matchers: Vec<Arc<dyn Matcher>>,
    extractor: FeatureExtractor,
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherRegistry")
            .field("challenge_types", &self.challenge_types())
            .finish_non_exhaustive()
    }
}

impl MatcherRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(extractor: FeatureExtractor) -> Self {
        Self {
            matchers: Vec::new(),
            extractor,
        }
    }

    /// Create a registry holding the built-in profiles enabled in `config`.
    pub fn with_defaults(extractor: FeatureExtractor, config: &DetectionConfig) -> Result<Self> {
        Self::from_rule_sets(extractor, profiles::default_rule_sets(config))
    }

    /// Create a registry from rule sets, in the given order.
    pub fn from_rule_sets(
        extractor: FeatureExtractor,
        rule_sets: impl IntoIterator<Item = RuleSet>,
    ) -> Result<Self> {
        let mut registry = Self::new(extractor);
        for rule_set in rule_sets {
            registry.register(Arc::new(RuleMatcher::new(rule_set)?))?;
        }
        info!(count = registry.count(), "registered challenge matchers");
        Ok(registry)
    }

    /// Append a matcher. Fails if its challenge type is already registered.
    pub fn register(&mut self, matcher: Arc<dyn Matcher>) -> Result<()> {
        let challenge_type = matcher.challenge_type();
        if self.contains(challenge_type) {
            return Err(DetectError::DuplicateMatcher(challenge_type));
        }
        debug!(challenge_type = %challenge_type, threshold = matcher.threshold(), "registered matcher");
        self.matchers.push(matcher);
        Ok(())
    }

    /// Replace the matcher for a type in place, or append it if absent.
    pub fn upsert(&mut self, matcher: Arc<dyn Matcher>) {
        let challenge_type = matcher.challenge_type();
        match self
            .matchers
            .iter_mut()
            .find(|m| m.challenge_type() == challenge_type)
        {
            Some(slot) => {
                *slot = matcher;
                debug!(challenge_type = %challenge_type, "replaced matcher");
            }
            None => {
                self.matchers.push(matcher);
                debug!(challenge_type = %challenge_type, "registered matcher");
            }
        }
    }

    /// Remove a matcher. Returns `true` if it was present.
    pub fn remove(&mut self, challenge_type: ChallengeType) -> bool {
        let before = self.matchers.len();
        self.matchers.retain(|m| m.challenge_type() != challenge_type);
        before != self.matchers.len()
    }

    /// Matcher for a challenge type.
    #[must_use]
    pub fn get(&self, challenge_type: ChallengeType) -> Option<Arc<dyn Matcher>> {
        self.matchers
            .iter()
            .find(|m| m.challenge_type() == challenge_type)
            .cloned()
    }

    /// Check if a challenge type has a matcher.
    #[must_use]
    pub fn contains(&self, challenge_type: ChallengeType) -> bool {
        self.matchers
            .iter()
            .any(|m| m.challenge_type() == challenge_type)
    }

    /// Registered challenge types in order.
    #[must_use]
    pub fn challenge_types(&self) -> Vec<ChallengeType> {
        self.matchers.iter().map(|m| m.challenge_type()).collect()
    }

    /// Number of registered matchers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.matchers.len()
    }

    /// The feature extractor used by [`Self::evaluate`].
    #[must_use]
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Results of every matcher, in registration order.
    #[must_use]
    pub fn evaluate_all(&self, target: &MatchTarget<'_>) -> Vec<MatchResult> {
        self.matchers.iter().map(|m| m.evaluate(target)).collect()
    }

    /// Extract features for `node` and return the best passing result.
    #[must_use]
    pub fn evaluate(&self, page: &Page, node: ElementRef<'_>, natural: Option<Size>) -> Option<MatchResult> {
        let feature = self.extractor.extract(page, node, natural);
        let target = MatchTarget {
            page,
            node,
            feature: &feature,
        };
        let mut best: Option<MatchResult> = None;
        for result in self.evaluate_all(&target) {
            if !result.passed {
                continue;
            }
            if best.as_ref().map_or(true, |b| result.score > b.score) {
                best = Some(result);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, RuleCheck};

    /// Accepts containers hosting a challenge frame.
    struct HostedFrameMatcher;

    impl Matcher for HostedFrameMatcher {
        fn challenge_type(&self) -> ChallengeType {
            ChallengeType::Click
        }

        fn threshold(&self) -> f64 {
            1.0
        }

        fn evaluate(&self, target: &MatchTarget<'_>) -> MatchResult {
            let hosted = target
                .node
                .descendants()
                .filter_map(ElementRef::wrap)
                .any(|el| {
                    el.value().name() == "iframe"
                        && el.value().attr("src").is_some_and(|src| src.contains("challenge"))
                });
            let score = if hosted { 1.0 } else { 0.0 };
            MatchResult {
                challenge_type: ChallengeType::Click,
                score,
                details: Vec::new(),
                passed: hosted,
            }
        }
    }

    fn registry() -> MatcherRegistry {
        MatcherRegistry::with_defaults(FeatureExtractor::default(), &DetectionConfig::default())
            .expect("default registry")
    }

    fn flat_set(challenge_type: ChallengeType) -> RuleSet {
        RuleSet {
            challenge_type,
            threshold: 0.5,
            max_score: None,
            rules: vec![Rule::new("form", 10.0, RuleCheck::InForm)],
        }
    }

    #[test]
    fn test_registry_defaults_in_order() {
        let registry = registry();
        assert_eq!(registry.count(), 3);
        assert_eq!(
            registry.challenge_types(),
            vec![ChallengeType::Character, ChallengeType::Slide, ChallengeType::Click]
        );
    }

    #[test]
    fn test_registry_duplicate_rejected() {
        let mut registry = registry();
        let matcher = RuleMatcher::new(flat_set(ChallengeType::Slide)).expect("matcher");
        let result = registry.register(Arc::new(matcher));
        assert!(matches!(result, Err(DetectError::DuplicateMatcher(ChallengeType::Slide))));
    }

    #[test]
    fn test_registry_upsert_and_remove() {
        let mut registry = registry();
        let matcher = RuleMatcher::new(flat_set(ChallengeType::Slide)).expect("matcher");
        registry.upsert(Arc::new(matcher));
        assert_eq!(registry.count(), 3);
        assert!((registry.get(ChallengeType::Slide).expect("slide").threshold() - 0.5).abs() < 1e-9);

        assert!(registry.remove(ChallengeType::Click));
        assert!(!registry.remove(ChallengeType::Click));
        assert!(!registry.contains(ChallengeType::Click));
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let registry = MatcherRegistry::from_rule_sets(
            FeatureExtractor::default(),
            vec![flat_set(ChallengeType::Click), flat_set(ChallengeType::Character)],
        )
        .expect("registry");

        let page = Page::parse(r#"<html><body><form><img id="c" width="100" height="40"></form></body></html>"#);
        let img = page.resolve_unique("#c").expect("img");
        let result = registry.evaluate(&page, img, None).expect("match");
        assert_eq!(result.challenge_type, ChallengeType::Click);
    }

    #[test]
    fn test_no_match_returns_none() {
        let registry = registry();
        let page = Page::parse(r#"<html><body><img id="logo" src="logo.png" width="200" height="60"></body></html>"#);
        let img = page.resolve_unique("#logo").expect("img");
        assert!(registry.evaluate(&page, img, None).is_none());
    }

    #[test]
    fn test_custom_matcher_sees_node_children() {
        let mut registry = MatcherRegistry::new(FeatureExtractor::default());
        registry.register(Arc::new(HostedFrameMatcher)).expect("register");

        let page = Page::parse(
            r#"<html><body>
                <div id="widget"><iframe src="https://challenges.example.net/frame"></iframe></div>
                <div id="plain"><p>hello</p></div>
            </body></html>"#,
        );
        let widget = page.resolve_unique("#widget").expect("widget");
        let plain = page.resolve_unique("#plain").expect("plain");

        let result = registry.evaluate(&page, widget, None).expect("match");
        assert_eq!(result.challenge_type, ChallengeType::Click);
        assert!(registry.evaluate(&page, plain, None).is_none());
    }
}
