//! Detection of machine-generated selector fragments.
//!
//! Ids, class tokens and attribute values produced by build tools or
//! per-session renderers change between page loads and make poor selector
//! anchors. The rules are data ([`VolatilityRules`]) so they can be tuned
//! without touching selector generation.

use crate::error::{DomError, Result};
use captcha_core::VolatilityRules;
use regex::Regex;
use std::fmt;

/// Decides whether a selector fragment is expected to change between builds.
pub trait VolatilityPredicate: Send + Sync {
    /// Why the fragment is volatile, or `None` if it looks stable.
    fn explain(&self, fragment: &str) -> Option<VolatilityReason>;

    /// Whether the fragment should be skipped as selector material.
    fn is_volatile(&self, fragment: &str) -> bool {
        self.explain(fragment).is_some()
    }
}

/// The rule that marked a fragment as volatile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolatilityReason {
    /// Empty or whitespace-only
    Empty,
    /// Longer than the configured maximum
    TooLong(usize),
    /// Contains a long run of digits
    DigitRun(usize),
    /// Contains a long run of hex characters
    HexRun(usize),
    /// Contains `--`
    DoubleHyphen,
    /// Starts with a build-tool marker prefix
    MarkerPrefix(String),
    /// Matches a configured pattern
    Pattern(String),
}

impl fmt::Display for VolatilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::TooLong(len) => write!(f, "length {len} exceeds limit"),
            Self::DigitRun(len) => write!(f, "digit run of {len}"),
            Self::HexRun(len) => write!(f, "hex run of {len}"),
            Self::DoubleHyphen => write!(f, "contains '--'"),
            Self::MarkerPrefix(prefix) => write!(f, "build marker prefix '{prefix}'"),
            Self::Pattern(pattern) => write!(f, "matches pattern '{pattern}'"),
        }
    }
}

/// Table-driven volatility predicate.
#[derive(Debug, Clone)]
pub struct RuleVolatility {
    rules: VolatilityRules,
    patterns: Vec<Regex>,
}

impl RuleVolatility {
    /// Compile a rule table.
    pub fn from_rules(rules: &VolatilityRules) -> Result<Self> {
        let patterns = rules
            .patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| DomError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules: rules.clone(),
            patterns,
        })
    }
}

impl Default for RuleVolatility {
    fn default() -> Self {
        Self {
            rules: VolatilityRules::default(),
            patterns: Vec::new(),
        }
    }
}

impl VolatilityPredicate for RuleVolatility {
    fn explain(&self, fragment: &str) -> Option<VolatilityReason> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Some(VolatilityReason::Empty);
        }

        let length = fragment.chars().count();
        if length > self.rules.max_length {
            return Some(VolatilityReason::TooLong(length));
        }

        if let Some(prefix) = self
            .rules
            .marker_prefixes
            .iter()
            .find(|prefix| fragment.starts_with(prefix.as_str()))
        {
            return Some(VolatilityReason::MarkerPrefix(prefix.clone()));
        }

        if self.rules.reject_double_hyphen && fragment.contains("--") {
            return Some(VolatilityReason::DoubleHyphen);
        }

        let digits = longest_run(fragment, |c| c.is_ascii_digit());
        if digits >= self.rules.min_digit_run {
            return Some(VolatilityReason::DigitRun(digits));
        }

        let hex = longest_run(fragment, |c| c.is_ascii_hexdigit());
        if hex >= self.rules.hex_run {
            return Some(VolatilityReason::HexRun(hex));
        }

        self.patterns
            .iter()
            .find(|re| re.is_match(fragment))
            .map(|re| VolatilityReason::Pattern(re.as_str().to_string()))
    }
}

fn longest_run(text: &str, accept: impl Fn(char) -> bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for c in text.chars() {
        if accept(c) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_fragments() {
        let predicate = RuleVolatility::default();
        for fragment in ["captcha", "login-form", "verify_img", "captcha123", "btn-primary"] {
            assert!(!predicate.is_volatile(fragment), "{fragment} should be stable");
        }
    }

    #[test]
    fn test_volatile_fragments() {
        let predicate = RuleVolatility::default();
        assert_eq!(
            predicate.explain("js-a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4"),
            Some(VolatilityReason::HexRun(32))
        );
        assert_eq!(
            predicate.explain("item-1698765432"),
            Some(VolatilityReason::DigitRun(10))
        );
        assert_eq!(
            predicate.explain("block--modifier"),
            Some(VolatilityReason::DoubleHyphen)
        );
        assert_eq!(
            predicate.explain("css-1x2y3z"),
            Some(VolatilityReason::MarkerPrefix("css-".to_string()))
        );
        assert_eq!(predicate.explain("  "), Some(VolatilityReason::Empty));
        assert!(matches!(
            predicate.explain(&"a".repeat(41)),
            Some(VolatilityReason::TooLong(41))
        ));
    }

    #[test]
    fn test_custom_patterns() {
        let rules = VolatilityRules {
            patterns: vec![r"^tmp_".to_string()],
            ..VolatilityRules::default()
        };
        let predicate = RuleVolatility::from_rules(&rules).expect("valid rules");
        assert!(predicate.is_volatile("tmp_image"));
        assert!(!predicate.is_volatile("image"));

        let bad = VolatilityRules {
            patterns: vec!["(".to_string()],
            ..VolatilityRules::default()
        };
        assert!(matches!(
            RuleVolatility::from_rules(&bad),
            Err(DomError::InvalidPattern { .. })
        ));
    }
}
