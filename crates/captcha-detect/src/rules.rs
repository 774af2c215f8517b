//! Rule model for challenge scoring.
//!
//! A [`RuleSet`] is plain data: it can be written in TOML, validated, and
//! evaluated against a [`FeatureRecord`]. Every rule maps a record to
//! `0..=points`; a rule that cannot evaluate scores zero and says why.

use crate::error::{DetectError, Result};
use captcha_core::ChallengeType;
use captcha_dom::FeatureRecord;
use serde::{Deserialize, Serialize};

/// Fraction outside a size band at which credit reaches zero.
const DEFAULT_TOLERANCE: f64 = 0.5;

/// Outcome of one rule against one feature record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    /// Rule name
    pub rule_name: String,
    /// Points awarded, `0..=max_points`
    pub points: f64,
    /// Points available
    pub max_points: f64,
    /// Whether the rule awarded any points
    pub passed: bool,
    /// Human-readable explanation
    pub reason: String,
}

/// How keywords are compared against keyword text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Keyword appears anywhere
    #[default]
    Contains,
    /// Keyword equals a whole token
    Exact,
}

/// Inclusive range of acceptable values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl Band {
    /// Create a band.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Credit in `0..=1`: full inside the band, decaying linearly to zero
    /// at `tolerance` (a fraction of the violated bound) outside it.
    #[must_use]
    pub fn credit(&self, value: f64, tolerance: f64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        let miss = if value < self.min {
            (self.min - value) / self.min
        } else if value > self.max {
            (value - self.max) / self.max
        } else {
            return 1.0;
        };
        if tolerance <= 0.0 || !miss.is_finite() {
            return 0.0;
        }
        (1.0 - miss / tolerance).clamp(0.0, 1.0)
    }
}

/// The test a rule applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Tag name is one of `tags`
    Tag {
        /// Accepted tag names
        tags: Vec<String>,
    },
    /// Keyword text mentions the keywords
    Keywords {
        /// Keywords, compared case-insensitively
        keywords: Vec<String>,
        /// Comparison mode
        #[serde(default)]
        mode: MatchMode,
        /// Matches needed for full credit (defaults to all keywords)
        #[serde(default)]
        saturate_at: Option<usize>,
    },
    /// Rendered size falls in the given bands
    SizeBand {
        /// Width band in px
        #[serde(default)]
        width: Option<Band>,
        /// Height band in px
        #[serde(default)]
        height: Option<Band>,
        /// Width / height band
        #[serde(default)]
        aspect_ratio: Option<Band>,
        /// Fraction outside a band at which credit reaches zero
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    /// A text input shares the neighbourhood
    NearbyInput,
    /// A refresh control shares the neighbourhood
    NearbyRefresh,
    /// Inside a form-like container
    InForm,
    /// Neighbourhood text mentions the keywords
    NearbyText {
        /// Keywords, compared case-insensitively
        keywords: Vec<String>,
    },
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

/// A named, weighted rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Name shown in score breakdowns
    pub name: String,
    /// Maximum points
    pub points: f64,
    /// The test
    #[serde(flatten)]
    pub check: RuleCheck,
}

impl Rule {
    /// Create a rule.
    #[must_use]
    pub fn new(name: impl Into<String>, points: f64, check: RuleCheck) -> Self {
        Self {
            name: name.into(),
            points,
            check,
        }
    }

    /// Evaluate against a feature record. Never fails.
    #[must_use]
    pub fn evaluate(&self, feature: &FeatureRecord) -> ScoreDetail {
        let (fraction, reason) = if self.points.is_finite() && self.points >= 0.0 {
            self.check.fraction(feature)
        } else {
            (0.0, format!("invalid points value {}", self.points))
        };
        let points = self.points * fraction;
        ScoreDetail {
            rule_name: self.name.clone(),
            points,
            max_points: self.points.max(0.0),
            passed: points > 0.0,
            reason,
        }
    }
}

impl RuleCheck {
    /// Fraction of credit in `0..=1` with an explanation.
    fn fraction(&self, feature: &FeatureRecord) -> (f64, String) {
        match self {
            Self::Tag { tags } => {
                if tags.iter().any(|t| t.eq_ignore_ascii_case(&feature.tag)) {
                    (1.0, format!("tag <{}> accepted", feature.tag))
                } else {
                    (0.0, format!("tag <{}> not in {tags:?}", feature.tag))
                }
            }
            Self::Keywords {
                keywords,
                mode,
                saturate_at,
            } => keyword_fraction(&feature.keyword_text, keywords, *mode, *saturate_at),
            Self::SizeBand {
                width,
                height,
                aspect_ratio,
                tolerance,
            } => {
                if feature.is_degraded() {
                    return (0.0, "no rendered size".to_string());
                }
                let factors = [
                    width.map(|b| ("width", b.credit(feature.width, *tolerance))),
                    height.map(|b| ("height", b.credit(feature.height, *tolerance))),
                    aspect_ratio.map(|b| ("ratio", b.credit(feature.aspect_ratio, *tolerance))),
                ];
                let mut product = 1.0;
                let mut parts = Vec::new();
                for (label, credit) in factors.into_iter().flatten() {
                    product *= credit;
                    parts.push(format!("{label} {credit:.2}"));
                }
                if parts.is_empty() {
                    return (0.0, "no bands configured".to_string());
                }
                (
                    product,
                    format!(
                        "{}x{} px: {}",
                        feature.width,
                        feature.height,
                        parts.join(", ")
                    ),
                )
            }
            Self::NearbyInput => flag(feature.has_nearby_input, "text input nearby"),
            Self::NearbyRefresh => flag(feature.has_nearby_refresh_control, "refresh control nearby"),
            Self::InForm => flag(feature.in_form, "inside a form"),
            Self::NearbyText { keywords } => {
                let text = feature.nearby_text.to_lowercase();
                if keywords.is_empty() {
                    return (0.0, "no keywords configured".to_string());
                }
                match keywords.iter().find(|k| text.contains(&k.to_lowercase())) {
                    Some(k) => (1.0, format!("nearby text mentions '{k}'")),
                    None => (0.0, "no keyword in nearby text".to_string()),
                }
            }
        }
    }
}

fn flag(value: bool, label: &str) -> (f64, String) {
    if value {
        (1.0, label.to_string())
    } else {
        (0.0, format!("no {label}"))
    }
}

fn keyword_fraction(
    text: &str,
    keywords: &[String],
    mode: MatchMode,
    saturate_at: Option<usize>,
) -> (f64, String) {
    if keywords.is_empty() {
        return (0.0, "no keywords configured".to_string());
    }
    let text = text.to_lowercase();
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/' | '?' | '=' | '&' | ':'))
        .filter(|t| !t.is_empty())
        .collect();

    let matched: Vec<&String> = keywords
        .iter()
        .filter(|k| {
            let k = k.to_lowercase();
            match mode {
                MatchMode::Contains => text.contains(&k),
                MatchMode::Exact => tokens.iter().any(|t| *t == k),
            }
        })
        .collect();

    let needed = saturate_at.unwrap_or(keywords.len()).clamp(1, keywords.len());
    #[allow(clippy::cast_precision_loss)]
    let fraction = (matched.len() as f64 / needed as f64).min(1.0);
    let reason = if matched.is_empty() {
        "no keyword matched".to_string()
    } else {
        format!("matched {matched:?}")
    };
    (fraction, reason)
}

/// Weighted rules for one challenge type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Challenge type detected by this rule set
    pub challenge_type: ChallengeType,
    /// Normalized score needed to accept a candidate
    pub threshold: f64,
    /// Normalization divisor (defaults to the sum of rule points)
    #[serde(default)]
    pub max_score: Option<f64>,
    /// Rules, evaluated in order
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Normalization divisor.
    #[must_use]
    pub fn max_score(&self) -> f64 {
        self.max_score
            .unwrap_or_else(|| self.rules.iter().map(|r| r.points.max(0.0)).sum())
    }

    /// Check the rule set is usable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| DetectError::InvalidRuleSet {
            challenge_type: self.challenge_type,
            reason,
        };

        if self.rules.is_empty() {
            return Err(invalid("no rules".to_string()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(invalid(format!(
                "threshold must be within 0..=1, got {}",
                self.threshold
            )));
        }
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(invalid("rule with empty name".to_string()));
            }
            if !rule.points.is_finite() || rule.points < 0.0 {
                return Err(invalid(format!(
                    "rule '{}' has invalid points {}",
                    rule.name, rule.points
                )));
            }
        }
        let max = self.max_score();
        if !max.is_finite() || max <= 0.0 {
            return Err(invalid(format!("max score must be positive, got {max}")));
        }
        Ok(())
    }
}
