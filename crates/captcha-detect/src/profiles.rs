//! Built-in rule sets for the known challenge types.
//!
//! Each profile is worth 100 points before normalization.

use crate::rules::{Band, MatchMode, Rule, RuleCheck, RuleSet};
use captcha_core::{ChallengeType, DetectionConfig};

const IMAGE_TAGS: &[&str] = &["img", "canvas", "svg"];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

/// Default rule set for a challenge type with its default threshold.
#[must_use]
pub fn default_rule_set(challenge_type: ChallengeType) -> RuleSet {
    match challenge_type {
        ChallengeType::Character => character(),
        ChallengeType::Slide => slide(),
        ChallengeType::Click => click(),
    }
}

/// Default rule sets for the enabled challenge types, in registration order,
/// with thresholds taken from the configuration.
#[must_use]
pub fn default_rule_sets(config: &DetectionConfig) -> Vec<RuleSet> {
    ChallengeType::ALL
        .into_iter()
        .filter(|t| config.enabled.contains(t))
        .map(|t| {
            let mut set = default_rule_set(t);
            set.threshold = config.threshold_for(t);
            set
        })
        .collect()
}

/// Distorted text in a small, wide image next to an answer field.
#[must_use]
pub fn character() -> RuleSet {
    RuleSet {
        challenge_type: ChallengeType::Character,
        threshold: 0.65,
        max_score: None,
        rules: vec![
            Rule::new("tag", 15.0, RuleCheck::Tag { tags: strings(IMAGE_TAGS) }),
            Rule::new(
                "keywords",
                30.0,
                RuleCheck::Keywords {
                    keywords: strings(&[
                        "captcha",
                        "vcode",
                        "verify",
                        "verification",
                        "validate",
                        "checkcode",
                        "authcode",
                        "seccode",
                        "code",
                        "yzm",
                        "验证码",
                    ]),
                    mode: MatchMode::Contains,
                    saturate_at: Some(2),
                },
            ),
            Rule::new(
                "size",
                20.0,
                RuleCheck::SizeBand {
                    width: Some(Band::new(40.0, 200.0)),
                    height: Some(Band::new(15.0, 80.0)),
                    aspect_ratio: Some(Band::new(1.5, 6.0)),
                    tolerance: 0.5,
                },
            ),
            Rule::new("nearby_input", 15.0, RuleCheck::NearbyInput),
            Rule::new("refresh_control", 10.0, RuleCheck::NearbyRefresh),
            Rule::new("in_form", 10.0, RuleCheck::InForm),
        ],
    }
}

/// Drag-to-complete puzzle with a wide track.
#[must_use]
pub fn slide() -> RuleSet {
    RuleSet {
        challenge_type: ChallengeType::Slide,
        threshold: 0.6,
        max_score: None,
        rules: vec![
            Rule::new(
                "tag",
                10.0,
                RuleCheck::Tag {
                    tags: strings(&["img", "canvas", "div"]),
                },
            ),
            Rule::new(
                "keywords",
                40.0,
                RuleCheck::Keywords {
                    keywords: strings(&[
                        "slider", "slide", "drag", "verify", "puzzle", "swipe", "滑块",
                    ]),
                    mode: MatchMode::Contains,
                    saturate_at: Some(2),
                },
            ),
            Rule::new(
                "size",
                20.0,
                RuleCheck::SizeBand {
                    width: Some(Band::new(200.0, 400.0)),
                    height: Some(Band::new(30.0, 200.0)),
                    aspect_ratio: None,
                    tolerance: 0.5,
                },
            ),
            Rule::new("refresh_control", 15.0, RuleCheck::NearbyRefresh),
            Rule::new("in_form", 5.0, RuleCheck::InForm),
            Rule::new(
                "nearby_text",
                10.0,
                RuleCheck::NearbyText {
                    keywords: strings(&["drag", "slide", "拖动", "滑动", "向右"]),
                },
            ),
        ],
    }
}

/// Image where the user clicks symbols in a given order.
#[must_use]
pub fn click() -> RuleSet {
    RuleSet {
        challenge_type: ChallengeType::Click,
        threshold: 0.6,
        max_score: None,
        rules: vec![
            Rule::new(
                "tag",
                10.0,
                RuleCheck::Tag {
                    tags: strings(&["img", "canvas", "div"]),
                },
            ),
            Rule::new(
                "keywords",
                40.0,
                RuleCheck::Keywords {
                    keywords: strings(&["click", "point", "select", "order", "icon", "点选", "点击"]),
                    mode: MatchMode::Contains,
                    saturate_at: Some(2),
                },
            ),
            Rule::new(
                "size",
                25.0,
                RuleCheck::SizeBand {
                    width: Some(Band::new(150.0, 400.0)),
                    height: Some(Band::new(100.0, 400.0)),
                    aspect_ratio: Some(Band::new(0.75, 3.0)),
                    tolerance: 0.5,
                },
            ),
            Rule::new("refresh_control", 10.0, RuleCheck::NearbyRefresh),
            Rule::new(
                "nearby_text",
                15.0,
                RuleCheck::NearbyText {
                    keywords: strings(&["in order", "依次", "顺序", "click", "点击"]),
                },
            ),
        ],
    }
}
