//! Candidate enumeration in widening passes.
//!
//! The planner walks the page three times, each pass wider than the last:
//!
//! 1. image-like nodes inside form-like containers
//! 2. candidates in the neighbourhood of inputs that mention a challenge
//! 3. every remaining candidate on the page
//!
//! Each node is offered once, in the first pass that reaches it. Scanning
//! stops at the first accepted candidate.

use crate::matcher::MatchResult;
use crate::registry::MatcherRegistry;
use captcha_core::{FeatureConfig, ScanConfig};
use captcha_dom::features::attribute_text;
use captcha_dom::page::{descendants, is_text_entry};
use captcha_dom::{ElementRef, NodeId, Page, SizeHints};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// Which widening pass produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPass {
    /// Image-like nodes inside forms
    FormScoped,
    /// Neighbourhoods of challenge-keyword inputs
    KeywordNeighborhood,
    /// Whole-document fallback
    Document,
}

impl fmt::Display for ScanPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FormScoped => "form_scoped",
            Self::KeywordNeighborhood => "keyword_neighborhood",
            Self::Document => "document",
        };
        f.write_str(name)
    }
}

/// A node to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// The node
    pub node: NodeId,
    /// Pass that produced it
    pub pass: ScanPass,
}

/// An accepted candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The accepted node
    pub node: NodeId,
    /// Pass that produced it
    pub pass: ScanPass,
    /// Winning match
    pub result: MatchResult,
}

/// Plans and runs candidate scans over a page.
#[derive(Debug, Clone)]
pub struct ScanPlanner {
    config: ScanConfig,
    neighborhood_depth: usize,
    keywords: Vec<String>,
}

impl ScanPlanner {
    /// Create a planner.
    #[must_use]
    pub fn new(config: ScanConfig, features: &FeatureConfig) -> Self {
        let keywords = config
            .challenge_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        Self {
            config,
            neighborhood_depth: features.neighborhood_depth,
            keywords,
        }
    }

    /// Scan settings.
    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Candidates in pass order, deduplicated.
    ///
    /// Nodes with a `form_tags` tag are always offered. Other tags count
    /// towards `max_candidates` and are dropped once it is reached.
    #[must_use]
    pub fn plan(&self, page: &Page) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut containers = 0usize;
        let mut dropped = 0usize;
        let mut push = |el: ElementRef<'_>, pass: ScanPass| {
            if seen.contains(&el.id()) {
                return;
            }
            if !has_tag(&self.config.form_tags, el) {
                if containers == self.config.max_candidates {
                    dropped += 1;
                    return;
                }
                containers += 1;
            }
            seen.insert(el.id());
            candidates.push(Candidate { node: el.id(), pass });
        };

        for el in page.elements() {
            if has_tag(&self.config.form_tags, el) && page.form_ancestor(el).is_some() {
                push(el, ScanPass::FormScoped);
            }
        }

        for input in page.elements().filter(|el| self.is_challenge_input(page, *el)) {
            let hood = page.neighborhood(input, self.neighborhood_depth);
            for el in descendants(hood).filter(|el| self.is_candidate(*el)) {
                push(el, ScanPass::KeywordNeighborhood);
            }
        }

        for el in page.elements().filter(|el| self.is_candidate(*el)) {
            push(el, ScanPass::Document);
        }

        if dropped > 0 {
            debug!(
                dropped,
                limit = self.config.max_candidates,
                "skipped container candidates over the limit"
            );
        }
        candidates
    }

    /// Whether a node's size can only be learned by loading its image.
    #[must_use]
    pub fn needs_probe(&self, page: &Page, node: ElementRef<'_>) -> bool {
        let value = node.value();
        let image_like = value.name() == "img"
            || (value.name() == "input"
                && value
                    .attr("type")
                    .is_some_and(|t| t.eq_ignore_ascii_case("image")));
        image_like
            && value.attr("src").is_some_and(|s| !s.trim().is_empty())
            && page.measure(node, None).is_empty()
            && !page.is_hidden(node)
    }

    /// Run all passes synchronously, using `hints` for image sizes.
    ///
    /// Returns the first accepted candidate, or `None` when every pass is
    /// exhausted.
    #[must_use]
    pub fn scan(&self, page: &Page, registry: &MatcherRegistry, hints: &SizeHints) -> Option<Detection> {
        let candidates = self.plan(page);
        let total = candidates.len();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let Some(el) = page.element(candidate.node) else {
                continue;
            };
            if let Some(result) = registry.evaluate(page, el, hints.get(&candidate.node).copied()) {
                info!(
                    pass = %candidate.pass,
                    challenge_type = %result.challenge_type,
                    score = result.score,
                    evaluated = index + 1,
                    "accepted scan candidate"
                );
                return Some(Detection {
                    node: candidate.node,
                    pass: candidate.pass,
                    result,
                });
            }
        }

        info!(evaluated = total, "no scan candidate accepted");
        None
    }

    fn is_candidate(&self, el: ElementRef<'_>) -> bool {
        has_tag(&self.config.candidate_tags, el) || has_tag(&self.config.form_tags, el)
    }

    fn is_challenge_input(&self, page: &Page, el: ElementRef<'_>) -> bool {
        if !is_text_entry(el) {
            return false;
        }
        let text = format!("{} {}", attribute_text(el), page.label_text(el).to_lowercase());
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

fn has_tag(tags: &[String], el: ElementRef<'_>) -> bool {
    let name = el.value().name();
    tags.iter().any(|t| t.eq_ignore_ascii_case(name))
}
