//! Durable selector generation.
//!
//! Strategies are tried from most to least semantic; every candidate is
//! checked against the page and only accepted when it selects exactly the
//! target node. Volatile fragments (see [`crate::volatility`]) are never
//! used as anchors.

use crate::error::{DomError, Result};
use crate::page::{ancestors, Page};
use crate::volatility::{RuleVolatility, VolatilityPredicate};
use captcha_core::SelectorConfig;
use scraper::ElementRef;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::debug;

/// Strategy that produced a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorStrategy {
    /// `#id`
    Id,
    /// `tag.class.class`
    Classes,
    /// `tag[attr="value"]` with one or two clauses
    Attributes,
    /// `tag` or `tag:nth-of-type(k)`
    Positional,
    /// `tag:nth-child(k)` segments joined by `>`
    Path,
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Id => "id",
            Self::Classes => "classes",
            Self::Attributes => "attributes",
            Self::Positional => "positional",
            Self::Path => "path",
        };
        f.write_str(name)
    }
}

/// A selector verified to match exactly one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSelector {
    /// CSS selector text
    pub selector: String,
    /// How it was derived
    pub strategy: SelectorStrategy,
}

/// Derives unique, durable CSS selectors for page nodes.
#[derive(Clone)]
pub struct SelectorGenerator {
    config: SelectorConfig,
    volatility: Arc<dyn VolatilityPredicate>,
}

impl fmt::Debug for SelectorGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SelectorGenerator {
    /// Create a generator using the configured volatility rules.
    pub fn new(config: SelectorConfig) -> Result<Self> {
        let volatility = RuleVolatility::from_rules(&config.volatility)?;
        Ok(Self::with_predicate(config, Arc::new(volatility)))
    }

    /// Create a generator with a custom volatility predicate.
    #[must_use]
    pub fn with_predicate(config: SelectorConfig, volatility: Arc<dyn VolatilityPredicate>) -> Self {
        Self { config, volatility }
    }

    /// The volatility predicate in use.
    #[must_use]
    pub fn volatility(&self) -> &dyn VolatilityPredicate {
        self.volatility.as_ref()
    }

    /// Generate a selector that resolves to exactly `node`.
    pub fn generate(&self, page: &Page, node: ElementRef<'_>) -> Result<GeneratedSelector> {
        let candidates = self
            .id_candidate(node)
            .into_iter()
            .chain(self.class_candidate(node))
            .chain(self.attribute_candidates(node))
            .chain(positional_candidates(node));

        for (selector, strategy) in candidates {
            if page.selects_only(&selector, node)? {
                debug!(selector = %selector, strategy = %strategy, "Generated selector");
                return Ok(GeneratedSelector { selector, strategy });
            }
        }

        let selector = self.path_selector(page, node)?;
        let matches = page.count(&selector)?;
        if matches == 1 && page.selects_only(&selector, node)? {
            debug!(selector = %selector, strategy = %SelectorStrategy::Path, "Generated selector");
            return Ok(GeneratedSelector {
                selector,
                strategy: SelectorStrategy::Path,
            });
        }

        Err(DomError::SelectorAmbiguous { selector, matches })
    }

    fn id_candidate(&self, node: ElementRef<'_>) -> Option<(String, SelectorStrategy)> {
        let id = node.value().id()?;
        if self.volatility.is_volatile(id) {
            debug!(id, "Skipping volatile id");
            return None;
        }
        Some((format!("#{}", escape_ident(id)), SelectorStrategy::Id))
    }

    fn class_candidate(&self, node: ElementRef<'_>) -> Option<(String, SelectorStrategy)> {
        let stable: Vec<&str> = node
            .value()
            .classes()
            .filter(|class| !self.volatility.is_volatile(class))
            .collect();
        if stable.is_empty() {
            return None;
        }

        let mut selector = escape_ident(node.value().name());
        for class in stable {
            selector.push('.');
            selector.push_str(&escape_ident(class));
        }
        Some((selector, SelectorStrategy::Classes))
    }

    fn attribute_candidates(&self, node: ElementRef<'_>) -> Vec<(String, SelectorStrategy)> {
        let tag = escape_ident(node.value().name());
        let clauses: Vec<String> = self
            .config
            .attribute_priority
            .iter()
            .filter_map(|name| {
                let value = node.value().attr(name)?;
                (!self.volatility.is_volatile(value)).then(|| attribute_clause(name, value))
            })
            .collect();

        let mut candidates: Vec<(String, SelectorStrategy)> = clauses
            .iter()
            .map(|clause| (format!("{tag}{clause}"), SelectorStrategy::Attributes))
            .collect();

        if self.config.max_attribute_clauses >= 2 {
            for (i, first) in clauses.iter().enumerate() {
                for second in &clauses[i + 1..] {
                    candidates.push((format!("{tag}{first}{second}"), SelectorStrategy::Attributes));
                }
            }
        }
        candidates
    }

    fn path_selector(&self, page: &Page, node: ElementRef<'_>) -> Result<String> {
        let mut segments = Vec::new();
        let chain = std::iter::once(node).chain(ancestors(node));

        for el in chain {
            if el.id() != node.id() {
                if let Some(id) = el.value().id() {
                    if !self.volatility.is_volatile(id) {
                        let anchor = format!("#{}", escape_ident(id));
                        if page.selects_only(&anchor, el)? {
                            segments.push(anchor);
                            break;
                        }
                    }
                }
            }

            let tag = escape_ident(el.value().name());
            if el.parent().and_then(ElementRef::wrap).is_none() {
                segments.push(tag);
                break;
            }
            segments.push(format!("{tag}:nth-child({})", sibling_index(el, false)));
        }

        segments.reverse();
        Ok(segments.join(" > "))
    }
}

fn positional_candidates(node: ElementRef<'_>) -> Vec<(String, SelectorStrategy)> {
    let tag = escape_ident(node.value().name());
    let mut candidates = vec![(tag.clone(), SelectorStrategy::Positional)];
    if has_same_tag_siblings(node) {
        candidates.push((
            format!("{tag}:nth-of-type({})", sibling_index(node, true)),
            SelectorStrategy::Positional,
        ));
    }
    candidates
}

fn has_same_tag_siblings(node: ElementRef<'_>) -> bool {
    let tag = node.value().name();
    node.prev_siblings()
        .chain(node.next_siblings())
        .filter_map(ElementRef::wrap)
        .any(|sibling| sibling.value().name() == tag)
}

/// 1-based position among element siblings, optionally only same-tag ones.
fn sibling_index(node: ElementRef<'_>, same_tag: bool) -> usize {
    let tag = node.value().name();
    1 + node
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|sibling| !same_tag || sibling.value().name() == tag)
        .count()
}

fn attribute_clause(name: &str, value: &str) -> String {
    format!("[{}=\"{}\"]", escape_ident(name), escape_string(value))
}

/// Escape a CSS identifier (id, class, tag or attribute name).
#[must_use]
pub fn escape_ident(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let leading_hyphen = value.starts_with('-');
    for (i, c) in value.chars().enumerate() {
        let leading_digit = c.is_ascii_digit() && (i == 0 || (i == 1 && leading_hyphen));
        if leading_digit || c.is_ascii_control() {
            let _ = write!(out, "\\{:x} ", u32::from(c));
        } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Escape a double-quoted CSS string body.
#[must_use]
pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\{:x} ", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out
}
