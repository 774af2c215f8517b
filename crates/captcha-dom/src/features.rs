//! Feature extraction for candidate nodes.
//!
//! The extractor only collects; judging relevance is left to the rule
//! scorer. It never fails: nodes that cannot be measured produce a record
//! with zero width and height.

use crate::geometry::Size;
use crate::page::{
    ancestors, collapse_whitespace, contains, descendants, element_text, is_text_entry,
    truncate_chars, Page,
};
use crate::NodeId;
use captcha_core::FeatureConfig;
use scraper::ElementRef;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Natural sizes of loaded images, keyed by node.
pub type SizeHints = HashMap<NodeId, Size>;

/// Attributes whose values feed keyword tests.
const KEYWORD_ATTRIBUTES: &[&str] = &[
    "id",
    "class",
    "name",
    "alt",
    "title",
    "placeholder",
    "aria-label",
];

/// Tags that commonly act as clickable refresh controls.
const CONTROL_TAGS: &[&str] = &[
    "a", "button", "span", "i", "em", "img", "div", "input", "label", "p", "svg", "font",
];

/// Longest own text of a control still considered its label.
const CONTROL_TEXT_LIMIT: usize = 40;

/// Normalized description of a candidate node.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Lowercase tag name
    pub tag: String,
    /// All attributes of the node
    pub attributes: BTreeMap<String, String>,
    /// Rendered width in px (0 when unknown)
    pub width: f64,
    /// Rendered height in px (0 when unknown)
    pub height: f64,
    /// Width / height, 0 when the height is zero
    pub aspect_ratio: f64,
    /// Label and neighbourhood text, collapsed and truncated
    pub nearby_text: String,
    /// A visible text input shares the neighbourhood
    pub has_nearby_input: bool,
    /// A refresh-looking control shares the neighbourhood
    pub has_nearby_refresh_control: bool,
    /// The node sits inside a form-like container
    pub in_form: bool,
    /// Lowercase concatenation of keyword-bearing attributes and nearby text
    pub keyword_text: String,
}

impl FeatureRecord {
    /// Zero-size or detached node. Scores low, never an error.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.size().is_empty()
    }

    /// Rendered size.
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Attribute value by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Builds [`FeatureRecord`]s from page nodes.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    refresh_keywords: Vec<String>,
}

impl FeatureExtractor {
    /// Create an extractor.
    #[must_use]
    pub fn new(config: FeatureConfig) -> Self {
        let refresh_keywords = config
            .refresh_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        Self {
            config,
            refresh_keywords,
        }
    }

    /// Extraction settings.
    #[must_use]
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Describe `node`.
    ///
    /// `natural` is the intrinsic size of a loaded image, used when the
    /// page declares no size for the node.
    #[must_use]
    pub fn extract(&self, page: &Page, node: ElementRef<'_>, natural: Option<Size>) -> FeatureRecord {
        let tag = node.value().name().to_string();
        let size = page.measure(node, natural);
        if size.is_empty() {
            debug!(tag = %tag, "Degraded feature record: node has no rendered size");
        }

        let hood = page.neighborhood(node, self.config.neighborhood_depth);
        let nearby_text = self.nearby_text(page, node, hood);

        let has_nearby_input = descendants(hood)
            .any(|el| el.id() != node.id() && is_text_entry(el) && !page.is_hidden(el));

        let has_nearby_refresh_control = self.is_self_refreshing(node)
            || descendants(hood).any(|el| {
                el.id() != node.id() && !contains(el, node) && self.is_refresh_control(el)
            });

        let in_form = page.form_ancestor(node).is_some();

        let attributes: BTreeMap<String, String> = node
            .value()
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        let keyword_text = keyword_text(node, &nearby_text);

        FeatureRecord {
            tag,
            attributes,
            width: size.width,
            height: size.height,
            aspect_ratio: size.aspect_ratio(),
            nearby_text,
            has_nearby_input,
            has_nearby_refresh_control,
            in_form,
            keyword_text,
        }
    }

    /// Whether an element looks like a control that reloads the challenge.
    #[must_use]
    pub fn is_refresh_control(&self, el: ElementRef<'_>) -> bool {
        if !CONTROL_TAGS.contains(&el.value().name()) {
            return false;
        }
        let mut text = control_attribute_text(el);
        let own = element_text(el);
        if !own.is_empty() && own.chars().count() <= CONTROL_TEXT_LIMIT {
            text.push(' ');
            text.push_str(&own.to_lowercase());
        }
        self.matches_refresh(&text)
    }

    /// Whether the text contains a refresh keyword.
    #[must_use]
    pub fn matches_refresh(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.refresh_keywords.iter().any(|k| lowered.contains(k.as_str()))
    }

    fn is_self_refreshing(&self, node: ElementRef<'_>) -> bool {
        ["title", "onclick"]
            .iter()
            .filter_map(|attr| node.value().attr(attr))
            .any(|value| self.matches_refresh(value))
    }

    fn nearby_text(&self, page: &Page, node: ElementRef<'_>, hood: ElementRef<'_>) -> String {
        let mut parts = vec![page.label_text(node)];
        if hood.id() != node.id() {
            parts.push(element_text(hood));
        }
        parts.retain(|p| !p.is_empty());
        truncate_chars(&collapse_whitespace(&parts.join(" ")), self.config.nearby_text_limit)
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

/// Filename segment of a `src` URL, empty for inline data.
#[must_use]
pub fn src_segment(src: &str) -> &str {
    if src.trim_start().starts_with("data:") {
        return "";
    }
    let path = src.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default()
}

/// Keyword-bearing attributes of an element, lowercased and space-joined.
#[must_use]
pub fn attribute_text(el: ElementRef<'_>) -> String {
    let value = el.value();
    let mut parts: Vec<String> = KEYWORD_ATTRIBUTES
        .iter()
        .filter_map(|attr| value.attr(attr))
        .map(str::to_lowercase)
        .collect();
    if let Some(src) = value.attr("src") {
        parts.push(src_segment(src).to_lowercase());
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

fn keyword_text(node: ElementRef<'_>, nearby_text: &str) -> String {
    let mut text = attribute_text(node);
    if !nearby_text.is_empty() {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&nearby_text.to_lowercase());
    }
    text
}

fn control_attribute_text(el: ElementRef<'_>) -> String {
    let value = el.value();
    let mut text = attribute_text(el);
    for attr in ["onclick", "value"] {
        if let Some(v) = value.attr(attr) {
            text.push(' ');
            text.push_str(&v.to_lowercase());
        }
    }
    // Icon fonts put the meaning on a parent's class.
    if let Some(parent) = ancestors(el).next() {
        if matches!(parent.value().name(), "a" | "button") {
            text.push(' ');
            text.push_str(&attribute_text(parent));
        }
    }
    text
}
