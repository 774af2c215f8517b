//! Discovery of the elements that accompany a challenge.

use captcha_core::{RelatedConfig, RelatedElement, RelatedRole, ScanConfig};
use captcha_dom::features::attribute_text;
use captcha_dom::page::{contains, descendants, is_text_entry};
use captcha_dom::{ElementRef, FeatureExtractor, NodeId, Page, SelectorGenerator};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Related nodes found for a challenge, before selector generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelatedNodes {
    /// Answer input
    pub input: Option<NodeId>,
    /// Refresh control
    pub refresh: Option<NodeId>,
    /// Submit control of the enclosing form
    pub submit: Option<NodeId>,
}

/// Finds inputs, refresh controls and submit controls near a challenge.
#[derive(Debug, Clone)]
pub struct RelatedFinder {
    config: RelatedConfig,
    challenge_keywords: Vec<String>,
    extractor: FeatureExtractor,
}

impl RelatedFinder {
    /// Create a finder.
    #[must_use]
    pub fn new(config: RelatedConfig, scan: &ScanConfig, extractor: FeatureExtractor) -> Self {
        Self {
            config,
            challenge_keywords: scan
                .challenge_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            extractor,
        }
    }

    /// Locate related nodes for `node`.
    #[must_use]
    pub fn find(&self, page: &Page, node: ElementRef<'_>) -> RelatedNodes {
        RelatedNodes {
            input: self.nearest_input(page, node).map(|el| el.id()),
            refresh: self.nearest_refresh(page, node).map(|el| el.id()),
            submit: submit_control(page, node).map(|el| el.id()),
        }
    }

    /// Locate related nodes and describe each with a unique selector.
    ///
    /// Elements whose selector cannot be made unique are left out.
    #[must_use]
    pub fn describe(
        &self,
        page: &Page,
        node: ElementRef<'_>,
        generator: &SelectorGenerator,
    ) -> Vec<RelatedElement> {
        let nodes = self.find(page, node);
        [
            (RelatedRole::Input, nodes.input),
            (RelatedRole::RefreshControl, nodes.refresh),
            (RelatedRole::SubmitControl, nodes.submit),
        ]
        .into_iter()
        .filter_map(|(role, id)| {
            let el = page.element(id?)?;
            match generator.generate(page, el) {
                Ok(generated) => Some(RelatedElement {
                    role,
                    selector: generated.selector,
                    attributes: el
                        .value()
                        .attrs()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                }),
                Err(e) => {
                    warn!(role = %role, error = %e, "dropping related element without unique selector");
                    None
                }
            }
        })
        .collect()
    }

    /// Nearest visible text input within range. Inputs that mention a
    /// challenge keyword win over closer ones that don't.
    fn nearest_input<'a>(&self, page: &'a Page, node: ElementRef<'a>) -> Option<ElementRef<'a>> {
        let best = page
            .elements()
            .filter(|el| el.id() != node.id() && is_text_entry(*el) && !page.is_hidden(*el))
            .map(|el| (el, page.distance(node, el, self.config.hop_distance_px)))
            .filter(|(_, d)| *d <= self.config.max_input_distance_px)
            .min_by(|(a, da), (b, db)| {
                let ka = !self.mentions_challenge(page, *a);
                let kb = !self.mentions_challenge(page, *b);
                ka.cmp(&kb).then(da.total_cmp(db))
            })
            .map(|(el, _)| el);

        if let Some(el) = best {
            debug!(distance_px = page.distance(node, el, self.config.hop_distance_px), "found related input");
        }
        best
    }

    fn nearest_refresh<'a>(&self, page: &'a Page, node: ElementRef<'a>) -> Option<ElementRef<'a>> {
        page.elements()
            .filter(|el| el.id() != node.id() && !contains(*el, node))
            .filter(|el| self.extractor.is_refresh_control(*el))
            .map(|el| (el, page.distance(node, el, self.config.hop_distance_px)))
            .filter(|(_, d)| *d <= self.config.max_refresh_distance_px)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(el, _)| el)
    }

    fn mentions_challenge(&self, page: &Page, el: ElementRef<'_>) -> bool {
        let text = format!("{} {}", attribute_text(el), page.label_text(el).to_lowercase());
        self.challenge_keywords
            .iter()
            .any(|k| text.contains(k.as_str()))
    }
}

/// Submit control of the form enclosing `node`.
fn submit_control<'a>(page: &Page, node: ElementRef<'a>) -> Option<ElementRef<'a>> {
    let form = page.form_ancestor(node)?;
    descendants(form).find(|el| {
        let kind = el
            .value()
            .attr("type")
            .map(str::to_ascii_lowercase);
        match el.value().name() {
            "button" => kind.as_deref().map_or(true, |k| k == "submit"),
            "input" => matches!(kind.as_deref(), Some("submit" | "image")),
            _ => false,
        }
    })
}
