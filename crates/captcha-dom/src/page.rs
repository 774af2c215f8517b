//! Parsed document snapshots.
//!
//! A [`Page`] owns a parsed HTML tree plus the layout boxes the embedding
//! browser reported for it. Everything downstream (features, selectors,
//! related elements) reads the page and never mutates it.

use crate::error::{DomError, Result};
use crate::geometry::{Rect, Size};
use ego_tree::NodeId;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A parsed document plus optional layout information.
pub struct Page {
    html: Html,
    layout: HashMap<NodeId, Rect>,
    url: Option<String>,
}

impl Page {
    /// Parse a full HTML document.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
            layout: HashMap::new(),
            url: None,
        }
    }

    /// Attach the URL the document was loaded from.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// URL the document was loaded from, if known.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// The `<html>` element.
    #[must_use]
    pub fn root(&self) -> ElementRef<'_> {
        self.html.root_element()
    }

    /// All elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.root().descendants().filter_map(ElementRef::wrap)
    }

    /// Look up an element by node id.
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    /// Parse a CSS selector.
    pub fn parse_selector(selector: &str) -> Result<Selector> {
        Selector::parse(selector).map_err(|e| DomError::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })
    }

    /// All elements matching a selector, in document order.
    pub fn select(&self, selector: &str) -> Result<Vec<ElementRef<'_>>> {
        let parsed = Self::parse_selector(selector)?;
        Ok(self.html.select(&parsed).collect())
    }

    /// Number of elements matching a selector.
    pub fn count(&self, selector: &str) -> Result<usize> {
        let parsed = Self::parse_selector(selector)?;
        Ok(self.html.select(&parsed).count())
    }

    /// Resolve a selector that must match exactly one element.
    pub fn resolve_unique(&self, selector: &str) -> Result<ElementRef<'_>> {
        let matches = self.select(selector)?;
        match matches.as_slice() {
            [only] => Ok(*only),
            _ => Err(DomError::SelectorAmbiguous {
                selector: selector.to_string(),
                matches: matches.len(),
            }),
        }
    }

    /// Whether `selector` matches exactly `node` and nothing else.
    pub fn selects_only(&self, selector: &str, node: ElementRef<'_>) -> Result<bool> {
        let parsed = Self::parse_selector(selector)?;
        let mut matches = self.html.select(&parsed);
        let first = matches.next();
        Ok(matches.next().is_none() && first.is_some_and(|el| el.id() == node.id()))
    }

    /// Record a layout box for every element matching `selector`.
    ///
    /// Returns the number of elements updated.
    pub fn set_layout(&mut self, selector: &str, rect: Rect) -> Result<usize> {
        let ids: Vec<NodeId> = self.select(selector)?.iter().map(|el| el.id()).collect();
        for id in &ids {
            self.layout.insert(*id, rect);
        }
        Ok(ids.len())
    }

    /// Record a layout box for a single node.
    pub fn set_layout_for(&mut self, node: NodeId, rect: Rect) -> Result<()> {
        if self.element(node).is_none() {
            return Err(DomError::UnknownNode);
        }
        self.layout.insert(node, rect);
        Ok(())
    }

    /// Layout box reported for a node, if any.
    #[must_use]
    pub fn bounds(&self, node: ElementRef<'_>) -> Option<Rect> {
        self.layout.get(&node.id()).copied()
    }

    /// Whether the node or any ancestor is hidden from rendering.
    #[must_use]
    pub fn is_hidden(&self, node: ElementRef<'_>) -> bool {
        let value = node.value();
        if value.name() == "input"
            && value
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
        {
            return true;
        }
        std::iter::once(node)
            .chain(ancestors(node))
            .any(|el| el.value().attr("hidden").is_some() || style_hides(el))
    }

    /// Rendered size of a node.
    ///
    /// Hidden nodes measure zero. A reported layout box wins; otherwise the
    /// declared `width`/`height` (attribute or inline style) is used, filled
    /// in from `natural` (e.g. a loaded image's intrinsic size) when only
    /// partially declared.
    #[must_use]
    pub fn measure(&self, node: ElementRef<'_>, natural: Option<Size>) -> Size {
        if self.is_hidden(node) {
            return Size::ZERO;
        }
        if let Some(rect) = self.bounds(node) {
            return rect.size();
        }

        let (width, height) = declared_dimensions(node);
        match (width, height, natural) {
            (Some(w), Some(h), _) => Size::new(w, h),
            (Some(w), None, Some(n)) if n.width > 0.0 => Size::new(w, n.height * w / n.width),
            (None, Some(h), Some(n)) if n.height > 0.0 => Size::new(n.width * h / n.height, h),
            (None, None, Some(n)) => n,
            (w, h, _) => Size::new(w.unwrap_or(0.0), h.unwrap_or(0.0)),
        }
    }

    /// Number of tree edges between two nodes.
    #[must_use]
    pub fn hop_distance(&self, a: ElementRef<'_>, b: ElementRef<'_>) -> usize {
        let chain_a: Vec<NodeId> = a.ancestors().map(|n| n.id()).collect();
        let index_a: HashMap<NodeId, usize> = std::iter::once(a.id())
            .chain(chain_a)
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        std::iter::once(b.id())
            .chain(b.ancestors().map(|n| n.id()))
            .enumerate()
            .find_map(|(hops_b, id)| index_a.get(&id).map(|hops_a| hops_a + hops_b))
            .unwrap_or(usize::MAX)
    }

    /// Distance between two nodes in px.
    ///
    /// Uses layout box centers when both nodes have one, otherwise the tree
    /// hop count scaled by `hop_px`.
    #[must_use]
    pub fn distance(&self, a: ElementRef<'_>, b: ElementRef<'_>, hop_px: f64) -> f64 {
        match (self.bounds(a), self.bounds(b)) {
            (Some(ra), Some(rb)) => ra.center_distance(&rb),
            #[allow(clippy::cast_precision_loss)]
            _ => self.hop_distance(a, b) as f64 * hop_px,
        }
    }

    /// Nearest form-like ancestor (`<form>` or `role="form"`).
    #[must_use]
    pub fn form_ancestor<'a>(&self, node: ElementRef<'a>) -> Option<ElementRef<'a>> {
        ancestors(node).find(|el| is_form_like(*el))
    }

    /// Container that bounds the node's neighbourhood.
    ///
    /// The nearest form-like ancestor within `depth` levels, otherwise the
    /// ancestor `depth` levels up (or the outermost one reached).
    #[must_use]
    pub fn neighborhood<'a>(&self, node: ElementRef<'a>, depth: usize) -> ElementRef<'a> {
        let mut current = node;
        for (level, ancestor) in ancestors(node).enumerate() {
            if is_form_like(ancestor) {
                return ancestor;
            }
            current = ancestor;
            if level + 1 >= depth {
                break;
            }
        }
        current
    }

    /// Text of `<label>` elements describing the node.
    #[must_use]
    pub fn label_text(&self, node: ElementRef<'_>) -> String {
        let mut parts = Vec::new();
        if let Some(id) = node.value().id() {
            parts.extend(
                self.elements()
                    .filter(|el| el.value().name() == "label" && el.value().attr("for") == Some(id))
                    .map(element_text),
            );
        }
        if let Some(label) = ancestors(node).find(|el| el.value().name() == "label") {
            parts.push(element_text(label));
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }
}

/// Element ancestors of a node, nearest first.
pub fn ancestors(node: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    node.ancestors().filter_map(ElementRef::wrap)
}

/// Element descendants of a node (excluding the node itself).
pub fn descendants(node: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    node.descendants().skip(1).filter_map(ElementRef::wrap)
}

/// Whether `ancestor` contains `node`.
#[must_use]
pub fn contains(ancestor: ElementRef<'_>, node: ElementRef<'_>) -> bool {
    node.ancestors().any(|n| n.id() == ancestor.id())
}

/// `<form>` or an element with `role="form"`.
#[must_use]
pub fn is_form_like(el: ElementRef<'_>) -> bool {
    el.value().name() == "form"
        || el
            .value()
            .attr("role")
            .is_some_and(|r| r.eq_ignore_ascii_case("form"))
}

/// Single-line text input suitable for typing a challenge answer.
#[must_use]
pub fn is_text_entry(el: ElementRef<'_>) -> bool {
    if el.value().name() != "input" {
        return false;
    }
    let kind = el
        .value()
        .attr("type")
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    matches!(kind.as_str(), "" | "text" | "tel" | "number" | "search")
}

/// Collapsed, trimmed text content of an element.
#[must_use]
pub fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Replace whitespace runs with single spaces and trim.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `limit` characters on a char boundary.
#[must_use]
pub fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn style_hides(el: ElementRef<'_>) -> bool {
    el.value().attr("style").is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    })
}

fn declared_dimensions(el: ElementRef<'_>) -> (Option<f64>, Option<f64>) {
    static WIDTH: OnceLock<Regex> = OnceLock::new();
    static HEIGHT: OnceLock<Regex> = OnceLock::new();
    let width_re = WIDTH.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[;\s])width\s*:\s*([0-9]+(?:\.[0-9]+)?)\s*px").expect("valid regex")
    });
    let height_re = HEIGHT.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[;\s])height\s*:\s*([0-9]+(?:\.[0-9]+)?)\s*px").expect("valid regex")
    });

    let style = el.value().attr("style").unwrap_or_default();
    let from_style = |re: &Regex| {
        re.captures(style)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    };

    let width = from_style(width_re).or_else(|| el.value().attr("width").and_then(parse_px));
    let height = from_style(height_re).or_else(|| el.value().attr("height").and_then(parse_px));
    (width, height)
}

fn parse_px(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix("px").unwrap_or(trimmed).trim();
    number.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = r#"
        <html><body>
          <form id="login">
            <label for="code">Verification code</label>
            <input id="code" name="vcode" type="text">
            <img id="captcha" src="/captcha.php?r=1" width="120" height="40">
            <input type="hidden" name="token" value="x">
          </form>
          <div style="display: none"><img id="ghost" width="120" height="40"></div>
          <img id="styled" style="width: 90px; height:30px">
          <img id="partial" width="100">
        </body></html>
    "#;

    #[test]
    fn test_resolve_unique() {
        let page = Page::parse(LOGIN);
        let img = page.resolve_unique("#captcha").expect("unique");
        assert_eq!(img.value().name(), "img");

        let err = page.resolve_unique("img").unwrap_err();
        assert!(matches!(err, DomError::SelectorAmbiguous { matches: 4, .. }));

        let err = page.resolve_unique("#missing").unwrap_err();
        assert!(matches!(err, DomError::SelectorAmbiguous { matches: 0, .. }));

        assert!(matches!(
            page.select("img[").unwrap_err(),
            DomError::InvalidSelector { .. }
        ));
    }

    #[test]
    fn test_measure() {
        fn el(page: &Page, id: NodeId) -> ElementRef<'_> {
            page.element(id).expect("element")
        }

        let mut page = Page::parse(LOGIN);
        let captcha = page.resolve_unique("#captcha").expect("captcha").id();
        let styled = page.resolve_unique("#styled").expect("styled").id();
        let ghost = page.resolve_unique("#ghost").expect("ghost").id();
        let partial = page.resolve_unique("#partial").expect("partial").id();

        assert_eq!(page.measure(el(&page, captcha), None), Size::new(120.0, 40.0));
        assert_eq!(page.measure(el(&page, styled), None), Size::new(90.0, 30.0));
        assert_eq!(page.measure(el(&page, ghost), None), Size::ZERO);
        assert_eq!(
            page.measure(el(&page, partial), Some(Size::new(200.0, 50.0))),
            Size::new(100.0, 25.0)
        );

        page.set_layout("#captcha", Rect::new(10.0, 10.0, 150.0, 50.0))
            .expect("set layout");
        assert_eq!(page.measure(el(&page, captcha), None), Size::new(150.0, 50.0));
    }

    #[test]
    fn test_neighborhood_and_labels() {
        let page = Page::parse(LOGIN);
        let input = page.resolve_unique("#code").expect("input");
        let img = page.resolve_unique("#captcha").expect("img");

        let hood = page.neighborhood(img, 3);
        assert_eq!(hood.value().id(), Some("login"));
        assert!(page.form_ancestor(img).is_some());
        assert_eq!(page.label_text(input), "Verification code");
        assert!(is_text_entry(input));
        assert_eq!(page.hop_distance(img, input), 2);
        assert!((page.distance(img, input, 40.0) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_hidden_inputs() {
        let page = Page::parse(LOGIN);
        let token = page.resolve_unique("input[name=token]").expect("token");
        assert!(page.is_hidden(token));
        assert!(!is_text_entry(token));
    }
}
