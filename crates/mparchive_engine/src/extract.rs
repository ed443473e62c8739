use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::{NodeId, NodeRef};
use mparchive_core::{Metadata, NoiseRules};
use mparchive_logging::{archive_debug, archive_warn};
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

pub const CONTENT_SELECTOR: &str = "#js_content";

/// Attributes that hold the real image source before hydration.
const LAZY_SRC_ATTRS: &[&str] = &["data-src"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Script variables carrying the publish time, in order of preference.
static PUBLISH_TIME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"var\s+publish_time\s*=\s*"(\d+)""#,
        r#"var\s+ct\s*=\s*"(\d+)""#,
        r#"\bct\s*=\s*"(\d+)""#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid publish time regex"))
    .collect()
});

#[derive(Debug, Clone, Copy)]
enum FieldSource {
    /// Whitespace-normalized text of the first matching element.
    Text(&'static str),
    /// `content` attribute of the first matching meta tag.
    MetaContent(&'static str),
}

const TITLE_SOURCES: &[FieldSource] = &[
    FieldSource::Text("#activity-name"),
    FieldSource::MetaContent(r#"meta[property="og:title"]"#),
];
const AUTHOR_SOURCES: &[FieldSource] = &[
    FieldSource::Text("#js_author_name"),
    FieldSource::Text("#author"),
    FieldSource::Text("#js_name"),
];
const ACCOUNT_SOURCES: &[FieldSource] = &[
    FieldSource::Text("#js_name"),
    FieldSource::MetaContent(r#"meta[property="og:site_name"]"#),
];
const COVER_SOURCES: &[FieldSource] = &[FieldSource::MetaContent(r#"meta[property="og:image"]"#)];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("could not find article content ({selector})")]
    ContentNotFound { selector: String },
}

pub trait Extractor: Send + Sync {
    fn extract_metadata(&self, html: &str) -> Metadata;
    /// Cleaned inner HTML of the content container. Empty output is valid.
    fn extract_content(&self, html: &str) -> Result<String, ExtractError>;
}

/// Extractor for WeChat public-account article pages.
#[derive(Debug, Clone)]
pub struct WeChatExtractor {
    rules: NoiseRules,
    boilerplate: Vec<Selector>,
}

impl Default for WeChatExtractor {
    fn default() -> Self {
        Self::new(NoiseRules::default())
    }
}

impl WeChatExtractor {
    pub fn new(rules: NoiseRules) -> Self {
        let boilerplate = rules
            .boilerplate_selectors
            .iter()
            .filter_map(|css| match Selector::parse(css) {
                Ok(sel) => Some(sel),
                Err(err) => {
                    archive_warn!("extract: bad boilerplate selector {}: {}", css, err);
                    None
                }
            })
            .collect();
        Self { rules, boilerplate }
    }

    fn mark_noise(&self, container: ElementRef<'_>, removed: &mut HashSet<NodeId>) {
        // Document order: parents are judged on their full text before children.
        for node in container.descendants().skip(1) {
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            if is_detached(node, removed) {
                continue;
            }
            let mut text = String::new();
            collect_text(node, removed, &mut text);
            let tag = element.value().name();
            if self.rules.is_guarded_container(tag, &text) {
                continue;
            }
            if self.rules.is_noise(&text) {
                archive_debug!("extract: dropping noise <{}> {:?}", tag, text.trim());
                removed.insert(node.id());
            }
        }
    }
}

impl Extractor for WeChatExtractor {
    fn extract_metadata(&self, html: &str) -> Metadata {
        let doc = Html::parse_document(html);
        Metadata {
            title: first_value(&doc, TITLE_SOURCES),
            author: first_value(&doc, AUTHOR_SOURCES),
            account_name: first_value(&doc, ACCOUNT_SOURCES),
            publish_date: publish_date(html),
            cover_image: first_value(&doc, COVER_SOURCES),
        }
    }

    fn extract_content(&self, html: &str) -> Result<String, ExtractError> {
        let doc = Html::parse_document(html);
        let container = Selector::parse(CONTENT_SELECTOR)
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .ok_or_else(|| ExtractError::ContentNotFound {
                selector: CONTENT_SELECTOR.to_string(),
            })?;

        let mut removed = HashSet::new();
        if let Ok(scripts) = Selector::parse("script, style") {
            removed.extend(container.select(&scripts).map(|el| el.id()));
        }
        for sel in &self.boilerplate {
            removed.extend(container.select(sel).map(|el| el.id()));
        }
        self.mark_noise(container, &mut removed);

        let mut out = String::new();
        for child in container.children() {
            serialize_node(child, &removed, &mut out);
        }
        Ok(out)
    }
}

fn first_value(doc: &Html, sources: &[FieldSource]) -> String {
    sources
        .iter()
        .find_map(|source| match *source {
            FieldSource::Text(css) => {
                let sel = Selector::parse(css).ok()?;
                let text = doc.select(&sel).next()?.text().collect::<String>();
                let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
                (!normalized.is_empty()).then_some(normalized)
            }
            FieldSource::MetaContent(css) => {
                let sel = Selector::parse(css).ok()?;
                let content = doc.select(&sel).next()?.value().attr("content")?.trim();
                (!content.is_empty()).then(|| content.to_string())
            }
        })
        .unwrap_or_default()
}

fn publish_date(html: &str) -> String {
    PUBLISH_TIME_PATTERNS
        .iter()
        .filter_map(|re| re.captures(html))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<i64>().ok())
        .find_map(Metadata::iso_from_unix_seconds)
        .unwrap_or_default()
}

fn is_detached(node: NodeRef<'_, Node>, removed: &HashSet<NodeId>) -> bool {
    removed.contains(&node.id()) || node.ancestors().any(|a| removed.contains(&a.id()))
}

fn collect_text(node: NodeRef<'_, Node>, removed: &HashSet<NodeId>, out: &mut String) {
    for child in node.children() {
        if removed.contains(&child.id()) {
            continue;
        }
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => collect_text(child, removed, out),
            _ => {}
        }
    }
}

fn serialize_node(node: NodeRef<'_, Node>, removed: &HashSet<NodeId>, out: &mut String) {
    if removed.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(text) => escape_into(text, false, out),
        Node::Element(element) => {
            let name = element.name();
            let lazy_src = if name == "img" {
                LAZY_SRC_ATTRS
                    .iter()
                    .find_map(|attr| element.attr(attr))
                    .filter(|src| !src.trim().is_empty())
            } else {
                None
            };

            out.push('<');
            out.push_str(name);
            for (key, value) in element.attrs() {
                if lazy_src.is_some() && key == "src" {
                    continue;
                }
                push_attr(key, value, out);
            }
            if let Some(src) = lazy_src {
                push_attr("src", src, out);
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&name) {
                return;
            }
            for child in node.children() {
                serialize_node(child, removed, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        _ => {}
    }
}

fn push_attr(key: &str, value: &str, out: &mut String) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    escape_into(value, true, out);
    out.push('"');
}

fn escape_into(text: &str, in_attr: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' if in_attr => out.push_str("&quot;"),
            '<' if !in_attr => out.push_str("&lt;"),
            '>' if !in_attr => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}
