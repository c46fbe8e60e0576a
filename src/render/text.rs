//! Markup-to-text helpers
//!
//! All markup handling goes through `scraper`'s HTML5 parser so entity
//! decoding and malformed-tag recovery match what a browser would show.

use chrono::NaiveDateTime;
use scraper::{ElementRef, Html, Node};

/// Placeholder paragraph for items without any body text
pub const NO_CONTENT: &str = "No content available";

/// Longest slug produced by [`clean_for_path`]
const MAX_SLUG_LEN: usize = 50;

/// Elements rendered as their own paragraph
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "figure", "figcaption",
    "table", "section", "article",
];

/// List containers; each `li` becomes one paragraph
const LIST_ELEMENTS: &[&str] = &["ul", "ol"];

/// Elements whose text is never shown
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Collapse runs of whitespace into single spaces and trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Plain display text: tags stripped, entities decoded, whitespace collapsed
pub fn clean_for_display(markup: &str) -> String {
    if markup.is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(markup);
    let mut out = String::new();
    collect_text(fragment.root_element(), &mut out);
    normalize_whitespace(&out)
}

/// Filesystem-safe slug: lowercase ASCII alphanumerics and `_`
pub fn clean_for_path(text: &str) -> String {
    let slug: String = text
        .trim()
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(MAX_SLUG_LEN)
        .collect();
    let slug = slug.trim_end_matches('_');

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// `src` of every `<img>` in document order, duplicates kept
pub fn extract_image_sources(markup: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(markup);
    fragment
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "img")
        .filter_map(|el| el.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split body markup into display paragraphs.
///
/// Top-level block elements become one paragraph each; loose text and inline
/// elements between blocks accumulate until the next block or `<br>`.
pub fn extract_paragraphs(markup: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(markup);
    let mut paragraphs = Vec::new();
    let mut pending = String::new();

    for child in fragment.root_element().children() {
        match child.value() {
            Node::Text(text) => pending.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                let Some(element) = ElementRef::wrap(child) else {
                    continue;
                };
                if HIDDEN_ELEMENTS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    flush(&mut pending, &mut paragraphs);
                } else if BLOCK_ELEMENTS.contains(&name) {
                    flush(&mut pending, &mut paragraphs);
                    let mut text = String::new();
                    collect_text(element, &mut text);
                    push_paragraph(&text, &mut paragraphs);
                } else if LIST_ELEMENTS.contains(&name) {
                    flush(&mut pending, &mut paragraphs);
                    for li in element
                        .children()
                        .filter_map(ElementRef::wrap)
                        .filter(|li| li.value().name() == "li")
                    {
                        let mut text = String::new();
                        collect_text(li, &mut text);
                        push_paragraph(&text, &mut paragraphs);
                    }
                } else {
                    collect_text(element, &mut pending);
                }
            }
            _ => {}
        }
    }
    flush(&mut pending, &mut paragraphs);

    if paragraphs.is_empty() {
        paragraphs.push(NO_CONTENT.to_string());
    }
    paragraphs
}

/// `YYYYMMDD @ HH:MM`
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y%m%d @ %H:%M").to_string()
}

/// `Month DD, YYYY`
pub fn format_long_date(ts: &NaiveDateTime) -> String {
    ts.format("%B %d, %Y").to_string()
}

/// Comma-separated list of cleaned, non-empty names
pub fn join_terms<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(clean_for_display)
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                if HIDDEN_ELEMENTS.contains(&el.name()) {
                    continue;
                }
                if el.name() == "br" {
                    out.push(' ');
                    continue;
                }
                if let Some(inner) = ElementRef::wrap(child) {
                    collect_text(inner, out);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

fn push_paragraph(text: &str, paragraphs: &mut Vec<String>) {
    let cleaned = normalize_whitespace(text);
    if !cleaned.is_empty() {
        paragraphs.push(cleaned);
    }
}

fn flush(pending: &mut String, paragraphs: &mut Vec<String>) {
    push_paragraph(pending, paragraphs);
    pending.clear();
}
