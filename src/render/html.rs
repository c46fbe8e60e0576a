//! Self-contained HTML documents
//!
//! Images are embedded as base64 `data:` URIs so one file carries the whole
//! post. Images follow the body text, in reference order.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use maud::{html, Markup, DOCTYPE};
use std::sync::Arc;

use super::text::{clean_for_path, extract_paragraphs, format_long_date, format_timestamp, join_terms};
use super::{Artifact, DocumentRenderer, RenderError};
use crate::output::path::artifact_file_name;
use crate::{ItemDescriptor, MediaAsset, TermKind};

const STYLE: &str = "body{max-width:46rem;margin:2rem auto;padding:0 1rem;\
font-family:Georgia,serif;line-height:1.6;color:#222}\
h1,.meta{text-align:center}.meta{color:#555}\
hr{border:0;border-top:1px solid #ccc;margin:1rem 0}\
figure{margin:2rem 0;text-align:center}figure img{max-width:100%;height:auto}\
.error{color:#a00;white-space:pre-wrap}";

/// Renders items as HTML with embedded images
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    /// New renderer
    pub fn new() -> Self {
        Self
    }
}

impl DocumentRenderer for HtmlRenderer {
    fn render(
        &self,
        item: &ItemDescriptor,
        media: &[Arc<MediaAsset>],
    ) -> Result<Artifact, RenderError> {
        item.validate().map_err(RenderError::InvalidItem)?;

        let title = display_title(item);
        let paragraphs = extract_paragraphs(&item.body);
        let categories = join_terms(item.terms_of(TermKind::Category));
        let tags = join_terms(item.terms_of(TermKind::Tag));

        let images = media
            .iter()
            .filter(|asset| asset.is_success() && !asset.bytes.is_empty())
            .map(|asset| data_uri(asset))
            .collect::<Result<Vec<_>, _>>()?;

        let content = html! {
            article {
                h1 { (title) }
                hr;
                p.meta.date { (format_timestamp(&item.published)) }
                hr;
                @if !categories.is_empty() {
                    p.meta.categories { "Categories: " (categories) }
                }
                @if !tags.is_empty() {
                    p.meta.tags { "Tags: " (tags) }
                }
                @if !categories.is_empty() || !tags.is_empty() {
                    hr;
                }
                @for paragraph in &paragraphs {
                    p { (paragraph) }
                }
                @for src in &images {
                    figure {
                        img src=(src) alt="";
                    }
                }
            }
        };

        Ok(Artifact {
            file_name: artifact_file_name(item.id),
            bytes: base_document(title, content).into_string().into_bytes(),
        })
    }
}

/// Error page for an item that could not be converted.
///
/// Named `{id}_{slug}.html` so the errors directory stays readable while
/// remaining keyed by the item id.
pub fn render_error_document(item: &ItemDescriptor, reason: &str) -> Artifact {
    let title = display_title(item);
    let content = html! {
        article {
            h1 { "Conversion failed" }
            hr;
            dl {
                dt { "Post ID" } dd { (item.id) }
                dt { "Title" } dd { (title) }
                dt { "Date" } dd { (format_long_date(&item.published)) }
            }
            h2 { "Error details" }
            p.error { (reason) }
        }
    };

    Artifact {
        file_name: format!("{}_{}.html", item.id, clean_for_path(&item.title)),
        bytes: base_document(&format!("Error: {title}"), content)
            .into_string()
            .into_bytes(),
    }
}

fn display_title(item: &ItemDescriptor) -> &str {
    if item.title.trim().is_empty() {
        "Untitled"
    } else {
        &item.title
    }
}

fn data_uri(asset: &MediaAsset) -> Result<String, RenderError> {
    let content_type = asset.content_type.trim();
    if content_type.is_empty() || !content_type.starts_with("image/") {
        return Err(RenderError::Encoding(format!(
            "{} has non-image content type '{}'",
            asset.url, asset.content_type
        )));
    }
    Ok(format!("data:{content_type};base64,{}", STANDARD.encode(&asset.bytes)))
}

fn base_document(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
                style { (STYLE) }
            }
            body {
                (content)
            }
        }
    }
}
