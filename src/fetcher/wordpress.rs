//! WordPress REST content source
//!
//! Reads `wp/v2/posts` with embedded taxonomy terms and validates every record
//! into an [`ItemDescriptor`] before it leaves this module. A record that fails
//! validation becomes a [`RejectedItem`] in its page slot; its siblings are
//! unaffected.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::http::{parse_count_header, HttpClient};
use super::{ContentSource, FetcherError, FetcherResult, Page, PageEntry};
use crate::render::text::{clean_for_display, extract_image_sources};
use crate::{ItemDescriptor, RejectedItem, Term, TermKind};

/// Posts collection endpoint
pub const POSTS_ENDPOINT: &str = "/wp-json/wp/v2/posts";

/// Largest `per_page` WordPress accepts
pub const MAX_PAGE_SIZE: u32 = 100;

/// Fields requested from the API
const FIELDS: &str = "id,date,title,content,_embedded";

/// Error code WordPress returns for a page past the end
const INVALID_PAGE_CODE: &str = "rest_post_invalid_page_number";

/// Timestamp format of the `date` field
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct RawTerm {
    name: String,
    taxonomy: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEmbedded {
    #[serde(rename = "wp:term", default)]
    terms: Vec<Vec<RawTerm>>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: u64,
    date: String,
    title: Rendered,
    content: Rendered,
    #[serde(rename = "_embedded", default)]
    embedded: Option<RawEmbedded>,
}

/// `wp/v2/posts` source
#[derive(Clone)]
pub struct WordPressSource {
    http: HttpClient,
}

impl WordPressSource {
    /// Create a source on top of a configured HTTP client
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn page_params(page: u32, page_size: u32) -> Vec<(&'static str, String)> {
        vec![
            ("page", page.to_string()),
            ("per_page", page_size.to_string()),
            ("_embed", "true".to_string()),
            ("_fields", FIELDS.to_string()),
            ("orderby", "date".to_string()),
            ("order", "desc".to_string()),
        ]
    }
}

#[async_trait]
impl ContentSource for WordPressSource {
    async fn fetch_page(&self, page: u32, page_size: u32) -> FetcherResult<Page> {
        if page == 0 {
            return Err(FetcherError::InvalidResponse("page numbers start at 1".to_string()));
        }
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let params = Self::page_params(page, page_size);

        let (posts, headers) = match self
            .http
            .get_json::<Vec<serde_json::Value>>(POSTS_ENDPOINT, &params)
            .await
        {
            Ok(ok) => ok,
            Err(FetcherError::Client { status: 400, message }) if message.contains(INVALID_PAGE_CODE) => {
                debug!(page, "Page past the end of the collection");
                return Ok(Page::end());
            }
            Err(e) => return Err(e),
        };

        let total = parse_count_header(&headers, "X-WP-Total");
        let total_pages = parse_count_header(&headers, "X-WP-TotalPages");
        info!(
            page,
            received = posts.len(),
            total = ?total,
            total_pages = ?total_pages,
            "Fetched posts page"
        );

        let received = posts.len();
        let entries: Vec<PageEntry> = posts.into_iter().map(parse_record).collect();

        let has_more = match total_pages {
            Some(pages) => u64::from(page) < pages,
            None => received == page_size as usize,
        };

        Ok(Page { entries, has_more })
    }

    fn max_page_size(&self) -> u32 {
        MAX_PAGE_SIZE
    }

    fn name(&self) -> &str {
        self.http.base_url()
    }
}

/// Decode and validate one record, keeping failures as rejected entries
fn parse_record(value: serde_json::Value) -> PageEntry {
    let id = value.get("id").and_then(serde_json::Value::as_u64).unwrap_or(0);
    let title = value
        .pointer("/title/rendered")
        .and_then(serde_json::Value::as_str)
        .map(clean_for_display)
        .unwrap_or_default();

    let parsed = serde_json::from_value::<RawPost>(value)
        .map_err(|e| FetcherError::Parse(format!("post {id}: {e}")))
        .and_then(parse_post);
    match parsed {
        Ok(item) => PageEntry::Item(item),
        Err(e) => {
            warn!(post_id = id, error = %e, "Rejected post record");
            PageEntry::Rejected(RejectedItem {
                id,
                title,
                reason: e.to_string(),
            })
        }
    }
}

/// Validate one raw record into an item descriptor
fn parse_post(raw: RawPost) -> FetcherResult<ItemDescriptor> {
    let published = NaiveDateTime::parse_from_str(raw.date.trim(), DATE_FORMAT).map_err(|e| {
        FetcherError::InvalidResponse(format!("post {} has invalid date '{}': {e}", raw.id, raw.date))
    })?;

    let mut terms: Vec<Term> = Vec::new();
    for raw_term in raw
        .embedded
        .unwrap_or_default()
        .terms
        .into_iter()
        .flatten()
    {
        let Ok(kind) = raw_term.taxonomy.parse::<TermKind>() else {
            continue;
        };
        let name = clean_for_display(&raw_term.name);
        if name.is_empty() {
            continue;
        }
        let term = Term { name, kind };
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    let item = ItemDescriptor {
        id: raw.id,
        title: clean_for_display(&raw.title.rendered),
        media: extract_image_sources(&raw.content.rendered),
        body: raw.content.rendered,
        published,
        terms,
    };

    item.validate().map_err(FetcherError::InvalidResponse)?;

    Ok(item)
}
