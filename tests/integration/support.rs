//! Shared fixtures: a WordPress posts endpoint on wiremock and pipeline wiring

use post_archiver::fetcher::http::HttpClient;
use post_archiver::fetcher::rate_limit::RateLimiter;
use post_archiver::fetcher::wordpress::{WordPressSource, POSTS_ENDPOINT};
use post_archiver::fetcher::RetryPolicy;
use post_archiver::media::MediaResolver;
use post_archiver::pipeline::{DocumentConverter, ItemConverter, RunConfig, RunOrchestrator};
use post_archiver::render::HtmlRenderer;
use post_archiver::resume::FileStateStore;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `total` posts with ids `1..=total`, paged like WordPress
pub struct PostsResponder {
    pub total: u64,
    /// Media reference per post id, written into the body as `<img src=..>`
    pub media: HashMap<u64, String>,
    /// Posts served with an unparseable `date`
    pub broken_dates: HashSet<u64>,
}

impl PostsResponder {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            media: HashMap::new(),
            broken_dates: HashSet::new(),
        }
    }

    pub fn with_broken_date(mut self, id: u64) -> Self {
        self.broken_dates.insert(id);
        self
    }

    pub fn with_media(mut self, id: u64, url: impl Into<String>) -> Self {
        self.media.insert(id, url.into());
        self
    }
}

impl Respond for PostsResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let page: u64 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        let per_page: u64 = query.get("per_page").and_then(|p| p.parse().ok()).unwrap_or(10);
        let total_pages = self.total.div_ceil(per_page).max(1);

        if page > total_pages {
            return ResponseTemplate::new(400).set_body_json(json!({
                "code": "rest_post_invalid_page_number",
                "message": "The page number requested is larger than the number of pages available.",
            }));
        }

        let start = (page - 1) * per_page;
        let end = (start + per_page).min(self.total);
        let posts: Vec<_> = (start + 1..=end).map(|id| self.post(id)).collect();

        ResponseTemplate::new(200)
            .set_body_json(posts)
            .insert_header("X-WP-Total", self.total.to_string().as_str())
            .insert_header("X-WP-TotalPages", total_pages.to_string().as_str())
    }
}

impl PostsResponder {
    fn post(&self, id: u64) -> serde_json::Value {
        let image = self
            .media
            .get(&id)
            .map(|url| format!("<img src=\"{url}\">"))
            .unwrap_or_default();
        let date = if self.broken_dates.contains(&id) {
            "garbage"
        } else {
            "2024-02-03T04:05:06"
        };
        json!({
            "id": id,
            "date": date,
            "title": { "rendered": format!("Post {id}") },
            "content": { "rendered": format!("<p>Body of post {id}</p>{image}") },
            "_embedded": {
                "wp:term": [
                    [ { "name": "News", "taxonomy": "category" } ],
                    [ { "name": "archive", "taxonomy": "post_tag" } ]
                ]
            }
        })
    }
}

/// Mount the posts endpoint
pub async fn mount_posts(server: &MockServer, responder: PostsResponder) {
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// Posts requests the server has seen
pub async fn posts_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == POSTS_ENDPOINT)
        .count()
}

/// Tiny PNG fixture
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(6, 4, image::Rgb([30, 120, 200]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Millisecond backoff so retry tests stay fast
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20)).with_jitter(0.0)
}

/// HTTP client against `base` with a generous limiter and fast retries
pub fn http_client(base: &str) -> HttpClient {
    HttpClient::new(
        reqwest::Client::new(),
        base,
        Arc::new(RateLimiter::request_based(1000, Duration::from_millis(1))),
    )
    .with_retry_policy(fast_policy())
}

/// Parts for a test run against `server`
pub struct Harness {
    pub config: RunConfig,
    pub source: Arc<WordPressSource>,
    pub resolver: Arc<MediaResolver>,
    pub converter: Arc<dyn ItemConverter>,
}

impl Harness {
    pub fn new(server: &MockServer, root: &Path) -> Self {
        let http = http_client(&server.uri());
        let resolver = Arc::new(
            MediaResolver::new(Arc::new(http.clone())).with_retry_policy(fast_policy()),
        );
        let converter: Arc<dyn ItemConverter> = Arc::new(DocumentConverter::new(
            resolver.clone(),
            Arc::new(HtmlRenderer::new()),
        ));
        let config = RunConfig::new(server.uri())
            .with_output_root(root)
            .with_start_batch(0)
            .with_batch_size(10)
            .with_max_workers(4);
        Self {
            config,
            source: Arc::new(WordPressSource::new(http)),
            resolver,
            converter,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn ItemConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn orchestrator(&self) -> RunOrchestrator {
        RunOrchestrator::new(
            self.config.clone(),
            self.source.clone(),
            self.converter.clone(),
            Arc::new(FileStateStore::new(&self.config.output_root)),
        )
        .with_media_resolver(self.resolver.clone())
    }
}

/// Artifact ids present in `dir` (files named `{id}.html`)
pub fn artifact_ids(dir: &Path) -> Vec<u64> {
    let mut ids: Vec<u64> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter_map(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .strip_suffix(".html")
                        .and_then(|stem| stem.parse().ok())
                })
                .collect()
        })
        .unwrap_or_default();
    ids.sort_unstable();
    ids
}
