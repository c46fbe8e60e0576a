//! WordPress source against a mock site: paging, end detection, retries

use super::support::{http_client, mount_posts, posts_requests, PostsResponder};
use futures_util::StreamExt;
use post_archiver::fetcher::wordpress::{WordPressSource, POSTS_ENDPOINT};
use post_archiver::fetcher::{stream_items, ContentSource, FetcherError};
use post_archiver::fetcher::http::Credentials;
use post_archiver::TermKind;
use std::sync::Arc;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn collect_ids(source: Arc<dyn ContentSource>, offset: u64, page_size: u32) -> Vec<u64> {
    stream_items(source, offset, page_size)
        .map(|entry| entry.unwrap().id())
        .collect()
        .await
}

#[tokio::test]
async fn test_pages_parse_into_items() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(3)).await;

    let source = WordPressSource::new(http_client(&server.uri()));
    let page = source.fetch_page(1, 10).await.unwrap();

    assert_eq!(page.len(), 3);
    assert!(!page.has_more);
    let first = page.items().next().unwrap();
    assert_eq!(first.id, 1);
    assert_eq!(first.title, "Post 1");
    assert_eq!(first.terms_of(TermKind::Category).collect::<Vec<_>>(), vec!["News"]);
    assert_eq!(first.terms_of(TermKind::Tag).collect::<Vec<_>>(), vec!["archive"]);
}

#[tokio::test]
async fn test_page_past_end_is_empty() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(5)).await;

    let source = WordPressSource::new(http_client(&server.uri()));
    let page = source.fetch_page(3, 5).await.unwrap();
    assert!(page.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_stream_walks_every_page_once() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(23)).await;

    let source: Arc<dyn ContentSource> = Arc::new(WordPressSource::new(http_client(&server.uri())));
    let ids = collect_ids(source, 0, 10).await;

    assert_eq!(ids, (1..=23).collect::<Vec<_>>());
    assert_eq!(posts_requests(&server).await, 3);
}

#[tokio::test]
async fn test_stream_from_offset_skips_earlier_pages() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(35)).await;

    let source: Arc<dyn ContentSource> = Arc::new(WordPressSource::new(http_client(&server.uri())));
    let ids = collect_ids(source, 20, 10).await;

    assert_eq!(ids, (21..=35).collect::<Vec<_>>());
    assert_eq!(posts_requests(&server).await, 2);
}

#[tokio::test]
async fn test_transient_failures_are_invisible_to_consumer() {
    let clean = MockServer::start().await;
    mount_posts(&clean, PostsResponder::new(15)).await;
    let expected = collect_ids(
        Arc::new(WordPressSource::new(http_client(&clean.uri()))),
        0,
        10,
    )
    .await;

    let flaky = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&flaky)
        .await;
    mount_posts(&flaky, PostsResponder::new(15)).await;

    let ids = collect_ids(
        Arc::new(WordPressSource::new(http_client(&flaky.uri()))),
        0,
        10,
    )
    .await;

    assert_eq!(ids, expected);
    // two failed attempts, then pages 1 and 2
    assert_eq!(posts_requests(&flaky).await, 4);
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_posts(&server, PostsResponder::new(2)).await;

    let source = WordPressSource::new(http_client(&server.uri()));
    let page = source.fetch_page(1, 10).await.unwrap();
    assert_eq!(page.items().count(), 2);
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = WordPressSource::new(http_client(&server.uri()));
    let err = source.fetch_page(1, 10).await.unwrap_err();
    assert!(matches!(err, FetcherError::Exhausted { attempts: 3, .. }), "{err:?}");
    assert_eq!(posts_requests(&server).await, 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .respond_with(ResponseTemplate::new(401).set_body_string("rest_not_logged_in"))
        .mount(&server)
        .await;

    let source = WordPressSource::new(http_client(&server.uri()));
    let err = source.fetch_page(1, 10).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(posts_requests(&server).await, 1);
}

#[tokio::test]
async fn test_credentials_sent_as_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .and(header_exists("authorization"))
        .respond_with(PostsResponder::new(1))
        .expect(1)
        .mount(&server)
        .await;

    let http = http_client(&server.uri()).with_credentials(Some(Credentials {
        username: "editor".into(),
        password: "abcd efgh".into(),
    }));
    let page = WordPressSource::new(http).fetch_page(1, 10).await.unwrap();
    assert_eq!(page.items().count(), 1);
}

#[tokio::test]
async fn test_malformed_post_keeps_its_siblings() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(8).with_broken_date(5)).await;

    let source = WordPressSource::new(http_client(&server.uri()));
    let page = source.fetch_page(1, 10).await.unwrap();

    assert_eq!(page.len(), 8);
    assert_eq!(page.items().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 6, 7, 8]);
    let rejected: Vec<_> = page.rejected().collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].id, 5);
    assert_eq!(rejected[0].title, "Post 5");
    assert!(rejected[0].reason.contains("garbage"));
}
