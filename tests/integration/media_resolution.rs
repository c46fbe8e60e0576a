//! Media resolver over HTTP: single-flight, full-size fallback, failures

use super::support::{fast_policy, http_client, png_bytes};
use futures_util::future::join_all;
use post_archiver::media::MediaResolver;
use post_archiver::MediaOutcome;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolver(server: &MockServer) -> MediaResolver {
    MediaResolver::new(Arc::new(http_client(&server.uri()))).with_retry_policy(fast_policy())
}

async fn serve_png(server: &MockServer, at: &str, expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes())
                .set_delay(Duration::from_millis(30)),
        )
        .expect(expected_hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let server = MockServer::start().await;
    serve_png(&server, "/wp-content/uploads/cover.png", 1).await;
    let resolver = Arc::new(resolver(&server));
    let url = format!("{}/wp-content/uploads/cover.png", server.uri());

    let assets = join_all((0..8).map(|_| {
        let resolver = resolver.clone();
        let url = url.clone();
        async move { resolver.resolve(&url).await }
    }))
    .await;

    assert!(assets.iter().all(|a| a.is_success()));
    assert!(assets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(resolver.fetch_count(), 1);
    assert_eq!(resolver.cached_urls(), 1);
}

#[tokio::test]
async fn test_fragment_variants_hit_the_cache() {
    let server = MockServer::start().await;
    serve_png(&server, "/img/a.png", 1).await;
    let resolver = resolver(&server);

    let plain = format!("{}/img/a.png", server.uri());
    let with_fragment = format!("{plain}#gallery");
    resolver.resolve(&plain).await;
    let second = resolver.resolve(&with_fragment).await;

    assert!(second.is_success());
    assert_eq!(resolver.fetch_count(), 1);
}

#[tokio::test]
async fn test_thumbnail_prefers_full_size() {
    let server = MockServer::start().await;
    serve_png(&server, "/uploads/photo.png", 1).await;
    serve_png(&server, "/uploads/photo-300x200.png", 0).await;
    let resolver = resolver(&server);

    let asset = resolver
        .resolve(&format!("{}/uploads/photo-300x200.png", server.uri()))
        .await;
    assert!(asset.is_success());
    assert_eq!(asset.content_type, "image/jpeg");
}

#[tokio::test]
async fn test_missing_full_size_falls_back_to_thumbnail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uploads/photo.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    serve_png(&server, "/uploads/photo-150x150.png", 1).await;
    let resolver = resolver(&server);

    let asset = resolver
        .resolve(&format!("{}/uploads/photo-150x150.png", server.uri()))
        .await;
    assert!(asset.is_success());
}

#[tokio::test]
async fn test_undecodable_body_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/broken.png"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not an image</html>"))
        .mount(&server)
        .await;
    let resolver = resolver(&server);

    let asset = resolver.resolve(&format!("{}/img/broken.png", server.uri())).await;
    assert!(matches!(asset.outcome, MediaOutcome::Failed(_)));
    assert!(asset.bytes.is_empty());
}

#[tokio::test]
async fn test_failures_are_cached_too() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/gone.png"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;
    let resolver = resolver(&server);
    let url = format!("{}/img/gone.png", server.uri());

    let first = resolver.resolve(&url).await;
    let second = resolver.resolve(&url).await;
    assert!(!first.is_success());
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_non_http_reference_is_skipped_without_request() {
    let server = MockServer::start().await;
    let resolver = resolver(&server);

    let asset = resolver.resolve("ftp://files.example.com/a.png").await;
    assert!(matches!(asset.outcome, MediaOutcome::Skipped(_)));
    assert_eq!(resolver.fetch_count(), 0);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
