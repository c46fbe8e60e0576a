//! End-to-end runs against a mock WordPress site

use super::support::{
    artifact_ids, http_client, mount_posts, png_bytes, posts_requests, Harness, PostsResponder,
};
use async_trait::async_trait;
use post_archiver::fetcher::wordpress::POSTS_ENDPOINT;
use post_archiver::fetcher::RetryPolicy;
use post_archiver::media::MediaResolver;
use post_archiver::output::OutputLayout;
use post_archiver::pipeline::{ConfigError, DocumentConverter, ItemConverter, RunError, RunPhase};
use post_archiver::render::HtmlRenderer;
use post_archiver::resume::{CompletionMarker, RunLock};
use post_archiver::shutdown::ShutdownCoordinator;
use post_archiver::{ConversionResult, ItemDescriptor};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fails chosen items, delegates the rest
struct FailSome {
    inner: Arc<dyn ItemConverter>,
    fail: HashSet<u64>,
}

#[async_trait]
impl ItemConverter for FailSome {
    async fn convert(&self, item: &ItemDescriptor, batch_dir: &Path) -> ConversionResult {
        if self.fail.contains(&item.id) {
            return ConversionResult::permanent_failure(item, "unrenderable markup");
        }
        self.inner.convert(item, batch_dir).await
    }
}

fn mtimes(layout: &OutputLayout, batches: &[u64]) -> BTreeMap<String, SystemTime> {
    let mut out = BTreeMap::new();
    for index in batches {
        for entry in std::fs::read_dir(layout.batch_dir(*index)).unwrap() {
            let entry = entry.unwrap();
            out.insert(
                entry.path().display().to_string(),
                entry.metadata().unwrap().modified().unwrap(),
            );
        }
    }
    out
}

#[tokio::test]
async fn test_every_item_placed_exactly_once() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(35)).await;
    let root = TempDir::new().unwrap();

    let base = Harness::new(&server, root.path());
    let failing = Arc::new(FailSome {
        inner: base.converter.clone(),
        fail: [4, 17, 35].into_iter().collect(),
    });
    let harness = base.with_converter(failing);

    let summary = harness.orchestrator().run().await.unwrap();
    assert_eq!(summary.phase, RunPhase::Finished);
    assert_eq!(summary.batches_processed, 4);
    assert_eq!(summary.items_succeeded, 32);
    assert_eq!(summary.items_failed, 3);
    assert_eq!(summary.last_batch, Some(3));

    let layout = OutputLayout::new(root.path());
    let mut seen: Vec<u64> = Vec::new();
    for index in 0..4 {
        let marker = CompletionMarker::load(&layout.marker(index)).unwrap();
        let artifacts = artifact_ids(&layout.batch_dir(index));
        let listed: Vec<u64> = marker.succeeded.iter().map(|e| e.id).collect();
        assert_eq!(artifacts, listed, "batch {index}");
        seen.extend(listed);
        seen.extend(marker.failed.iter().map(|e| e.id));
    }
    seen.sort_unstable();
    assert_eq!(seen, (1..=35).collect::<Vec<_>>());

    // failed items get error documents, never artifacts
    assert!(layout.errors_dir().join("17_post_17.html").exists());
    assert!(!layout.batch_dir(1).join("17.html").exists());

    let run_log = std::fs::read_to_string(layout.run_log()).unwrap();
    assert_eq!(run_log.lines().count(), 4);
}

#[tokio::test]
async fn test_rerun_of_complete_output_makes_no_calls() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(35)).await;
    let root = TempDir::new().unwrap();
    let harness = Harness::new(&server, root.path());

    let first = harness.orchestrator().run().await.unwrap();
    assert!(first.is_finished());
    let layout = OutputLayout::new(root.path());
    let before = mtimes(&layout, &[0, 1, 2, 3]);
    let calls_before = posts_requests(&server).await;

    let second = harness.orchestrator().run().await.unwrap();
    assert!(second.is_finished());
    assert_eq!(second.batches_skipped, 4);
    assert_eq!(second.batches_processed, 0);
    assert_eq!(posts_requests(&server).await, calls_before);
    assert_eq!(mtimes(&layout, &[0, 1, 2, 3]), before);
}

#[tokio::test]
async fn test_partition_example_ten_from_two() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(35)).await;
    let root = TempDir::new().unwrap();
    let mut harness = Harness::new(&server, root.path());
    harness.config.start_batch = 2;

    let summary = harness.orchestrator().run().await.unwrap();
    assert_eq!(summary.batches_processed, 2);

    let layout = OutputLayout::new(root.path());
    assert_eq!(artifact_ids(&layout.batch_dir(2)), (21..=30).collect::<Vec<_>>());
    assert_eq!(artifact_ids(&layout.batch_dir(3)), (31..=35).collect::<Vec<_>>());
    assert!(!layout.batch_dir(0).exists());
    assert!(!layout.batch_dir(1).exists());
}

#[tokio::test]
async fn test_failing_media_degrades_but_completes() {
    let server = MockServer::start().await;
    let good = format!("{}/media/good.png", server.uri());
    let bad = format!("{}/media/gone.png", server.uri());
    mount_posts(
        &server,
        PostsResponder::new(3).with_media(1, good.clone()).with_media(2, bad.clone()),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/media/good.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes())
                .insert_header("Content-Type", "image/png"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let summary = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert_eq!(summary.items_succeeded, 3);
    assert_eq!(summary.media_warnings, 1);

    let dir = OutputLayout::new(root.path()).batch_dir(0);
    let with_image = std::fs::read_to_string(dir.join("1.html")).unwrap();
    assert!(with_image.contains("data:image/jpeg;base64,"));

    let degraded = std::fs::read_to_string(dir.join("2.html")).unwrap();
    assert!(degraded.contains("Body of post 2"));
    assert!(!degraded.contains("<img"));

    let batch_log = std::fs::read_to_string(dir.join("batch.log")).unwrap();
    assert!(batch_log.contains("gone.png"));
}

#[tokio::test]
async fn test_shared_image_fetched_once() {
    let server = MockServer::start().await;
    let shared = format!("{}/media/shared.png", server.uri());
    let mut responder = PostsResponder::new(10);
    for id in 1..=10 {
        responder = responder.with_media(id, shared.clone());
    }
    mount_posts(&server, responder).await;
    Mock::given(method("GET"))
        .and(path("/media/shared.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes())
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let summary = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert_eq!(summary.items_succeeded, 10);
    assert_eq!(summary.media_fetches, 1);
}

#[tokio::test]
async fn test_unreachable_source_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let summary = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert_eq!(summary.phase, RunPhase::Aborted);
    assert!(summary
        .abort_reason
        .as_deref()
        .unwrap()
        .contains("content source unreachable"));
    assert!(matches!(summary.ensure_finished(), Err(RunError::Aborted(_))));
}

#[tokio::test]
async fn test_consecutive_fetch_failures_abort() {
    let server = MockServer::start().await;
    for page in ["2", "3", "4"] {
        Mock::given(method("GET"))
            .and(path(POSTS_ENDPOINT))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
    }
    mount_posts(&server, PostsResponder::new(60)).await;

    let root = TempDir::new().unwrap();
    let summary = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert_eq!(summary.phase, RunPhase::Aborted);
    assert_eq!(summary.batches_processed, 1);
    assert_eq!(summary.batches_failed, 3);
    assert!(summary.abort_reason.unwrap().contains("3 consecutive"));
}

#[tokio::test]
async fn test_single_fetch_failure_is_batch_level() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POSTS_ENDPOINT))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_posts(&server, PostsResponder::new(30)).await;

    let root = TempDir::new().unwrap();
    let summary = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert_eq!(summary.phase, RunPhase::Finished);
    assert_eq!(summary.batches_processed, 2);
    assert_eq!(summary.failed_batches.len(), 1);
    assert_eq!(summary.failed_batches[0].batch, 1);

    let layout = OutputLayout::new(root.path());
    assert!(!layout.marker(1).exists());
    assert!(layout.marker(2).exists());
}

#[tokio::test]
async fn test_batch_size_change_is_rejected() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(12)).await;
    let root = TempDir::new().unwrap();
    let mut harness = Harness::new(&server, root.path());
    harness.orchestrator().run().await.unwrap();

    harness.config.batch_size = 5;
    let err = harness.orchestrator().run().await.unwrap_err();
    assert!(matches!(
        err,
        RunError::Config(ConfigError::BatchSizeMismatch {
            recorded: 10,
            requested: 5
        })
    ));

    harness.config.reset_state = true;
    let summary = harness.orchestrator().run().await.unwrap();
    assert!(summary.is_finished());
    assert_eq!(summary.batches_processed, 3);
}

#[tokio::test]
async fn test_locked_root_is_fatal() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(5)).await;
    let root = TempDir::new().unwrap();
    let _held = RunLock::try_acquire(&OutputLayout::new(root.path()).lock_file()).unwrap();

    let err = Harness::new(&server, root.path()).orchestrator().run().await.unwrap_err();
    assert!(matches!(err, RunError::Fatal(_)));
    assert_eq!(posts_requests(&server).await, 0);
}

#[tokio::test]
async fn test_shutdown_aborts_without_markers() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(5)).await;
    let root = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let summary = Harness::new(&server, root.path())
        .orchestrator()
        .with_shutdown(Some(shutdown))
        .run()
        .await
        .unwrap();
    assert_eq!(summary.phase, RunPhase::Aborted);
    assert!(!OutputLayout::new(root.path()).marker(0).exists());
}

#[tokio::test]
async fn test_interrupted_batch_is_regenerated() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(10)).await;
    let root = TempDir::new().unwrap();
    let layout = OutputLayout::new(root.path());

    // leftovers from a crashed run: stale artifact, no marker
    std::fs::create_dir_all(layout.batch_dir(0)).unwrap();
    std::fs::write(layout.batch_dir(0).join("999.html"), b"stale").unwrap();

    let summary = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert!(summary.is_finished());
    assert_eq!(artifact_ids(&layout.batch_dir(0)), (1..=10).collect::<Vec<_>>());
    assert!(layout.marker(0).exists());
}

#[tokio::test]
async fn test_malformed_post_fails_alone() {
    let server = MockServer::start().await;
    mount_posts(&server, PostsResponder::new(8).with_broken_date(5)).await;
    let root = TempDir::new().unwrap();

    let summary = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert_eq!(summary.phase, RunPhase::Finished, "{:?}", summary.abort_reason);
    assert_eq!(summary.items_succeeded, 7);
    assert_eq!(summary.items_failed, 1);
    assert_eq!(summary.failed_items[0].id, 5);
    assert!(summary.failed_items[0].reason.contains("malformed item"));

    let layout = OutputLayout::new(root.path());
    assert_eq!(artifact_ids(&layout.batch_dir(0)), vec![1, 2, 3, 4, 6, 7, 8]);
    let marker = CompletionMarker::load(&layout.marker(0)).unwrap();
    assert_eq!(marker.failed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5]);
}

#[tokio::test]
async fn test_shutdown_during_media_backoff_leaves_batch_unmarked() {
    let server = MockServer::start().await;
    let mut responder = PostsResponder::new(2);
    for id in 1..=2 {
        responder = responder.with_media(id, format!("{}/media/{id}.png", server.uri()));
    }
    mount_posts(&server, responder).await;
    Mock::given(method("GET"))
        .and(path_regex("^/media/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let mut harness = Harness::new(&server, root.path());
    let resolver = Arc::new(
        MediaResolver::new(Arc::new(http_client(&server.uri())))
            .with_retry_policy(
                RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(30)).with_jitter(0.0),
            )
            .with_shutdown(Some(shutdown.clone())),
    );
    harness.converter = Arc::new(DocumentConverter::new(resolver.clone(), Arc::new(HtmlRenderer::new())));
    harness.resolver = resolver;

    let run = harness.orchestrator().with_shutdown(Some(shutdown.clone()));
    // stop once the first image attempt has failed, so its backoff is what gets cut
    let stop_after_first_media_attempt = async {
        loop {
            let media_hits = server
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .filter(|r| r.url.path().starts_with("/media/"))
                .count();
            if media_hits > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.request_shutdown();
    };

    let (summary, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(run.run(), stop_after_first_media_attempt)
    })
    .await
    .expect("shutdown should cut the media backoff short");
    let summary = summary.unwrap();

    assert_eq!(summary.phase, RunPhase::Aborted);
    let layout = OutputLayout::new(root.path());
    assert!(!layout.marker(0).exists());

    // a later run with the images back regenerates the batch
    Mock::given(method("GET"))
        .and(path_regex("^/media/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes())
                .insert_header("Content-Type", "image/png"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    let rerun = Harness::new(&server, root.path()).orchestrator().run().await.unwrap();
    assert!(rerun.is_finished());
    assert_eq!(rerun.media_warnings, 0);
    assert!(layout.marker(0).exists());
    let doc = std::fs::read_to_string(layout.batch_dir(0).join("1.html")).unwrap();
    assert!(doc.contains("data:image/jpeg;base64,"));
}
