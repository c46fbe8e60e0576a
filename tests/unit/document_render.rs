use bytes::Bytes;
use chrono::NaiveDate;
use post_archiver::render::text::{clean_for_path, extract_image_sources, extract_paragraphs};
use post_archiver::render::{render_error_document, write_artifact, DocumentRenderer, HtmlRenderer};
use post_archiver::{ItemDescriptor, MediaAsset};
use std::sync::Arc;
use tempfile::TempDir;

fn post() -> ItemDescriptor {
    ItemDescriptor {
        id: 310,
        title: "Spring Notes: Café Visits".into(),
        body: "<p>Intro &amp; welcome</p><ul><li>one</li><li>two</li></ul>\
               <script>track()</script><img src=\"https://blog.example.com/a.jpg\">"
            .into(),
        media: vec!["https://blog.example.com/a.jpg".into()],
        published: NaiveDate::from_ymd_opt(2021, 4, 9)
            .unwrap()
            .and_hms_opt(7, 5, 0)
            .unwrap(),
        terms: vec![],
    }
}

#[test]
fn test_body_text_extraction() {
    let item = post();
    assert_eq!(extract_paragraphs(&item.body), vec!["Intro & welcome", "one", "two"]);
    assert_eq!(
        extract_image_sources(&item.body),
        vec!["https://blog.example.com/a.jpg"]
    );
}

#[test]
fn test_rendered_document_is_self_contained() {
    let asset = Arc::new(MediaAsset::success(
        "https://blog.example.com/a.jpg",
        Bytes::from_static(&[0xff, 0xd8, 0xff, 0xe0]),
        "image/jpeg",
    ));
    let artifact = HtmlRenderer::new().render(&post(), &[asset]).unwrap();
    let doc = String::from_utf8(artifact.bytes.clone()).unwrap();

    assert!(doc.contains("src=\"data:image/jpeg;base64,/9j/4A==\""));
    assert!(!doc.contains("https://blog.example.com/a.jpg"));
    assert!(!doc.contains("track()"));
    assert!(doc.contains("20210409 @ 07:05"));

    let dir = TempDir::new().unwrap();
    let path = write_artifact(dir.path(), &artifact).unwrap();
    assert_eq!(path, dir.path().join("310.html"));
    assert_eq!(std::fs::read(&path).unwrap(), artifact.bytes);
}

#[test]
fn test_error_document_names_item_and_reason() {
    let doc = render_error_document(&post(), "render failed: bad markup");
    assert_eq!(doc.file_name, "310_spring_notes_caf_visits.html");
    let text = String::from_utf8(doc.bytes).unwrap();
    assert!(text.contains("Conversion failed"));
    assert!(text.contains("April 09, 2021"));
    assert!(text.contains("render failed: bad markup"));
}

#[test]
fn test_slugs_are_filesystem_safe() {
    assert_eq!(clean_for_path("  Hello, World!  "), "hello_world");
    assert_eq!(clean_for_path("../../etc/passwd"), "etcpasswd");
    assert_eq!(clean_for_path("???"), "untitled");
}

#[test]
fn test_invalid_item_is_rejected() {
    let mut item = post();
    item.id = 0;
    assert!(HtmlRenderer::new().render(&item, &[]).is_err());
}
