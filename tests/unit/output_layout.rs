use post_archiver::output::path::{artifact_file_name, parse_batch_dir_name};
use post_archiver::output::{append_line, write_atomic, write_json_atomic, OutputLayout};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_layout_paths() {
    let layout = OutputLayout::new("archive");
    assert_eq!(layout.manifest(), Path::new("archive/run_state.json"));
    assert_eq!(layout.batch_dir(12), Path::new("archive/batch_12"));
    assert_eq!(layout.marker(12), Path::new("archive/batch_12/complete.json"));
    assert_eq!(layout.batch_log(0), Path::new("archive/batch_0/batch.log"));
    assert_eq!(layout.errors_dir(), Path::new("archive/errors"));
    assert_eq!(artifact_file_name(4821), "4821.html");
}

#[test]
fn test_batch_dir_names() {
    assert_eq!(parse_batch_dir_name("batch_0"), Some(0));
    assert_eq!(parse_batch_dir_name("batch_42"), Some(42));
    assert_eq!(parse_batch_dir_name("batch_"), None);
    assert_eq!(parse_batch_dir_name("batch_-1"), None);
    assert_eq!(parse_batch_dir_name("batch_3.bak"), None);
    assert_eq!(parse_batch_dir_name("errors"), None);
}

#[test]
fn test_batch_indices_sorted_numerically() {
    let dir = TempDir::new().unwrap();
    let layout = OutputLayout::new(dir.path());
    for index in [10, 2, 1] {
        std::fs::create_dir_all(layout.batch_dir(index)).unwrap();
    }
    std::fs::create_dir_all(layout.errors_dir()).unwrap();
    std::fs::write(dir.path().join("batch_7"), b"a file, not a batch").unwrap();

    assert_eq!(layout.batch_indices().unwrap(), vec![1, 2, 10]);
    assert!(OutputLayout::new(dir.path().join("missing"))
        .batch_indices()
        .unwrap()
        .is_empty());
}

#[test]
fn test_reset_batch_dir_clears_contents() {
    let dir = TempDir::new().unwrap();
    let layout = OutputLayout::new(dir.path());
    std::fs::create_dir_all(layout.batch_dir(3)).unwrap();
    std::fs::write(layout.batch_dir(3).join("1.html"), b"old").unwrap();

    let reset = layout.reset_batch_dir(3).unwrap();
    assert_eq!(reset, layout.batch_dir(3));
    assert_eq!(std::fs::read_dir(&reset).unwrap().count(), 0);
}

#[test]
fn test_atomic_writes_replace_and_leave_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("nested/run_state.json");

    write_json_atomic(&target, &json!({ "batch_size": 10 })).unwrap();
    write_atomic(&target, b"{\"batch_size\": 20}").unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"batch_size\": 20}");
    let entries: Vec<_> = std::fs::read_dir(dir.path().join("nested")).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_append_line_accumulates() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("run.log");
    append_line(&log, "batch 0 complete").unwrap();
    append_line(&log, "batch 1 failed").unwrap();
    assert_eq!(
        std::fs::read_to_string(&log).unwrap(),
        "batch 0 complete\nbatch 1 failed\n"
    );
}
