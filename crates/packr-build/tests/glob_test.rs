use packr_build::PatternSet;
use packr_build::filter::FilterError;
use packr_build::glob::{enumerate_files, expand_globs, resolve_file_paths_from_patterns};
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn strings(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| (*s).to_owned()).collect()
}

// ── Enumeration ──

#[test]
fn enumerates_relative_forward_slash_paths() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "index.js", "");
    write(tmp.path(), "src/lib/a.js", "");
    write(tmp.path(), "src/lib/b.ts", "");

    let files = enumerate_files(tmp.path(), &strings(&["src/**/*.js", "index.js"])).unwrap();
    let files: Vec<&str> = files.iter().map(String::as_str).collect();
    assert_eq!(files, vec!["index.js", "src/lib/a.js"]);
}

#[test]
fn enumerates_outside_the_working_directory() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "node_modules/dep/index.js", "");
    write(tmp.path(), "service/handler.js", "");
    let cwd = tmp.path().join("service");

    let files = enumerate_files(&cwd, &strings(&["**", "../node_modules/dep/**"])).unwrap();
    assert!(files.contains("handler.js"));
    assert!(files.contains("../node_modules/dep/index.js"));
}

#[test]
fn missing_literal_and_missing_base_are_skipped() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.js", "");

    let files = enumerate_files(tmp.path(), &strings(&["nope.js", "missing/**"])).unwrap();
    assert!(files.is_empty());
}

#[test]
fn expand_globs_honors_negation() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "handlers/one.js", "");
    write(tmp.path(), "handlers/two.js", "");
    write(tmp.path(), "other.js", "");

    let entries = expand_globs(tmp.path(), &strings(&["handlers/*.js", "!handlers/two.js"])).unwrap();
    assert_eq!(entries, vec!["handlers/one.js"]);
}

// ── Resolution ──

#[tokio::test]
async fn include_overrides_exclude() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "src/a.js", "");
    write(tmp.path(), "docs/guide.md", "");
    write(tmp.path(), "docs/keep.md", "");

    let patterns = PatternSet {
        pre_include: strings(&["**"]),
        dep_include: Vec::new(),
        include: strings(&["docs/keep.md"]),
        exclude: strings(&["docs/**"]),
    };
    let resolved = resolve_file_paths_from_patterns(tmp.path(), &patterns)
        .await
        .unwrap();
    assert_eq!(resolved.included, vec!["docs/keep.md", "src/a.js"]);
    assert_eq!(resolved.excluded, vec!["docs/guide.md"]);
}

#[tokio::test]
async fn empty_result_is_fatal() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.js", "");

    let patterns = PatternSet {
        pre_include: strings(&["**"]),
        exclude: strings(&["**"]),
        ..PatternSet::default()
    };
    let err = resolve_file_paths_from_patterns(tmp.path(), &patterns)
        .await
        .unwrap_err();
    assert!(matches!(err, FilterError::NoFilesMatched));
    assert_eq!(err.to_string(), "No file matches include / exclude patterns");
}

#[tokio::test]
async fn invalid_pattern_is_reported() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.js", "");

    let patterns = PatternSet {
        pre_include: strings(&["**"]),
        exclude: strings(&["a/[b"]),
        ..PatternSet::default()
    };
    let err = resolve_file_paths_from_patterns(tmp.path(), &patterns)
        .await
        .unwrap_err();
    assert!(matches!(err, FilterError::InvalidPattern { .. }), "got: {err:?}");
}
