use mockall::mock;
use packr_build::archive::{ArchiveEntry, ArchiveError, ArchiveWriter, SymlinkEntry};
use packr_build::filter::FilterError;
use packr_build::{Mode, PackError, Packager};
use packr_core::{PackrConfig, UnitOptions};
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

mock! {
    Writer {}

    impl ArchiveWriter for Writer {
        fn write_archive(
            &self,
            destination: &Path,
            entries: &[ArchiveEntry],
            links: &[SymlinkEntry],
        ) -> Result<(), ArchiveError>;
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn units(dir: &Path, toml: &str) -> Vec<UnitOptions> {
    write(dir, "packr.toml", toml);
    PackrConfig::load(dir).unwrap().units(dir).unwrap()
}

fn zip_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_owned).collect::<Vec<_>>()
}

/// A service whose single function requires `one-pkg`; `two-pkg` is unused.
fn trace_fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "one.js", "require('one-pkg');\nrequire(process.env.PLUGIN);\n");
    write(
        root,
        "node_modules/one-pkg/package.json",
        r#"{ "name": "one-pkg", "main": "index.js" }"#,
    );
    write(root, "node_modules/one-pkg/index.js", "");
    write(root, "node_modules/one-pkg/unused.js", "");
    write(root, "node_modules/two-pkg/index.js", "");
    tmp
}

/// Root service depending on workspace package `foo` under `libs/foo`.
fn workspace_fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "package.json", r#"{ "dependencies": { "foo": "*" } }"#);
    write(root, "handler.js", "");
    write(
        root,
        "libs/foo/package.json",
        r#"{ "name": "foo", "dependencies": { "dep": "*" } }"#,
    );
    write(root, "libs/foo/src/x.js", "");
    write(root, "libs/foo/node_modules/devonly/index.js", "");
    write(root, "node_modules/dep/package.json", r#"{ "name": "dep" }"#);
    write(root, "node_modules/dep/index.js", "");
    write(root, "node_modules/dev-tool/index.js", "");
    tmp
}

// ── Trace mode ──

#[tokio::test]
async fn trace_mode_archives_only_reachable_files() {
    let tmp = trace_fixture();
    let units = units(
        tmp.path(),
        r#"
[service]
name = "svc"
exclude = ["packr.toml"]

[service.trace]

[functions.one]
entries = ["one.js"]
"#,
    );

    let outcome = Packager::new().glob_and_zip(&units[0]).await.unwrap();

    assert_eq!(outcome.mode, Mode::Trace);
    assert_eq!(outcome.num_files, 3);
    assert!(outcome.report.is_none());
    assert_eq!(
        zip_names(&outcome.bundle_path),
        vec![
            "node_modules/one-pkg/index.js",
            "node_modules/one-pkg/package.json",
            "one.js",
        ]
    );
    let misses = &outcome.trace.misses["one.js"];
    assert_eq!(misses.len(), 1);
    assert_eq!(misses[0].line, 2);
}

// ── Dependency mode ──

#[tokio::test]
async fn dependency_mode_namespaces_packages_and_links_them() {
    let tmp = workspace_fixture();
    let units = units(
        tmp.path(),
        r#"
[service]
name = "svc"
report = true
exclude = ["packr.toml"]

[service.workspace]
packages = ["libs/foo"]
"#,
    );

    let outcome = Packager::new().glob_and_zip(&units[0]).await.unwrap();

    assert_eq!(outcome.mode, Mode::Dependency);
    assert!(outcome.trace.misses.is_empty());
    assert_eq!(
        zip_names(&outcome.bundle_path),
        vec![
            "handler.js",
            "node_modules/dep/index.js",
            "node_modules/dep/package.json",
            "package.json",
            "packages/foo/package.json",
            "packages/foo/src/x.js",
            "node_modules/foo",
        ]
    );

    let mut archive =
        zip::ZipArchive::new(std::fs::File::open(&outcome.bundle_path).unwrap()).unwrap();
    let mut link = archive.by_name("node_modules/foo").unwrap();
    let mut target = String::new();
    link.read_to_string(&mut target).unwrap();
    assert_eq!(target, "../packages/foo");

    let report = outcome.report.unwrap();
    assert_eq!(report.patterns.pre_include, vec!["**"]);
    assert!(report.files.excluded.contains(&"node_modules/dev-tool/index.js".to_owned()));
    assert!(report
        .files
        .excluded
        .contains(&"libs/foo/node_modules/devonly/index.js".to_owned()));
}

#[tokio::test]
async fn report_does_not_change_archive_bytes() {
    let tmp = workspace_fixture();
    let mut units = units(
        tmp.path(),
        "[service]\nname = \"svc\"\n\n[service.workspace]\npackages = [\"libs/foo\"]\n",
    );
    let packager = Packager::new();

    let plain = packager.glob_and_zip(&units[0]).await.unwrap();
    let plain_bytes = std::fs::read(&plain.bundle_path).unwrap();

    units[0].report = true;
    let reported = packager.glob_and_zip(&units[0]).await.unwrap();
    assert!(reported.report.is_some());
    assert_eq!(std::fs::read(&reported.bundle_path).unwrap(), plain_bytes);
}

// ── Writer seam ──

#[tokio::test]
async fn writer_receives_sorted_entries_and_links() {
    let tmp = workspace_fixture();
    let units = units(
        tmp.path(),
        "[service]\nname = \"svc\"\nexclude = [\"packr.toml\"]\n\n[service.workspace]\npackages = [\"libs/foo\"]\n",
    );
    let expected_dest = units[0].bundle_path.clone();

    let mut writer = MockWriter::new();
    writer
        .expect_write_archive()
        .withf(move |dest, entries, links| {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            let mut sorted = names.clone();
            sorted.sort_unstable();
            dest == expected_dest.as_path()
                && names == sorted
                && names.contains(&"packages/foo/src/x.js")
                && links.len() == 1
                && links[0].name == "node_modules/foo"
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let outcome = Packager::with_archiver(writer)
        .glob_and_zip(&units[0])
        .await
        .unwrap();
    assert_eq!(outcome.num_files, 6);
}

#[tokio::test]
async fn writer_failure_fails_the_unit() {
    let tmp = workspace_fixture();
    let units = units(tmp.path(), "[service]\nname = \"svc\"\n");

    let mut writer = MockWriter::new();
    writer.expect_write_archive().returning(|dest, _, _| {
        Err(ArchiveError::Create {
            path: dest.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        })
    });

    let err = Packager::with_archiver(writer)
        .glob_and_zip(&units[0])
        .await
        .unwrap_err();
    assert!(matches!(err, PackError::Archive(ArchiveError::Create { .. })), "got: {err:?}");
}

// ── Multiple units ──

#[tokio::test]
async fn failing_unit_does_not_affect_siblings() {
    let tmp = trace_fixture();
    let units = units(
        tmp.path(),
        r#"
[service]
name = "svc"
individually = true

[service.trace]

[functions.good]
entries = ["one.js"]

[functions.bad]
entries = ["one.js"]
exclude = ["**"]
"#,
    );

    let results = Packager::new().package_all(units).await;

    let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["bad", "good"]);
    assert!(matches!(
        results[0].1,
        Err(PackError::Filter(FilterError::NoFilesMatched))
    ));
    let good = results[1].1.as_ref().unwrap();
    assert!(good.bundle_path.ends_with(".packr/good.zip"));
    assert!(good.bundle_path.exists());
}
