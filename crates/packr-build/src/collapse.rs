//! Collapsed-file detection.
//!
//! Hoisted or symlinked workspace layouts can make the same package (or the
//! same source directory) reachable through several physical paths, e.g.
//! `node_modules/dep/index.js` and `../node_modules/dep/index.js`. Both land
//! on one logical archive path, so only one survives archiving. This module
//! reports such groups; it never fails a build over them.

use packr_core::manifest::{MANIFEST_FILE, PackageManifest};
use packr_core::path::{classify, to_posix};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::task::JoinSet;

/// Groups with at least one logical path reached through several physical paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollapseReport {
    /// First-party source, keyed by logical directory.
    pub srcs: BTreeMap<String, DupGroup>,
    /// Dependencies, keyed by package name.
    pub pkgs: BTreeMap<String, DupGroup>,
}

impl CollapseReport {
    pub fn is_empty(&self) -> bool {
        self.srcs.is_empty() && self.pkgs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DupGroup {
    /// Distinct physical roots (package directories or source directories).
    pub num_unique_paths: usize,
    /// Every file in the group, duplicates included.
    pub num_total_files: usize,
    /// Physical package copies with their manifest versions (dependencies only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<PackageCopy>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageCopy {
    pub path: String,
    /// `None` when the copy has no readable `package.json`.
    pub version: Option<String>,
}

#[derive(Default)]
struct Group {
    num_files: usize,
    roots: BTreeSet<String>,
    physical_by_logical: BTreeMap<String, BTreeSet<String>>,
}

impl Group {
    fn is_collapsed(&self) -> bool {
        self.physical_by_logical.values().any(|paths| paths.len() > 1)
    }
}

/// Find collapsed files among `files` (relative to `cwd`).
pub async fn find_collapsed<S: AsRef<str>>(
    files: &[S],
    cwd: &Path,
) -> Result<CollapseReport, tokio::task::JoinError> {
    let mut srcs: BTreeMap<String, Group> = BTreeMap::new();
    let mut pkgs: BTreeMap<String, Group> = BTreeMap::new();

    for file in files {
        let file = to_posix(file.as_ref());
        let Some(parts) = classify(&file) else {
            continue;
        };
        let logical = parts.logical_path();
        let group = if parts.is_dependency {
            let group = pkgs.entry(parts.parent_name.clone()).or_default();
            group.roots.insert(parts.owner_path());
            group
        } else {
            let group = srcs.entry(dirname(&logical).to_owned()).or_default();
            group.roots.insert(dirname(&file).to_owned());
            group
        };
        group.num_files += 1;
        group
            .physical_by_logical
            .entry(logical)
            .or_default()
            .insert(file);
    }

    let mut report = CollapseReport::default();
    for (dir, group) in srcs.into_iter().filter(|(_, g)| g.is_collapsed()) {
        report.srcs.insert(
            dir,
            DupGroup {
                num_unique_paths: group.roots.len(),
                num_total_files: group.num_files,
                packages: None,
            },
        );
    }

    let collapsed_pkgs: Vec<(String, Group)> =
        pkgs.into_iter().filter(|(_, g)| g.is_collapsed()).collect();
    let roots: Vec<String> = collapsed_pkgs
        .iter()
        .flat_map(|(_, g)| g.roots.iter().cloned())
        .collect();
    let versions = read_versions(cwd, &roots).await?;

    for (name, group) in collapsed_pkgs {
        let packages = group
            .roots
            .iter()
            .map(|root| PackageCopy {
                path: root.clone(),
                version: versions.get(root).cloned().flatten(),
            })
            .collect();
        tracing::debug!(package = %name, copies = group.roots.len(), "collapsed dependency");
        report.pkgs.insert(
            name,
            DupGroup {
                num_unique_paths: group.roots.len(),
                num_total_files: group.num_files,
                packages: Some(packages),
            },
        );
    }

    Ok(report)
}

/// Manifest version of each package root, read concurrently.
async fn read_versions(
    cwd: &Path,
    roots: &[String],
) -> Result<BTreeMap<String, Option<String>>, tokio::task::JoinError> {
    let mut tasks = JoinSet::new();
    for root in roots {
        let root = root.clone();
        let manifest = cwd.join(&root).join(MANIFEST_FILE);
        tasks.spawn(async move {
            let version = match tokio::fs::read_to_string(&manifest).await {
                Ok(content) => match serde_json::from_str::<PackageManifest>(&content) {
                    Ok(parsed) => parsed.version,
                    Err(e) => {
                        tracing::debug!(path = %manifest.display(), error = %e, "unparseable manifest");
                        None
                    }
                },
                Err(e) => {
                    tracing::debug!(path = %manifest.display(), error = %e, "no readable manifest");
                    None
                }
            };
            (root, version)
        });
    }

    let mut versions = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (root, version) = joined?;
        versions.insert(root, version);
    }
    Ok(versions)
}

fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_files_do_not_collapse() {
        let files = ["src/a.js", "src/b.js", "node_modules/dep/index.js"];
        let report = find_collapsed(&files, Path::new("/nonexistent")).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn source_directories_collapse_by_logical_path() {
        let files = ["lib/util.js", "../lib/util.js", "lib/other.js"];
        let report = find_collapsed(&files, Path::new("/nonexistent")).await.unwrap();
        let group = &report.srcs["lib"];
        assert_eq!(group.num_unique_paths, 2);
        assert_eq!(group.num_total_files, 3);
        assert!(group.packages.is_none());
        assert!(report.pkgs.is_empty());
    }

    #[test]
    fn dirname_of_top_level_file_is_dot() {
        assert_eq!(dirname("index.js"), ".");
        assert_eq!(dirname("src/deep/x.js"), "src/deep");
    }
}
