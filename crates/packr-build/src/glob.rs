//! Candidate file enumeration.
//!
//! Every non-negated pattern of a unit can contribute candidates, including
//! patterns that climb out of the working directory (`../node_modules/dep/**`).
//! Each pattern is split into a literal base directory and a glob remainder;
//! the minimal set of base directories is walked once and every file found is
//! tested against all patterns. Patterns without glob syntax are checked with
//! a single `stat` instead of a walk, which keeps `.bin` stubs (often
//! symlinks to files) out of directory traversal.

use globset::{GlobSet, GlobSetBuilder};
use packr_core::path::{path_to_posix, to_posix};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::filter::{FilterError, PatternSet, ResolvedFileSet, build_glob, filter_files};

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}'];

/// Enumerate candidates, apply the filter, and fail when nothing is left.
pub async fn resolve_file_paths_from_patterns(
    cwd: &Path,
    patterns: &PatternSet,
) -> Result<ResolvedFileSet, FilterError> {
    let cwd = cwd.to_path_buf();
    let patterns = patterns.clone();

    let resolved = tokio::task::spawn_blocking(move || {
        let candidates = enumerate_files(&cwd, &patterns.positive_globs())?;
        tracing::debug!(
            cwd = %cwd.display(),
            candidates = candidates.len(),
            "enumerated candidate files"
        );
        filter_files(&candidates, &patterns.filter_patterns())
    })
    .await??;

    if resolved.included.is_empty() {
        return Err(FilterError::NoFilesMatched);
    }
    Ok(resolved)
}

/// All files under `cwd` matched by at least one of `globs`, as sorted
/// forward-slash paths relative to `cwd`.
pub fn enumerate_files(cwd: &Path, globs: &[String]) -> Result<BTreeSet<String>, FilterError> {
    let mut files = BTreeSet::new();
    let mut builder = GlobSetBuilder::new();
    let mut bases: BTreeSet<String> = BTreeSet::new();
    let mut has_globs = false;

    for raw in globs {
        let glob = to_posix(raw).trim_start_matches("./").to_owned();
        match split_base(&glob) {
            None => {
                if is_file(&cwd.join(&glob)) {
                    files.insert(glob);
                }
            }
            Some(base) => {
                builder.add(build_glob(&glob)?);
                bases.insert(base);
                has_globs = true;
            }
        }
    }

    if !has_globs {
        return Ok(files);
    }

    let set = builder.build().map_err(|e| FilterError::InvalidPattern {
        pattern: globs.join(", "),
        source: e,
    })?;

    for base in minimal_bases(&bases) {
        walk_base(cwd, &base, &set, &mut files);
    }
    Ok(files)
}

/// Files matched by `patterns` alone, where later `!` patterns drop earlier
/// matches. Used to expand entry-file globs.
pub fn expand_globs(cwd: &Path, patterns: &[String]) -> Result<Vec<String>, FilterError> {
    let set = PatternSet {
        pre_include: vec!["!**".to_owned()],
        include: patterns.to_vec(),
        ..PatternSet::default()
    };
    let candidates = enumerate_files(cwd, &set.positive_globs())?;
    Ok(filter_files(&candidates, &set.filter_patterns())?.included)
}

/// Literal directory prefix of a glob, or `None` when the glob has no meta
/// characters at all.
fn split_base(glob: &str) -> Option<String> {
    if !glob.contains(GLOB_META) {
        return None;
    }
    let literal: Vec<&str> = glob
        .split('/')
        .take_while(|segment| !segment.contains(GLOB_META))
        .collect();
    Some(literal.join("/"))
}

/// Drop bases already covered by a walk of an ancestor base.
fn minimal_bases(bases: &BTreeSet<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for base in bases {
        let covered = kept.iter().any(|k| {
            if k.is_empty() {
                !base.starts_with("..")
            } else {
                base.strip_prefix(k.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            }
        });
        if !covered {
            kept.push(base.clone());
        }
    }
    kept
}

fn walk_base(cwd: &Path, base: &str, set: &GlobSet, files: &mut BTreeSet<String>) {
    let root: PathBuf = if base.is_empty() {
        cwd.to_path_buf()
    } else {
        cwd.join(base)
    };
    if !root.is_dir() {
        tracing::debug!(base, "pattern base is not a directory; skipping");
        return;
    }

    for entry in WalkDir::new(&root).follow_links(true).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable path during enumeration");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(suffix) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let suffix = path_to_posix(suffix);
        let relative = if base.is_empty() {
            suffix
        } else {
            format!("{base}/{suffix}")
        };
        if set.is_match(relative.as_str()) {
            files.insert(relative);
        }
    }
}

fn is_file(path: &Path) -> bool {
    // arch-lint: allow(no-silent-result-drop) reason="a literal pattern naming an absent file contributes no candidates"
    std::fs::metadata(path).is_ok_and(|m| m.is_file())
}
