//! Ordered include / exclude pattern filtering.
//!
//! Patterns are evaluated in order against every candidate path and the last
//! matching pattern wins: a plain glob marks its matches included, a
//! `!`-prefixed glob marks them excluded. Candidates no pattern touches keep
//! their initial state, which is included.

use globset::{Glob, GlobBuilder, GlobMatcher};
use packr_core::path::to_posix;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A glob, optionally negated with a leading `!`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    glob: String,
    exclude: bool,
}

impl FilePattern {
    /// Parse `raw`, normalizing separators and a leading `./`.
    pub fn parse(raw: &str) -> Self {
        let posix = to_posix(raw);
        let (exclude, glob) = match posix.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, posix.as_str()),
        };
        Self {
            glob: glob.trim_start_matches("./").to_owned(),
            exclude,
        }
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    pub fn is_exclude(&self) -> bool {
        self.exclude
    }

    /// Flip the bang: `X` becomes `!X` and `!X` becomes `X`.
    pub fn negated(&self) -> Self {
        Self {
            glob: self.glob.clone(),
            exclude: !self.exclude,
        }
    }

    fn matcher(&self) -> Result<GlobMatcher, FilterError> {
        compile_glob(&self.glob)
    }
}

impl fmt::Display for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exclude {
            write!(f, "!{}", self.glob)
        } else {
            f.write_str(&self.glob)
        }
    }
}

/// Build a glob the way packaging patterns are matched: `*` stays within one
/// path segment, `**` crosses segments, braces expand, dotfiles match.
pub(crate) fn build_glob(glob: &str) -> Result<Glob, FilterError> {
    GlobBuilder::new(glob)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map_err(|e| FilterError::InvalidPattern {
            pattern: glob.to_owned(),
            source: e,
        })
}

fn compile_glob(glob: &str) -> Result<GlobMatcher, FilterError> {
    build_glob(glob).map(|g| g.compile_matcher())
}

/// The four pattern groups of one packaging unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSet {
    pub pre_include: Vec<String>,
    pub dep_include: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PatternSet {
    /// Flatten into evaluation order: pre-include, dependency includes,
    /// negated excludes, explicit includes.
    pub fn filter_patterns(&self) -> Vec<FilePattern> {
        let pre = self.pre_include.iter().map(|p| FilePattern::parse(p));
        let deps = self.dep_include.iter().map(|p| FilePattern::parse(p));
        let excludes = self.exclude.iter().map(|p| FilePattern::parse(p).negated());
        let includes = self.include.iter().map(|p| FilePattern::parse(p));
        pre.chain(deps).chain(excludes).chain(includes).collect()
    }

    /// Globs that can add candidates (every non-negated pattern), each
    /// listed once in first-seen order.
    pub fn positive_globs(&self) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        self.filter_patterns()
            .into_iter()
            .filter(|p| !p.is_exclude())
            .map(|p| p.glob)
            .filter(|glob| seen.insert(glob.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Included,
    Excluded,
}

/// Partition of all candidate paths after filtering, each side sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedFileSet {
    pub included: Vec<String>,
    pub excluded: Vec<String>,
}

/// Apply `patterns` to `files`, last match wins.
///
/// ```
/// use packr_build::filter::{filter_files, FilePattern};
///
/// let patterns: Vec<FilePattern> = ["a/*.js", "!a/*.js", "a/keep.js"]
///     .iter()
///     .map(|p| FilePattern::parse(p))
///     .collect();
/// let result = filter_files(["a/keep.js", "a/drop.js"], &patterns).unwrap();
/// assert_eq!(result.included, vec!["a/keep.js"]);
/// assert_eq!(result.excluded, vec!["a/drop.js"]);
/// ```
pub fn filter_files<I, S>(files: I, patterns: &[FilePattern]) -> Result<ResolvedFileSet, FilterError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut states: BTreeMap<String, FileState> = files
        .into_iter()
        .map(|f| (to_posix(f.as_ref()), FileState::Included))
        .collect();

    for pattern in patterns {
        let matcher = pattern.matcher()?;
        let state = if pattern.is_exclude() {
            FileState::Excluded
        } else {
            FileState::Included
        };
        for (file, current) in states.iter_mut() {
            if matcher.is_match(file.as_str()) {
                *current = state;
            }
        }
    }

    let mut result = ResolvedFileSet::default();
    for (file, state) in states {
        match state {
            FileState::Included => result.included.push(file),
            FileState::Excluded => result.excluded.push(file),
        }
    }
    Ok(result)
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid glob pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("No file matches include / exclude patterns")]
    NoFilesMatched,
    #[error("file enumeration task failed")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(raw: &[&str]) -> Vec<FilePattern> {
        raw.iter().map(|p| FilePattern::parse(p)).collect()
    }

    #[test]
    fn parse_strips_bang_and_dot_slash() {
        let p = FilePattern::parse("!./node_modules/**");
        assert!(p.is_exclude());
        assert_eq!(p.glob(), "node_modules/**");
        assert_eq!(p.to_string(), "!node_modules/**");
    }

    #[test]
    fn parse_normalizes_backslashes() {
        let p = FilePattern::parse("node_modules\\foo\\**");
        assert_eq!(p.glob(), "node_modules/foo/**");
    }

    #[test]
    fn negated_toggles_bang() {
        assert!(FilePattern::parse("a/**").negated().is_exclude());
        assert!(!FilePattern::parse("!a/**").negated().is_exclude());
    }

    #[test]
    fn untouched_files_stay_included() {
        let result = filter_files(["a.js", "b.js"], &patterns(&["!a.js"])).unwrap();
        assert_eq!(result.included, vec!["b.js"]);
        assert_eq!(result.excluded, vec!["a.js"]);
    }

    #[test]
    fn last_match_wins() {
        let result = filter_files(
            ["a/keep.js", "a/drop.js"],
            &patterns(&["a/*.js", "!a/*.js", "a/keep.js"]),
        )
        .unwrap();
        assert_eq!(result.included, vec!["a/keep.js"]);
        assert_eq!(result.excluded, vec!["a/drop.js"]);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let result = filter_files(["a/b/c.js", "a/c.js"], &patterns(&["!a/*.js"])).unwrap();
        assert_eq!(result.included, vec!["a/b/c.js"]);
    }

    #[test]
    fn double_star_braces_and_dotfiles() {
        let files = ["src/.env", "src/deep/x.ts", "src/deep/y.js", "README.md"];
        let result = filter_files(files, &patterns(&["!**", "src/**/*.{js,ts}", "src/.env"]))
            .unwrap();
        assert_eq!(
            result.included,
            vec!["src/.env", "src/deep/x.ts", "src/deep/y.js"]
        );
    }

    #[test]
    fn parent_relative_patterns_match_literally() {
        let files = [
            "../node_modules/dep/index.js",
            "../node_modules/dep/node_modules/dev/index.js",
        ];
        let result = filter_files(
            files,
            &patterns(&[
                "!../node_modules/**",
                "../node_modules/dep/**",
                "!../node_modules/dep/node_modules/**",
            ]),
        )
        .unwrap();
        assert_eq!(result.included, vec!["../node_modules/dep/index.js"]);
    }

    #[test]
    fn invalid_glob_is_reported() {
        let err = filter_files(["a"], &patterns(&["a/[b"])).unwrap_err();
        assert!(err.to_string().contains("a/[b"), "got: {err}");
    }

    #[test]
    fn excludes_are_negated_in_pattern_set() {
        let set = PatternSet {
            pre_include: vec!["**".to_owned()],
            dep_include: vec!["!node_modules/**".to_owned()],
            include: vec!["keep/**".to_owned()],
            exclude: vec!["*.md".to_owned(), "!README.md".to_owned()],
        };
        let flat: Vec<String> = set.filter_patterns().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            flat,
            vec!["**", "!node_modules/**", "!*.md", "README.md", "keep/**"]
        );
        assert_eq!(set.positive_globs(), vec!["**", "README.md", "keep/**"]);
    }

    #[test]
    fn positive_globs_drop_repeats_across_groups() {
        let set = PatternSet {
            pre_include: vec!["**".to_owned()],
            dep_include: vec!["lib/**".to_owned(), "!lib/tmp/**".to_owned()],
            include: vec!["lib/**".to_owned(), "**".to_owned(), "static/**".to_owned()],
            exclude: Vec::new(),
        };
        assert_eq!(set.positive_globs(), vec!["**", "lib/**", "static/**"]);
    }

    #[test]
    fn included_and_excluded_partition_candidates() {
        let files = ["a", "b/c", "d/e/f"];
        let result = filter_files(files, &patterns(&["!b/**", "!d/**", "d/e/*"])).unwrap();
        assert_eq!(result.included.len() + result.excluded.len(), files.len());
        assert!(result.included.iter().all(|f| !result.excluded.contains(f)));
    }

    // ── Property-based tests ──

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn path() -> impl Strategy<Value = String> {
            proptest::collection::vec("[a-c]{1,2}(\\.js)?", 1..4).prop_map(|s| s.join("/"))
        }

        fn pattern() -> impl Strategy<Value = String> {
            prop_oneof![
                Just("**".to_owned()),
                Just("!**".to_owned()),
                Just("a/**".to_owned()),
                Just("!a/**".to_owned()),
                Just("*.js".to_owned()),
                Just("!**/*.js".to_owned()),
                Just("{a,b}/*".to_owned()),
            ]
        }

        proptest! {
            #[test]
            fn filtering_is_idempotent(
                files in proptest::collection::btree_set(path(), 0..12),
                raw in proptest::collection::vec(pattern(), 0..6),
            ) {
                let pats: Vec<FilePattern> = raw.iter().map(|p| FilePattern::parse(p)).collect();
                let first = filter_files(&files, &pats).unwrap();
                let second = filter_files(&files, &pats).unwrap();
                prop_assert_eq!(first, second);
            }

            #[test]
            fn result_partitions_candidates(
                files in proptest::collection::btree_set(path(), 0..12),
                raw in proptest::collection::vec(pattern(), 0..6),
            ) {
                let pats: Vec<FilePattern> = raw.iter().map(|p| FilePattern::parse(p)).collect();
                let result = filter_files(&files, &pats).unwrap();
                prop_assert_eq!(result.included.len() + result.excluded.len(), files.len());
                for file in &result.included {
                    prop_assert!(!result.excluded.contains(file));
                }
            }

            #[test]
            fn trailing_exclude_all_excludes_everything(
                files in proptest::collection::btree_set(path(), 0..12),
                raw in proptest::collection::vec(pattern(), 0..6),
            ) {
                let mut pats: Vec<FilePattern> = raw.iter().map(|p| FilePattern::parse(p)).collect();
                pats.push(FilePattern::parse("!**"));
                let result = filter_files(&files, &pats).unwrap();
                prop_assert!(result.included.is_empty());
            }
        }
    }
}
