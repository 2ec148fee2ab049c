//! Static `require` / `import` tracing.
//!
//! Starting from a unit's entry files, every source file is parsed for
//! module specifiers ([`crate::scan`]), each specifier is resolved the way Node resolves it,
//! and newly reached files are scanned in turn. The resolved set (plus the
//! `package.json` of every dependency package visited) becomes the unit's
//! dependency include list, so a trace-mode archive carries only code that
//! is actually reachable.
//!
//! Specifiers that cannot be resolved statically are collected as misses:
//! `require(variable)` is a *dynamic* miss, a literal that resolves to
//! nothing is an *unresolved* miss. Unresolved misses listed under
//! `trace.allow_missing` are dropped silently.

use packr_core::manifest::{MANIFEST_FILE, PackageManifest};
use packr_core::path::{DEPENDENCY_ROOT, normalize_lexically, relative_posix};
use packr_core::TraceConfig;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::scan::{Import, ImportScanner, ScanError};

/// Extensions tried, in order, after the bare path.
const EXTENSIONS: &[&str] = &[".js", ".json", ".mjs", ".cjs", ".node"];

/// Core modules that never live on disk.
const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Longest source excerpt kept for a miss.
const MAX_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissKind {
    /// The specifier is not a string literal.
    Dynamic,
    /// A literal specifier that resolves to no file.
    Unresolved,
}

/// Location of a specifier that could not be traced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSite {
    pub kind: MissKind,
    /// The literal specifier, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    /// 1-based.
    pub line: usize,
    /// 0-based, in bytes.
    pub column: usize,
    /// Source text from the call to the end of its line.
    pub code: String,
}

/// Everything reached from the entries, plus what could not be followed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceOutput {
    /// Absolute paths of resolved files and visited dependency manifests.
    pub dependencies: BTreeSet<PathBuf>,
    /// Misses keyed by the absolute path of the file that contains them.
    pub misses: BTreeMap<PathBuf, Vec<CallSite>>,
}

/// Trace-mode dependency includes for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracedInclude {
    pub dep_include: Vec<String>,
    /// Misses keyed by the requiring file, relative to the working directory.
    pub misses: BTreeMap<String, Vec<CallSite>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to read traced source {path}")]
    ReadSource {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse traced source {path}")]
    Parse {
        path: PathBuf,
        source: ScanError,
    },
    #[error(transparent)]
    Scanner(#[from] ScanError),
    #[error("failed to expand trace entries")]
    Entries(#[from] crate::filter::FilterError),
    #[error("trace task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Trace `entries` (relative to `cwd`) and produce the dependency include
/// list: `!**/node_modules/**` followed by every entry and traced file,
/// relative to `cwd` and sorted.
pub async fn trace_dep_include(
    cwd: &Path,
    entries: &[String],
    config: &TraceConfig,
) -> Result<TracedInclude, TraceError> {
    let cwd = cwd.to_path_buf();
    let entries = entries.to_vec();
    let config = config.clone();

    tokio::task::spawn_blocking(move || -> Result<TracedInclude, TraceError> {
        let entry_files = crate::glob::expand_globs(&cwd, &entries)?;
        tracing::debug!(entries = entry_files.len(), "tracing entry files");

        let absolute: Vec<PathBuf> = entry_files.iter().map(|e| cwd.join(e)).collect();
        let output = Tracer::new(&config).trace(&absolute)?;

        let traced: BTreeSet<String> = absolute
            .iter()
            .chain(output.dependencies.iter())
            .map(|p| relative_posix(&cwd, p))
            .collect();

        let mut dep_include = vec![format!("!**/{DEPENDENCY_ROOT}/**")];
        dep_include.extend(traced);

        let misses = output
            .misses
            .into_iter()
            .map(|(file, sites)| (relative_posix(&cwd, &file), sites))
            .collect();

        Ok(TracedInclude {
            dep_include,
            misses,
        })
    })
    .await?
}

/// Worklist tracer over the local filesystem.
pub struct Tracer<'a> {
    config: &'a TraceConfig,
}

enum Resolution {
    /// Builtins and ignored modules.
    Skip,
    Missing,
    Found {
        file: PathBuf,
        manifests: Vec<PathBuf>,
    },
}

impl<'a> Tracer<'a> {
    pub fn new(config: &'a TraceConfig) -> Self {
        Self { config }
    }

    /// Follow every static specifier reachable from `entries` (absolute paths).
    pub fn trace(&self, entries: &[PathBuf]) -> Result<TraceOutput, TraceError> {
        let mut scanner = ImportScanner::new()?;
        let mut output = TraceOutput::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();

        for entry in entries {
            let entry = normalize_lexically(entry);
            if seen.insert(entry.clone()) {
                queue.push_back(entry);
            }
        }

        while let Some(file) = queue.pop_front() {
            if !is_scannable(&file) {
                continue;
            }
            let bytes = std::fs::read(&file).map_err(|e| TraceError::ReadSource {
                path: file.clone(),
                source: e,
            })?;
            let source = String::from_utf8_lossy(&bytes);

            let imports = scanner.scan(&source).map_err(|e| TraceError::Parse {
                path: file.clone(),
                source: e,
            })?;

            for import in imports {
                let Some(specifier) = import.specifier.clone() else {
                    tracing::debug!(file = %file.display(), "dynamic specifier");
                    record_miss(&mut output, &file, &source, &import, MissKind::Dynamic);
                    continue;
                };
                match self.resolve(&specifier, &file) {
                    Resolution::Skip => {}
                    Resolution::Missing => {
                        if self.is_allowed_missing(&specifier, &file) {
                            tracing::debug!(specifier, "allowed missing module");
                        } else {
                            record_miss(&mut output, &file, &source, &import, MissKind::Unresolved);
                        }
                    }
                    Resolution::Found { file: target, manifests } => {
                        output.dependencies.extend(manifests);
                        let target = normalize_lexically(&target);
                        output.dependencies.insert(target.clone());
                        if seen.insert(target.clone()) {
                            queue.push_back(target);
                        }
                    }
                }
            }
        }

        Ok(output)
    }

    fn resolve(&self, specifier: &str, from_file: &Path) -> Resolution {
        if specifier.is_empty() {
            return Resolution::Missing;
        }
        if is_builtin(specifier) {
            return Resolution::Skip;
        }
        let from_dir = from_file.parent().unwrap_or(Path::new("/"));

        if is_relative(specifier) {
            return match resolve_path(&from_dir.join(specifier)) {
                Some(file) => Resolution::Found {
                    file,
                    manifests: Vec::new(),
                },
                None => Resolution::Missing,
            };
        }

        let (name, subpath) = split_specifier(specifier);
        if self
            .config
            .ignores
            .iter()
            .any(|ignored| ignored == name || ignored == specifier)
        {
            return Resolution::Skip;
        }

        let Some(package_dir) = crate::graph::find_installed(from_dir, name) else {
            return Resolution::Missing;
        };
        let manifest = read_manifest(&package_dir);
        let manifests = match manifest {
            Some(_) => vec![package_dir.join(MANIFEST_FILE)],
            None => Vec::new(),
        };

        let file = match subpath {
            Some(sub) => manifest
                .as_ref()
                .and_then(|m| m.export_target(&format!("./{sub}")))
                .and_then(|target| resolve_file(&package_dir.join(target)))
                .or_else(|| resolve_path(&package_dir.join(sub))),
            None => resolve_package_main(&package_dir, manifest.as_ref(), true),
        };

        match file {
            Some(file) => Resolution::Found { file, manifests },
            None => Resolution::Missing,
        }
    }

    fn is_allowed_missing(&self, specifier: &str, from_file: &Path) -> bool {
        let (name, _) = split_specifier(specifier);
        let listed = |list: &[String]| list.iter().any(|m| m == name || m == specifier);

        let allow = &self.config.allow_missing;
        if listed(&allow.modules) {
            return true;
        }
        requiring_package(from_file)
            .and_then(|pkg| allow.packages.get(&pkg))
            .is_some_and(|list| listed(list))
    }
}

fn record_miss(
    output: &mut TraceOutput,
    file: &Path,
    source: &str,
    import: &Import,
    kind: MissKind,
) {
    output
        .misses
        .entry(file.to_path_buf())
        .or_default()
        .push(CallSite {
            kind,
            request: import.specifier.clone(),
            line: import.line,
            column: import.column,
            code: snippet_at(source, import.offset),
        });
}

fn snippet_at(source: &str, offset: usize) -> String {
    source
        .get(offset..)
        .unwrap_or_default()
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end()
        .chars()
        .take(MAX_SNIPPET_CHARS)
        .collect()
}

// ── Resolution ──

fn is_scannable(file: &Path) -> bool {
    !matches!(
        file.extension().and_then(|e| e.to_str()),
        Some("json" | "node")
    )
}

fn is_builtin(specifier: &str) -> bool {
    if specifier.starts_with("node:") {
        return true;
    }
    let first = specifier.split('/').next().unwrap_or(specifier);
    NODE_BUILTINS.contains(&first)
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
}

/// Split a bare specifier into package name and optional subpath:
/// `@scope/pkg/lib/x` gives `("@scope/pkg", Some("lib/x"))`.
fn split_specifier(specifier: &str) -> (&str, Option<&str>) {
    let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut end = 0;
    for (i, segment) in specifier.split('/').enumerate() {
        if i == name_segments {
            return (&specifier[..end], Some(&specifier[end + 1..]).filter(|s| !s.is_empty()));
        }
        end += if i == 0 { segment.len() } else { segment.len() + 1 };
    }
    (specifier, None)
}

/// The installed package a file belongs to: the name after the last
/// `node_modules` segment of its path.
fn requiring_package(file: &Path) -> Option<String> {
    let parts: Vec<String> = file
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let idx = parts.iter().rposition(|p| p == DEPENDENCY_ROOT)?;
    let first = parts.get(idx + 1)?;
    if first.starts_with('@') {
        let second = parts.get(idx + 2)?;
        Some(format!("{first}/{second}"))
    } else {
        Some(first.clone())
    }
}

fn read_manifest(dir: &Path) -> Option<PackageManifest> {
    match PackageManifest::load_optional(dir) {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "ignoring unreadable package manifest");
            None
        }
    }
}

fn resolve_path(path: &Path) -> Option<PathBuf> {
    resolve_file(path).or_else(|| resolve_directory(path))
}

fn resolve_directory(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    resolve_package_main(dir, read_manifest(dir).as_ref(), false)
}

/// `exports` (for installed packages), then `main`, then `index.*`.
fn resolve_package_main(
    dir: &Path,
    manifest: Option<&PackageManifest>,
    use_exports: bool,
) -> Option<PathBuf> {
    if use_exports {
        if let Some(found) = manifest
            .and_then(|m| m.export_target("."))
            .and_then(|target| resolve_file(&dir.join(target)))
        {
            return Some(found);
        }
    }
    if let Some(main) = manifest.and_then(|m| m.main.as_deref()) {
        let main = dir.join(main);
        if let Some(found) = resolve_file(&main).or_else(|| resolve_index(&main)) {
            return Some(found);
        }
    }
    resolve_index(dir)
}

fn resolve_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    EXTENSIONS
        .iter()
        .map(|ext| with_appended_extension(path, ext))
        .find(|candidate| candidate.is_file())
}

fn resolve_index(dir: &Path) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("index{ext}")))
        .find(|candidate| candidate.is_file())
}

fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(ext);
    PathBuf::from(raw)
}
