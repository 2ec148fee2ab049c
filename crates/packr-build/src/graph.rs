//! Package-graph dependency resolution.
//!
//! Production dependencies are discovered from `package.json` declarations
//! rather than from code. Each requested package's declared `dependencies`
//! and `optionalDependencies` are looked up with Node's walk-up rule and
//! split into edges to other workspace packages and installed (external)
//! dependency directories. A breadth-first pass over the package edges then
//! yields every package the entry roots actually need.
//!
//! ```text
//! roots ($root, $root:<rel>)
//!   └─ resolve_production_deps ── package edges ──▶ next frontier
//!                             └─ external dirs + .bin stubs
//! dependency_patterns ── !unrequested/** , !<root>/node_modules/** ,
//!                        <pkg>/** !<pkg>/node_modules/** ,
//!                        <dep>/** !<dep>/node_modules/** , .bin stubs
//! ```

use packr_core::manifest::PackageManifest;
use packr_core::package::PackageKind;
use packr_core::path::{DEPENDENCY_ROOT, normalize_lexically, relative_posix, to_posix};
use packr_core::{
    DeclaredDependency, PackageDeps, PackageDescriptor, ROOT_PACKAGE_NAME, RequestedPackageMap,
    WorkspaceConfig,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Directory under a dependency root that holds executable stubs.
const BIN_DIR: &str = ".bin";

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Core(#[from] packr_core::Error),
    #[error("dependency resolution task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Known roots and workspace packages of one packaging unit.
#[derive(Debug, Clone)]
pub struct WorkspaceGraph {
    cwd: PathBuf,
    /// Main root first, then extra roots in configuration order.
    roots: Vec<PackageDescriptor>,
    packages: BTreeMap<String, PackageDescriptor>,
    /// Canonical directory of each workspace package, for recognizing
    /// packages linked into `node_modules`.
    by_canonical: HashMap<PathBuf, String>,
}

impl WorkspaceGraph {
    /// Describe the roots and read every workspace package manifest.
    ///
    /// A workspace package whose manifest is missing, malformed or unnamed
    /// fails the whole unit; roots need no manifest at all.
    pub fn load(
        cwd: &Path,
        root_path: &Path,
        workspace: &WorkspaceConfig,
    ) -> Result<Self, GraphError> {
        let mut roots = vec![PackageDescriptor::root(
            ROOT_PACKAGE_NAME,
            normalize_lexically(root_path),
            cwd,
        )];
        for rel in &workspace.roots {
            let name = format!(
                "{ROOT_PACKAGE_NAME}:{}",
                to_posix(rel).trim_start_matches("./").trim_end_matches('/')
            );
            roots.push(PackageDescriptor::root(
                &name,
                normalize_lexically(&cwd.join(rel)),
                cwd,
            ));
        }

        let mut packages: BTreeMap<String, PackageDescriptor> = BTreeMap::new();
        let mut by_canonical = HashMap::new();
        for rel in &workspace.packages {
            let descriptor = PackageDescriptor::package(normalize_lexically(&cwd.join(rel)), cwd)?;
            if let Some(existing) = packages.get(&descriptor.name) {
                return Err(packr_core::Error::DuplicatePackage {
                    name: descriptor.name.clone(),
                    paths: vec![
                        existing.relative_path.clone(),
                        descriptor.relative_path.clone(),
                    ],
                }
                .into());
            }
            match std::fs::canonicalize(&descriptor.full_path) {
                Ok(canonical) => {
                    by_canonical.insert(canonical, descriptor.name.clone());
                }
                Err(e) => {
                    tracing::debug!(package = %descriptor.name, error = %e, "cannot canonicalize package path");
                }
            }
            tracing::debug!(
                package = %descriptor.name,
                path = %descriptor.relative_path,
                "workspace package"
            );
            packages.insert(descriptor.name.clone(), descriptor);
        }

        Ok(Self {
            cwd: cwd.to_path_buf(),
            roots,
            packages,
            by_canonical,
        })
    }

    pub fn roots(&self) -> &[PackageDescriptor] {
        &self.roots
    }

    /// Known workspace packages by name, requested or not.
    pub fn packages(&self) -> &BTreeMap<String, PackageDescriptor> {
        &self.packages
    }

    /// Direct production dependencies of the package at `package_path`.
    ///
    /// Declared dependencies naming a workspace package become package
    /// edges. Everything else is located under the nearest `node_modules`
    /// and followed transitively, since installed packages carry their own
    /// runtime dependencies; those directories (and their `.bin` stubs)
    /// are returned as `external`, relative to the working directory.
    /// A package without `package.json` has no dependencies.
    pub fn resolve_production_deps(&self, package_path: &Path) -> Result<PackageDeps, GraphError> {
        let mut deps = PackageDeps::default();
        let Some(manifest) = PackageManifest::load_optional(package_path)? else {
            return Ok(deps);
        };

        let mut external: BTreeSet<String> = BTreeSet::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut stack: Vec<(PathBuf, DeclaredDependency)> = manifest
            .production_dependencies()
            .into_iter()
            .rev()
            .map(|d| (package_path.to_path_buf(), d))
            .collect();

        while let Some((from, dep)) = stack.pop() {
            if self.packages.contains_key(&dep.name) {
                deps.packages.insert(dep.name);
                continue;
            }

            let Some(installed) = find_installed(&from, &dep.name) else {
                if dep.optional {
                    tracing::debug!(dependency = %dep.name, "optional dependency not installed");
                } else {
                    tracing::warn!(
                        dependency = %dep.name,
                        from = %from.display(),
                        "production dependency not installed"
                    );
                }
                continue;
            };

            let canonical = match std::fs::canonicalize(&installed) {
                Ok(canonical) => canonical,
                Err(e) => {
                    tracing::debug!(path = %installed.display(), error = %e, "cannot canonicalize dependency path");
                    installed.clone()
                }
            };
            if let Some(name) = self.by_canonical.get(&canonical) {
                deps.packages.insert(name.clone());
                continue;
            }
            if !visited.insert(canonical) {
                continue;
            }
            external.insert(relative_posix(&self.cwd, &installed));

            let manifest = match PackageManifest::load_optional(&installed) {
                Ok(Some(manifest)) => manifest,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        dependency = %dep.name,
                        error = %e,
                        "skipping dependencies of unreadable manifest"
                    );
                    continue;
                }
            };

            if let Some(bin_dir) = bin_dir_of(&installed, &dep.name) {
                for bin in manifest.bin_names() {
                    let stub = bin_dir.join(&bin);
                    // arch-lint: allow(no-silent-result-drop) reason="packages often declare bins their install did not link"
                    if std::fs::symlink_metadata(&stub).is_ok() {
                        external.insert(relative_posix(&self.cwd, &stub));
                    }
                }
            }

            for child in manifest.production_dependencies().into_iter().rev() {
                stack.push((installed.clone(), child));
            }
        }

        deps.external = external.into_iter().collect();
        Ok(deps)
    }

    /// Every package reachable from the roots over production package
    /// edges, each with its resolved `deps` attached.
    ///
    /// Each frontier is resolved concurrently; results are merged in
    /// frontier order, so the outcome does not depend on task scheduling.
    pub async fn requested_packages(self: Arc<Self>) -> Result<RequestedPackageMap, GraphError> {
        let mut map = RequestedPackageMap::new();
        let mut seen: HashSet<String> = self.roots.iter().map(|r| r.name.clone()).collect();
        let mut frontier: Vec<PackageDescriptor> = self.roots.clone();

        while !frontier.is_empty() {
            let mut tasks = JoinSet::new();
            for (index, descriptor) in frontier.into_iter().enumerate() {
                let graph = Arc::clone(&self);
                tasks.spawn_blocking(move || {
                    let deps = graph.resolve_production_deps(&descriptor.full_path);
                    (index, descriptor, deps)
                });
            }

            let mut resolved = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                let (index, descriptor, deps) = joined?;
                resolved.push((index, descriptor, deps?));
            }
            resolved.sort_by_key(|(index, _, _)| *index);

            let mut next = Vec::new();
            for (_, mut descriptor, deps) in resolved {
                for name in &deps.packages {
                    if seen.insert(name.clone()) {
                        if let Some(package) = self.packages.get(name) {
                            next.push(package.clone());
                        }
                    }
                }
                tracing::debug!(
                    package = %descriptor.name,
                    packages = deps.packages.len(),
                    external = deps.external.len(),
                    "resolved production dependencies"
                );
                descriptor.deps = Some(deps);
                map.insert(descriptor);
            }
            frontier = next;
        }

        Ok(map)
    }

    /// Dependency include patterns for the package-graph strategy.
    ///
    /// Unrequested workspace packages and each root's own `node_modules`
    /// are excluded first; requested packages are then included without
    /// their `node_modules`, and finally each external
    /// dependency directory is included without its nested `node_modules`.
    /// `.bin` stubs are listed verbatim.
    pub fn dependency_patterns(&self, requested: &RequestedPackageMap) -> Vec<String> {
        let mut patterns = Vec::new();

        for (name, package) in &self.packages {
            if !requested.contains(name) {
                patterns.push(format!("!{}", under(&package.relative_path, "**")));
            }
        }
        for descriptor in requested.iter().filter(|d| d.kind == PackageKind::Root) {
            patterns.push(format!(
                "!{}",
                under(&descriptor.relative_path, &format!("{DEPENDENCY_ROOT}/**"))
            ));
        }
        for descriptor in requested.iter().filter(|d| d.kind == PackageKind::Package) {
            patterns.push(under(&descriptor.relative_path, "**"));
            patterns.push(format!(
                "!{}",
                under(&descriptor.relative_path, &format!("{DEPENDENCY_ROOT}/**"))
            ));
        }

        let external: BTreeSet<&str> = requested
            .iter()
            .filter_map(|d| d.deps.as_ref())
            .flat_map(|deps| deps.external.iter().map(String::as_str))
            .collect();
        for dir in external {
            if is_bin_stub(dir) {
                patterns.push(dir.to_owned());
            } else {
                patterns.push(format!("{dir}/**"));
                patterns.push(format!("!{dir}/{DEPENDENCY_ROOT}/**"));
            }
        }

        patterns
    }
}

/// Nearest `node_modules/<name>` directory at or above `from_dir`, skipping
/// directories that are themselves dependency roots.
pub(crate) fn find_installed(from_dir: &Path, name: &str) -> Option<PathBuf> {
    from_dir
        .ancestors()
        .filter(|dir| dir.file_name().is_none_or(|n| n != DEPENDENCY_ROOT))
        .map(|dir| dir.join(DEPENDENCY_ROOT).join(name))
        .find(|candidate| candidate.is_dir())
}

/// `node_modules/.bin` next to an installed package (two levels up for
/// scoped names).
fn bin_dir_of(installed: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = installed;
    for _ in name.split('/') {
        dir = dir.parent()?;
    }
    Some(dir.join(BIN_DIR))
}

fn is_bin_stub(relative_path: &str) -> bool {
    relative_path.split('/').any(|segment| segment == BIN_DIR)
}

fn under(relative_dir: &str, suffix: &str) -> String {
    if relative_dir.is_empty() {
        suffix.to_owned()
    } else {
        format!("{relative_dir}/{suffix}")
    }
}
