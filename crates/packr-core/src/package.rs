//! Workspace package identity.
//!
//! A build starts from one root (the service directory's dependency base)
//! plus optional extra roots and workspace packages. Each becomes a
//! [`PackageDescriptor`]; the ones reachable through production
//! dependency edges form the [`RequestedPackageMap`].

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::manifest::{MANIFEST_FILE, PackageManifest};
use crate::path::relative_posix;

/// Reserved name of the main workspace root.
pub const ROOT_PACKAGE_NAME: &str = "$root";

/// Archive directory that namespaces workspace packages.
pub const PACKAGES_DIR: &str = "packages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Root,
    Package,
}

/// Direct production dependencies of one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageDeps {
    /// Workspace packages depended on, by name.
    pub packages: BTreeSet<String>,
    /// Installed dependency directories (and `.bin` stubs), relative to the
    /// working directory, sorted.
    pub external: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PackageKind,
    pub scoped: bool,
    pub full_path: PathBuf,
    /// Forward-slash path relative to the working directory (`""` for the cwd itself).
    pub relative_path: String,
    /// Populated during dependency resolution.
    pub deps: Option<PackageDeps>,
}

impl PackageDescriptor {
    pub fn new(name: String, kind: PackageKind, full_path: PathBuf, cwd: &Path) -> Self {
        let relative_path = relative_posix(cwd, &full_path);
        Self {
            scoped: name.starts_with('@'),
            name,
            kind,
            full_path,
            relative_path,
            deps: None,
        }
    }

    /// Descriptor for a dependency root. Roots are named by the caller and
    /// need not carry a `package.json`.
    pub fn root(name: &str, full_path: PathBuf, cwd: &Path) -> Self {
        Self::new(name.to_owned(), PackageKind::Root, full_path, cwd)
    }

    /// Descriptor for a workspace package; its manifest must exist and be named.
    pub fn package(full_path: PathBuf, cwd: &Path) -> crate::Result<Self> {
        let manifest = PackageManifest::load(&full_path)?;
        let name = manifest
            .name
            .ok_or_else(|| crate::Error::MissingPackageName {
                path: full_path.join(MANIFEST_FILE),
            })?;
        Ok(Self::new(name, PackageKind::Package, full_path, cwd))
    }

    /// Directory this package occupies inside the archive (`""` for roots).
    pub fn archive_dir(&self) -> String {
        match self.kind {
            PackageKind::Root => String::new(),
            PackageKind::Package => format!("{PACKAGES_DIR}/{}", self.name),
        }
    }

    /// Whether `relative_path` lies inside this package's directory.
    pub fn contains_path(&self, relative_path: &str) -> bool {
        if self.relative_path.is_empty() {
            return !relative_path.starts_with("../");
        }
        relative_path
            .strip_prefix(self.relative_path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Packages reachable from the requested entry packages, keyed by name and,
/// redundantly, by relative path.
#[derive(Debug, Clone, Default)]
pub struct RequestedPackageMap {
    by_name: BTreeMap<String, PackageDescriptor>,
    by_path: BTreeMap<String, String>,
}

impl RequestedPackageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor; returns `false` if the name is already present.
    pub fn insert(&mut self, descriptor: PackageDescriptor) -> bool {
        if self.by_name.contains_key(&descriptor.name) {
            return false;
        }
        self.by_path
            .insert(descriptor.relative_path.clone(), descriptor.name.clone());
        self.by_name.insert(descriptor.name.clone(), descriptor);
        true
    }

    pub fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.by_name.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PackageDescriptor> {
        self.by_name.get_mut(name)
    }

    pub fn get_by_path(&self, relative_path: &str) -> Option<&PackageDescriptor> {
        self.by_path
            .get(relative_path)
            .and_then(|name| self.by_name.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PackageDescriptor> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// The non-root package whose directory most specifically contains `relative_path`.
    pub fn owner_of(&self, relative_path: &str) -> Option<&PackageDescriptor> {
        self.by_name
            .values()
            .filter(|d| d.kind == PackageKind::Package && d.contains_path(relative_path))
            .max_by_key(|d| d.relative_path.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, rel: &str) -> PackageDescriptor {
        let cwd = Path::new("/repo");
        PackageDescriptor::new(name.to_owned(), PackageKind::Package, cwd.join(rel), cwd)
    }

    #[test]
    fn descriptor_relative_path_and_scope() {
        let d = pkg("@acme/util", "packages/util");
        assert!(d.scoped);
        assert_eq!(d.relative_path, "packages/util");
        assert_eq!(d.archive_dir(), "packages/@acme/util");
    }

    #[test]
    fn contains_path_requires_segment_boundary() {
        let d = pkg("foo", "packages/foo");
        assert!(d.contains_path("packages/foo/src/x.js"));
        assert!(!d.contains_path("packages/foobar/src/x.js"));
        assert!(!d.contains_path("packages/foo"));
    }

    #[test]
    fn map_lookup_by_name_and_path() {
        let mut map = RequestedPackageMap::new();
        assert!(map.insert(pkg("foo", "packages/foo")));
        assert!(!map.insert(pkg("foo", "elsewhere/foo")));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get_by_path("packages/foo").unwrap().name, "foo");
        assert!(map.get_by_path("elsewhere/foo").is_none());
    }

    #[test]
    fn owner_of_prefers_longest_match_and_skips_roots() {
        let cwd = Path::new("/repo");
        let mut map = RequestedPackageMap::new();
        map.insert(PackageDescriptor::new(
            ROOT_PACKAGE_NAME.to_owned(),
            PackageKind::Root,
            cwd.to_path_buf(),
            cwd,
        ));
        map.insert(pkg("outer", "packages/outer"));
        map.insert(pkg("inner", "packages/outer/nested/inner"));

        assert_eq!(
            map.owner_of("packages/outer/nested/inner/a.js").unwrap().name,
            "inner"
        );
        assert_eq!(map.owner_of("packages/outer/b.js").unwrap().name, "outer");
        assert!(map.owner_of("src/index.js").is_none());
    }

    #[test]
    fn root_descriptor_is_never_namespaced() {
        let cwd = Path::new("/repo/services/api");
        let d = PackageDescriptor::root(ROOT_PACKAGE_NAME, PathBuf::from("/repo"), cwd);
        assert_eq!(d.kind, PackageKind::Root);
        assert_eq!(d.relative_path, "../..");
        assert_eq!(d.archive_dir(), "");
        assert!(!d.scoped);
    }

    #[test]
    fn package_without_name_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("package.json"), "{}").unwrap();
        let err = PackageDescriptor::package(tmp.path().to_path_buf(), tmp.path()).unwrap_err();
        assert!(err.to_string().contains("no `name`"), "got: {err}");
    }
}
