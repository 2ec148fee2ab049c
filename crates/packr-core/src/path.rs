//! Relative path classification.
//!
//! Every packaged file is addressed by a path relative to the unit's working
//! directory, always with forward slashes. Those paths may climb out of the
//! working directory (`../node_modules/foo/index.js`) when dependencies are
//! hoisted to a workspace root, so two physical files can share one logical
//! in-archive location. [`classify`] splits a path into the owning package and
//! the path inside it, which is what collapse detection and archive naming key on.

use std::path::{Component, Path, PathBuf};

/// Directory name that marks the boundary between first-party source and
/// installed dependencies.
pub const DEPENDENCY_ROOT: &str = "node_modules";

/// Normalize separators to forward slashes, independent of host OS.
pub fn to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Render a relative [`Path`] with forward slashes.
pub fn path_to_posix(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::CurDir => None,
            Component::ParentDir => Some("..".to_owned()),
            other => Some(other.as_os_str().to_string_lossy().into_owned()),
        })
        .collect();
    parts.join("/")
}

/// A relative path decomposed into owning package and path within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParts {
    /// Owning package name for dependencies (`lodash`, `@scope/pkg`), or the
    /// first meaningful directory for first-party source.
    pub parent_name: String,
    /// Remainder of the path below `parent_name`.
    pub child_path: String,
    /// Leading `.`, `..`, and `node_modules` segments skipped to reach `parent_name`.
    pub prefix_path: String,
    /// `true` when `parent_name` sits directly under a dependency root.
    pub is_dependency: bool,
}

impl PathParts {
    /// Path with every leading traversal segment removed.
    ///
    /// `../node_modules/foo/index.js` and `node_modules/foo/index.js` share the
    /// logical path `node_modules/foo/index.js`.
    pub fn logical_path(&self) -> String {
        let mut segments: Vec<&str> = self
            .prefix_path
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .collect();
        segments.push(&self.parent_name);
        if !self.child_path.is_empty() {
            segments.push(&self.child_path);
        }
        segments.join("/")
    }

    /// Physical location of the owner, e.g. `../node_modules/foo`.
    pub fn owner_path(&self) -> String {
        if self.prefix_path.is_empty() {
            self.parent_name.clone()
        } else {
            format!("{}/{}", self.prefix_path, self.parent_name)
        }
    }
}

/// Split `relative_path` into owning package and child path.
///
/// Returns `None` when the path has no meaningful segment (only `.`, `..`,
/// or dependency-root markers).
///
/// ```
/// use packr_core::path::classify;
///
/// let parts = classify("../node_modules/@scope/pkg/lib/index.js").unwrap();
/// assert!(parts.is_dependency);
/// assert_eq!(parts.parent_name, "@scope/pkg");
/// assert_eq!(parts.child_path, "lib/index.js");
/// assert_eq!(parts.prefix_path, "../node_modules");
/// ```
pub fn classify(relative_path: &str) -> Option<PathParts> {
    let posix = to_posix(relative_path);
    let parts: Vec<&str> = posix.split('/').filter(|s| !s.is_empty()).collect();

    let idx = parts
        .iter()
        .position(|p| *p != "." && *p != ".." && *p != DEPENDENCY_ROOT)?;

    let is_dependency = idx > 0 && parts[idx - 1] == DEPENDENCY_ROOT;
    let name_len = if is_dependency && parts[idx].starts_with('@') && idx + 1 < parts.len() {
        2
    } else {
        1
    };

    Some(PathParts {
        parent_name: parts[idx..idx + name_len].join("/"),
        child_path: parts[idx + name_len..].join("/"),
        prefix_path: parts[..idx].join("/"),
        is_dependency,
    })
}

/// Collapse `.` and `..` components without touching the file system.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Relative path from directory `base` to `target`, both absolute.
pub fn relative_to(base: &Path, target: &Path) -> PathBuf {
    let base = normalize_lexically(base);
    let target = normalize_lexically(target);
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part.as_os_str());
    }
    out
}

/// Relative, forward-slash path from `base` to `target`.
pub fn relative_posix(base: &Path, target: &Path) -> String {
    path_to_posix(&relative_to(base, target))
}

/// Target for an archive symlink at `link` pointing at `target`, both archive-relative.
///
/// ```
/// use packr_core::path::link_target;
///
/// assert_eq!(link_target("node_modules/foo", "packages/foo"), "../packages/foo");
/// assert_eq!(link_target("node_modules/@s/foo", "packages/@s/foo"), "../../packages/@s/foo");
/// ```
pub fn link_target(link: &str, target: &str) -> String {
    let link_parts: Vec<&str> = link.split('/').filter(|s| !s.is_empty()).collect();
    let target_parts: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let link_dir = &link_parts[..link_parts.len().saturating_sub(1)];

    let common = link_dir
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out: Vec<&str> = vec![".."; link_dir.len() - common];
    out.extend_from_slice(&target_parts[common..]);
    out.join("/")
}
