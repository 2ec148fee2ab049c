//! `package.json` reading.
//!
//! Only the fields packaging cares about are modeled; everything else in the
//! manifest is ignored.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of a package manifest.
pub const MANIFEST_FILE: &str = "package.json";

/// Export conditions honored when resolving `exports`, highest priority first.
const EXPORT_CONDITIONS: &[&str] = &["require", "node", "default", "import"];

/// The subset of `package.json` used for dependency discovery.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub main: Option<String>,
    pub exports: Option<Value>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Value>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, Value>,
    pub bin: Option<BinField>,
}

/// The `bin` field: either one stub named after the package, or a name map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    Single(String),
    Map(BTreeMap<String, String>),
}

/// A production dependency declared by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    pub name: String,
    pub optional: bool,
}

impl PackageManifest {
    /// Read and parse `<dir>/package.json`.
    pub fn load(dir: &Path) -> crate::Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| crate::Error::ManifestRead {
            path: path.clone(),
            source: e,
        })?;
        Self::parse(&path, &content)
    }

    /// Like [`load`](Self::load), but a missing manifest is `Ok(None)`.
    pub fn load_optional(dir: &Path) -> crate::Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&path, &content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no package manifest");
                Ok(None)
            }
            Err(e) => Err(crate::Error::ManifestRead { path, source: e }),
        }
    }

    fn parse(path: &Path, content: &str) -> crate::Result<Self> {
        serde_json::from_str(content).map_err(|e| crate::Error::ManifestParse {
            path: PathBuf::from(path),
            source: e,
        })
    }

    /// `dependencies` followed by `optionalDependencies` not already listed.
    pub fn production_dependencies(&self) -> Vec<DeclaredDependency> {
        let required = self.dependencies.keys().map(|name| DeclaredDependency {
            name: name.clone(),
            optional: false,
        });
        let optional = self
            .optional_dependencies
            .keys()
            .filter(|name| !self.dependencies.contains_key(*name))
            .map(|name| DeclaredDependency {
                name: name.clone(),
                optional: true,
            });
        required.chain(optional).collect()
    }

    /// Names of the `.bin` stubs this package installs.
    pub fn bin_names(&self) -> Vec<String> {
        match &self.bin {
            None => Vec::new(),
            Some(BinField::Map(map)) => map.keys().cloned().collect(),
            Some(BinField::Single(_)) => self
                .name
                .as_deref()
                .map(|name| name.rsplit('/').next().unwrap_or(name).to_owned())
                .into_iter()
                .collect(),
        }
    }

    /// Target of `exports` for `subpath` (`"."` or `"./feature"`).
    pub fn export_target(&self, subpath: &str) -> Option<String> {
        let exports = self.exports.as_ref()?;
        match exports {
            Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => {
                map.get(subpath).and_then(resolve_conditions)
            }
            _ if subpath == "." => resolve_conditions(exports),
            _ => None,
        }
    }
}

fn resolve_conditions(value: &Value) -> Option<String> {
    match value {
        Value::String(target) => Some(target.clone()),
        Value::Array(items) => items.iter().find_map(resolve_conditions),
        Value::Object(map) => EXPORT_CONDITIONS
            .iter()
            .find_map(|cond| map.get(*cond).and_then(resolve_conditions)),
        _ => None,
    }
}
