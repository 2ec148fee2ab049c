use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the config file looked up in the service directory.
pub const CONFIG_FILE: &str = "packr.toml";

/// Paths packr always excludes, in addition to the bundle directory itself.
const DEFAULT_EXCLUDES: &[&str] = &[".git/**"];

/// packr.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackrConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    /// Individually packaged functions, by name.
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Bundle name (defaults to the service directory name)
    pub name: Option<String>,
    /// Output directory for archives, relative to the service directory
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: String,
    /// Base directory whose `package.json` / `node_modules` define production deps
    #[serde(default = "default_root_path")]
    pub root_path: String,
    /// Package every function into its own archive
    #[serde(default)]
    pub individually: bool,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Extra include globs, applied last
    #[serde(default)]
    pub include: Vec<String>,
    /// Exclude globs; a `!`-prefixed exclude re-includes
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Enables trace mode when present and entry files exist
    pub trace: Option<TraceConfig>,
    /// Return full pattern and file lists with each result
    #[serde(default)]
    pub report: bool,
}

/// Package-graph strategy inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Additional dependency roots, relative to the service directory
    #[serde(default)]
    pub roots: Vec<String>,
    /// Workspace package directories, relative to the service directory
    #[serde(default)]
    pub packages: Vec<String>,
}

/// Trace strategy inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Module names treated as already satisfied
    #[serde(default)]
    pub ignores: Vec<String>,
    #[serde(default)]
    pub allow_missing: AllowMissing,
    /// Extra source globs traced alongside function entries
    #[serde(default)]
    pub include: Vec<String>,
}

/// Unresolved requires that are expected and must not be reported.
///
/// The two lists are independent: a miss is tolerated when either matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowMissing {
    /// Modules allowed to be missing wherever they are required from
    #[serde(default)]
    pub modules: Vec<String>,
    /// Per requiring package: modules allowed to be missing from that package only
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Entry source files (handler modules), relative to the service directory
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Overrides `[service.trace]` for this function
    pub trace: Option<TraceConfig>,
}

/// Fully resolved, validated options for one packaging unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOptions {
    pub bundle_name: String,
    /// Absolute working directory every pattern is relative to
    pub cwd: PathBuf,
    /// Absolute destination archive path
    pub bundle_path: PathBuf,
    /// Absolute dependency-lookup base
    pub root_path: PathBuf,
    pub workspace: WorkspaceConfig,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub trace: Option<TraceOptions>,
    pub report: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    /// Entry globs: function entries followed by `trace.include`
    pub entries: Vec<String>,
    pub config: TraceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: None,
            bundle_dir: default_bundle_dir(),
            root_path: default_root_path(),
            individually: false,
            workspace: WorkspaceConfig::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            trace: None,
            report: false,
        }
    }
}

impl PackrConfig {
    /// Load from packr.toml at the given path, or return defaults if not found.
    pub fn load(service_dir: &Path) -> crate::Result<Self> {
        let config_path = service_dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })
        } else {
            Ok(Self::default())
        }
    }

    /// Expand into packaging units: one for the whole service, or one per
    /// function when `individually` is set and functions exist.
    ///
    /// `cwd` must be absolute.
    pub fn units(&self, cwd: &Path) -> crate::Result<Vec<UnitOptions>> {
        let service = &self.service;
        let service_name = match &service.name {
            Some(name) => name.clone(),
            None => cwd
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "service".to_owned()),
        };

        if service.individually && !self.functions.is_empty() {
            return self
                .functions
                .iter()
                .map(|(name, function)| {
                    let trace = function.trace.as_ref().or(service.trace.as_ref());
                    UnitOptions::build(
                        cwd,
                        service,
                        name,
                        concat(&service.include, &function.include),
                        concat(&service.exclude, &function.exclude),
                        trace.map(|t| TraceOptions::new(function.entries.clone(), t)),
                    )
                })
                .collect();
        }

        let entries: Vec<String> = self
            .functions
            .values()
            .flat_map(|f| f.entries.iter().cloned())
            .collect();
        let unit = UnitOptions::build(
            cwd,
            service,
            &service_name,
            service.include.clone(),
            service.exclude.clone(),
            service
                .trace
                .as_ref()
                .map(|t| TraceOptions::new(entries, t)),
        )?;
        Ok(vec![unit])
    }
}

impl TraceOptions {
    fn new(mut entries: Vec<String>, config: &TraceConfig) -> Self {
        entries.extend(config.include.iter().cloned());
        Self {
            entries,
            config: config.clone(),
        }
    }
}

impl UnitOptions {
    fn build(
        cwd: &Path,
        service: &ServiceConfig,
        bundle_name: &str,
        include: Vec<String>,
        exclude: Vec<String>,
        trace: Option<TraceOptions>,
    ) -> crate::Result<Self> {
        if bundle_name.is_empty() || bundle_name.contains(['/', '\\']) {
            return Err(invalid("name", format!("bad bundle name {bundle_name:?}")));
        }
        validate_patterns("include", &include)?;
        validate_patterns("exclude", &exclude)?;
        validate_relative("workspace.roots", &service.workspace.roots)?;
        validate_relative("workspace.packages", &service.workspace.packages)?;
        if let Some(trace) = &trace {
            validate_patterns("trace.include", &trace.entries)?;
            validate_patterns("trace.ignores", &trace.config.ignores)?;
        }

        let bundle_dir = crate::path::normalize_lexically(&cwd.join(&service.bundle_dir));
        let mut all_excludes: Vec<String> =
            DEFAULT_EXCLUDES.iter().map(|s| (*s).to_owned()).collect();
        if let Some(dir) = bundle_dir_pattern(&service.bundle_dir) {
            all_excludes.push(dir);
        }
        all_excludes.extend(exclude);

        Ok(Self {
            bundle_name: bundle_name.to_owned(),
            cwd: cwd.to_path_buf(),
            bundle_path: bundle_dir.join(format!("{bundle_name}.zip")),
            root_path: crate::path::normalize_lexically(&cwd.join(&service.root_path)),
            workspace: service.workspace.clone(),
            include,
            exclude: all_excludes,
            trace,
            report: service.report,
        })
    }

    /// Whether the trace strategy applies: trace configured with at least one entry.
    pub fn uses_trace(&self) -> bool {
        self.trace.as_ref().is_some_and(|t| !t.entries.is_empty())
    }
}

fn bundle_dir_pattern(bundle_dir: &str) -> Option<String> {
    let dir = crate::path::to_posix(bundle_dir);
    let dir = dir.trim_start_matches("./").trim_end_matches('/');
    if dir.is_empty() || dir == "." || dir.starts_with("../") {
        None
    } else {
        Some(format!("{dir}/**"))
    }
}

fn concat(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().chain(b.iter()).cloned().collect()
}

fn validate_patterns(field: &str, patterns: &[String]) -> crate::Result<()> {
    match patterns.iter().find(|p| p.trim().is_empty() || p.as_str() == "!") {
        Some(p) => Err(invalid(field, format!("empty pattern {p:?}"))),
        None => Ok(()),
    }
}

fn validate_relative(field: &str, paths: &[String]) -> crate::Result<()> {
    match paths.iter().find(|p| Path::new(p.as_str()).is_absolute()) {
        Some(p) => Err(invalid(
            field,
            format!("{p:?} must be relative to the service directory"),
        )),
        None => Ok(()),
    }
}

fn invalid(field: &str, reason: String) -> crate::Error {
    crate::Error::InvalidConfig {
        field: field.to_owned(),
        reason,
    }
}

fn default_bundle_dir() -> String {
    ".packr".to_owned()
}

fn default_root_path() -> String {
    ".".to_owned()
}
