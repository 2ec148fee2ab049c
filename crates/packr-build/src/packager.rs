//! One-call packaging of a unit: resolve, detect collapses, archive.

use packr_core::{PackageDescriptor, ROOT_PACKAGE_NAME, RequestedPackageMap, UnitOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::archive::{ArchiveError, ArchiveWriter, ZipArchiver, read_entries, symlink_entries};
use crate::collapse::CollapseReport;
use crate::filter::{FilterError, PatternSet, ResolvedFileSet};
use crate::graph::{GraphError, WorkspaceGraph};
use crate::trace::{CallSite, TraceError};

/// Dependency strategy a unit was packaged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Trace,
    Dependency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    /// Untraceable specifiers by requiring file (empty outside trace mode).
    pub misses: BTreeMap<String, Vec<CallSite>>,
}

/// Full resolution detail, returned only when `report` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub patterns: PatternSet,
    pub files: ResolvedFileSet,
}

/// Result of packaging one unit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOutcome {
    pub num_files: usize,
    pub bundle_path: PathBuf,
    pub mode: Mode,
    pub build_time_ms: u64,
    pub collapsed: CollapseReport,
    pub trace: TraceSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
}

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("packaging task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Packages units with an [`ArchiveWriter`].
///
/// Clones share the writer, so one packager can drive many units at once.
pub struct Packager<A: ArchiveWriter = ZipArchiver> {
    archiver: Arc<A>,
}

impl Packager<ZipArchiver> {
    pub fn new() -> Self {
        Self::with_archiver(ZipArchiver)
    }
}

impl Default for Packager<ZipArchiver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ArchiveWriter> Clone for Packager<A> {
    fn clone(&self) -> Self {
        Self {
            archiver: Arc::clone(&self.archiver),
        }
    }
}

/// Dependency strategy output, before filtering.
struct Strategy {
    mode: Mode,
    dep_include: Vec<String>,
    packages: RequestedPackageMap,
    misses: BTreeMap<String, Vec<CallSite>>,
}

impl<A: ArchiveWriter + 'static> Packager<A> {
    pub fn with_archiver(archiver: A) -> Self {
        Self {
            archiver: Arc::new(archiver),
        }
    }

    /// Enumerate and filter the files of `patterns`; an empty result is an error.
    pub async fn resolve_file_paths_from_patterns(
        &self,
        cwd: &Path,
        patterns: &PatternSet,
    ) -> Result<ResolvedFileSet, PackError> {
        Ok(crate::glob::resolve_file_paths_from_patterns(cwd, patterns).await?)
    }

    pub async fn find_collapsed(
        &self,
        files: &[String],
        cwd: &Path,
    ) -> Result<CollapseReport, PackError> {
        Ok(crate::collapse::find_collapsed(files, cwd).await?)
    }

    /// Read `files` and write them, plus package symlinks, to `bundle_path`.
    pub async fn create_zip(
        &self,
        cwd: &Path,
        files: &[String],
        bundle_path: &Path,
        packages: &RequestedPackageMap,
    ) -> Result<(), PackError> {
        let entries = read_entries(cwd, files, packages).await?;
        let links = symlink_entries(packages);
        let archiver = Arc::clone(&self.archiver);
        let destination = bundle_path.to_path_buf();

        tokio::task::spawn_blocking(move || archiver.write_archive(&destination, &entries, &links))
            .await??;
        Ok(())
    }

    /// Package one unit.
    ///
    /// Trace mode is used when the unit has trace entries, the package-graph
    /// strategy otherwise. Collapses and trace misses are reported in the
    /// outcome and never fail the build.
    pub async fn glob_and_zip(&self, options: &UnitOptions) -> Result<PackageOutcome, PackError> {
        let started = Instant::now();
        let cwd = options.cwd.as_path();

        let strategy = self.resolve_strategy(options).await?;
        let patterns = PatternSet {
            pre_include: vec!["**".to_owned()],
            dep_include: strategy.dep_include,
            include: options.include.clone(),
            exclude: options.exclude.clone(),
        };

        let files = self.resolve_file_paths_from_patterns(cwd, &patterns).await?;
        let collapsed = self.find_collapsed(&files.included, cwd).await?;
        self.create_zip(cwd, &files.included, &options.bundle_path, &strategy.packages)
            .await?;

        // arch-lint: allow(no-silent-result-drop) reason="elapsed time beyond u64 milliseconds saturates"
        let build_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            bundle = %options.bundle_name,
            path = %options.bundle_path.display(),
            files = files.included.len(),
            mode = ?strategy.mode,
            elapsed_ms = build_time_ms,
            "packaged"
        );

        Ok(PackageOutcome {
            num_files: files.included.len(),
            bundle_path: options.bundle_path.clone(),
            mode: strategy.mode,
            build_time_ms,
            collapsed,
            trace: TraceSummary {
                misses: strategy.misses,
            },
            report: options.report.then_some(Report { patterns, files }),
        })
    }

    /// Package every unit concurrently. A failing unit does not affect the
    /// others; results come back in input order.
    pub async fn package_all(
        &self,
        units: Vec<UnitOptions>,
    ) -> Vec<(String, Result<PackageOutcome, PackError>)> {
        let handles: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let packager = self.clone();
                let name = unit.bundle_name.clone();
                (name, tokio::spawn(async move { packager.glob_and_zip(&unit).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(PackError::Task(e)),
            };
            if let Err(e) = &result {
                tracing::debug!(bundle = %name, error = %e, "unit failed");
            }
            results.push((name, result));
        }
        results
    }

    async fn resolve_strategy(&self, options: &UnitOptions) -> Result<Strategy, PackError> {
        let cwd = options.cwd.as_path();

        if let Some(trace) = options.trace.as_ref().filter(|_| options.uses_trace()) {
            let traced = crate::trace::trace_dep_include(cwd, &trace.entries, &trace.config).await?;
            let mut packages = RequestedPackageMap::new();
            packages.insert(PackageDescriptor::root(
                ROOT_PACKAGE_NAME,
                options.root_path.clone(),
                cwd,
            ));
            return Ok(Strategy {
                mode: Mode::Trace,
                dep_include: traced.dep_include,
                packages,
                misses: traced.misses,
            });
        }

        let (cwd_buf, root_path, workspace) = (
            options.cwd.clone(),
            options.root_path.clone(),
            options.workspace.clone(),
        );
        let graph = tokio::task::spawn_blocking(move || {
            WorkspaceGraph::load(&cwd_buf, &root_path, &workspace)
        })
        .await??;
        let graph = Arc::new(graph);
        let packages = Arc::clone(&graph).requested_packages().await?;
        let dep_include = graph.dependency_patterns(&packages);

        Ok(Strategy {
            mode: Mode::Dependency,
            dep_include,
            packages,
            misses: BTreeMap::new(),
        })
    }
}
