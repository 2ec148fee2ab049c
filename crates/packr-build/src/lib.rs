//! File-set resolution and deterministic zip packaging for packr.
//!
//! # Packaging pipeline
//!
//! ```text
//! Packager::glob_and_zip(unit)
//!   1. Strategy   ── trace entries?  trace::trace_dep_include
//!                    otherwise       graph::WorkspaceGraph → dependency_patterns
//!   2. Filter     ── glob::resolve_file_paths_from_patterns (last match wins)
//!   3. Collapse   ── collapse::find_collapsed (diagnostic only)
//!   4. Archive    ── archive::read_entries + symlink_entries → ArchiveWriter
//! ```
//!
//! # Pattern order
//!
//! Every unit is filtered with `["**"]`, then the strategy's dependency
//! includes, then the configured excludes (negated), then the configured
//! includes. Later patterns override earlier ones, so an explicit include
//! always wins and an exclude can carve files back out of dependencies.
//!
//! # Determinism
//!
//! Archive entries are sorted by in-archive name and stamped with the zip
//! epoch; identical inputs give byte-identical archives.

pub mod archive;
pub mod collapse;
pub mod filter;
pub mod glob;
pub mod graph;
pub mod packager;
pub mod scan;
pub mod trace;

pub use archive::{ArchiveWriter, ZipArchiver};
pub use collapse::CollapseReport;
pub use filter::{FilePattern, PatternSet, ResolvedFileSet};
pub use packager::{Mode, PackError, PackageOutcome, Packager};
