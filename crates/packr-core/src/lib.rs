//! Core types and configuration for packr.
//!
//! This crate defines the `packr.toml` schema ([`PackrConfig`]), `package.json`
//! reading ([`PackageManifest`]), workspace package identity
//! ([`PackageDescriptor`], [`RequestedPackageMap`]), relative path
//! classification ([`path::classify`]), and shared error types.

pub mod config;
pub mod error;
pub mod manifest;
pub mod package;
pub mod path;

pub use config::{
    AllowMissing, FunctionConfig, PackrConfig, ServiceConfig, TraceConfig, TraceOptions,
    UnitOptions, WorkspaceConfig,
};
pub use error::{Error, Result};
pub use manifest::{DeclaredDependency, PackageManifest};
pub use package::{
    PackageDeps, PackageDescriptor, PackageKind, RequestedPackageMap, ROOT_PACKAGE_NAME,
};
pub use path::{PathParts, classify};
