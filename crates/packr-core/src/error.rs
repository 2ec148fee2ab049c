use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ── package.json ──
    #[error("failed to read package manifest {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse package manifest {path}")]
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("package manifest {path} has no `name`; workspace packages must be named")]
    MissingPackageName { path: PathBuf },

    #[error(
        "duplicate workspace package name '{name}' at {}",
        format_paths(paths)
    )]
    DuplicatePackage { name: String, paths: Vec<String> },
}

fn format_paths(paths: &[String]) -> String {
    if paths.is_empty() {
        "(none)".to_owned()
    } else {
        paths.join(", ")
    }
}
