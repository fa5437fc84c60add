//! Error types for upsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the file that was being read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A config file passed explicitly (`--config`) does not exist.
    #[error("config file not found at {path}")]
    NotFound { path: PathBuf },

    /// The merged configuration violates a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
