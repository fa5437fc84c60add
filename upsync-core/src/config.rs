//! Layered YAML configuration.
//!
//! # Layers (later wins)
//!
//! ```text
//! built-in defaults
//! ~/.upsync/config.yaml        (per-user)
//! <repo>/.upsync.yaml          (per-repository, usually committed)
//! --config <file>              (explicit; must exist)
//! ```
//!
//! Each file is a partial document: keys it omits fall through to the layer
//! below. Unknown keys are rejected so a typo never silently reverts to a
//! default.
//!
//! # API pattern
//!
//! - `fn_at(home, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{RiskLevel, Strategy};

pub const REPO_CONFIG_FILE: &str = ".upsync.yaml";

// ---------------------------------------------------------------------------
// 1. Merged configuration
// ---------------------------------------------------------------------------

/// Fully resolved configuration for a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote that carries the upstream history.
    pub remote: String,
    /// Ref to integrate.
    pub target_ref: String,
    pub strategy: Strategy,
    pub fetch_timeout_secs: u64,
    /// Backup branches are named `<prefix><YYYYMMDD-HHMMSS>`.
    pub backup_prefix: String,
    /// `{target_ref}` is substituted.
    pub merge_message: String,
    /// Where per-run report directories go. `None` means `<git-dir>/upsync/reports`.
    pub report_root: Option<PathBuf>,
    /// Optional `.tera` overrides for the narrative reports.
    pub templates_dir: Option<PathBuf>,
    /// Where the conflict-resolution procedures live, relative to the repo.
    pub conflict_guide: String,
    pub thresholds: RiskThresholds,
    pub layout: Layout,
    pub checks: Vec<CheckSpec>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: "upstream".to_string(),
            target_ref: "upstream/main".to_string(),
            strategy: Strategy::Merge,
            fetch_timeout_secs: 120,
            backup_prefix: "backup/pre-sync-".to_string(),
            merge_message: "Merge upstream changes from {target_ref}".to_string(),
            report_root: None,
            templates_dir: None,
            conflict_guide: "docs/upstream-sync/conflict-resolution.md".to_string(),
            thresholds: RiskThresholds::default(),
            layout: Layout::default(),
            checks: default_checks(),
        }
    }
}

impl SyncConfig {
    /// Merge message with `{target_ref}` filled in.
    pub fn merge_message_for(&self, target_ref: &str) -> String {
        self.merge_message.replace("{target_ref}", target_ref)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.thresholds.medium > self.thresholds.high {
            return Err(ConfigError::Invalid(format!(
                "thresholds.medium ({}) must not exceed thresholds.high ({})",
                self.thresholds.medium, self.thresholds.high
            )));
        }
        if self.remote.trim().is_empty() {
            return Err(ConfigError::Invalid("remote must not be empty".to_string()));
        }
        if self.backup_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "backup_prefix must not be empty".to_string(),
            ));
        }
        for check in &self.checks {
            if check.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "check '{}' has an empty command",
                    check.name
                )));
            }
        }
        Ok(())
    }
}

/// Score thresholds for [`RiskLevel`]. Fixed per configuration, never derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskThresholds {
    pub medium: u32,
    pub high: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { medium: 2, high: 5 }
    }
}

impl RiskThresholds {
    pub fn level(&self, score: u32) -> RiskLevel {
        if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Repository layout the classifier matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    pub templates_root: String,
    pub cli_roots: Vec<String>,
    /// Manifest of the CLI package; counts as `cli`, not `dependencies`.
    pub cli_manifest: String,
    pub scripts_root: String,
    pub ci_root: String,
    pub tests_root: String,
    pub docs_roots: Vec<String>,
    pub manifest_names: Vec<String>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            templates_root: "templates/".to_string(),
            cli_roots: vec!["src/".to_string()],
            cli_manifest: "pyproject.toml".to_string(),
            scripts_root: "scripts/".to_string(),
            ci_root: ".github/workflows/".to_string(),
            tests_root: "tests/".to_string(),
            docs_roots: vec!["docs/".to_string(), "dev-docs/".to_string()],
            manifest_names: [
                "requirements.txt",
                "requirements-dev.txt",
                "setup.py",
                "setup.cfg",
                "Pipfile",
                "poetry.lock",
                "uv.lock",
                "package.json",
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "Cargo.toml",
                "Cargo.lock",
                "go.mod",
                "go.sum",
                "Gemfile",
                "Gemfile.lock",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// An external post-sync check, invoked as a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckSpec {
    pub name: String,
    /// Program followed by arguments. `{target_ref}` and `{report_dir}` are
    /// substituted in arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub remediation: String,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

fn default_check_timeout() -> u64 {
    300
}

fn default_checks() -> Vec<CheckSpec> {
    vec![
        CheckSpec {
            name: "structure-lint".to_string(),
            command: vec![
                "python3".to_string(),
                "scripts/sdd/validate_structure.py".to_string(),
            ],
            remediation: "restore the required SDD directories and governance files listed in the check output".to_string(),
            timeout_secs: default_check_timeout(),
        },
        CheckSpec {
            name: "language-policy".to_string(),
            command: vec!["scripts/sdd/check_language_policy.sh".to_string()],
            remediation: "rewrite the reported lines to follow the language policy".to_string(),
            timeout_secs: default_check_timeout(),
        },
        CheckSpec {
            name: "template-drift".to_string(),
            command: vec![
                "scripts/sdd/check_template_drift.sh".to_string(),
                "{target_ref}".to_string(),
            ],
            remediation: "reconcile local templates with upstream or record the divergence as intentional".to_string(),
            timeout_secs: default_check_timeout(),
        },
    ]
}

// ---------------------------------------------------------------------------
// 2. Partial layers
// ---------------------------------------------------------------------------

/// One config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    remote: Option<String>,
    target_ref: Option<String>,
    strategy: Option<Strategy>,
    fetch_timeout_secs: Option<u64>,
    backup_prefix: Option<String>,
    merge_message: Option<String>,
    report_root: Option<PathBuf>,
    templates_dir: Option<PathBuf>,
    conflict_guide: Option<String>,
    thresholds: Option<RiskThresholds>,
    layout: Option<Layout>,
    checks: Option<Vec<CheckSpec>>,
}

impl PartialConfig {
    /// Overlay `self` onto `base`. Relative directories are resolved against
    /// `anchor`, the directory holding the file.
    fn apply(self, mut base: SyncConfig, anchor: &Path) -> SyncConfig {
        if let Some(v) = self.remote {
            base.remote = v;
        }
        if let Some(v) = self.target_ref {
            base.target_ref = v;
        }
        if let Some(v) = self.strategy {
            base.strategy = v;
        }
        if let Some(v) = self.fetch_timeout_secs {
            base.fetch_timeout_secs = v;
        }
        if let Some(v) = self.backup_prefix {
            base.backup_prefix = v;
        }
        if let Some(v) = self.merge_message {
            base.merge_message = v;
        }
        if let Some(v) = self.report_root {
            base.report_root = Some(anchor.join(v));
        }
        if let Some(v) = self.templates_dir {
            base.templates_dir = Some(anchor.join(v));
        }
        if let Some(v) = self.conflict_guide {
            base.conflict_guide = v;
        }
        if let Some(v) = self.thresholds {
            base.thresholds = v;
        }
        if let Some(v) = self.layout {
            base.layout = v;
        }
        if let Some(v) = self.checks {
            base.checks = v;
        }
        base
    }
}

// ---------------------------------------------------------------------------
// 3. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.upsync/config.yaml`: pure, no I/O.
pub fn global_config_path_at(home: &Path) -> PathBuf {
    home.join(".upsync").join("config.yaml")
}

/// `<repo>/.upsync.yaml`: pure, no I/O.
pub fn repo_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(REPO_CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// 4. Load
// ---------------------------------------------------------------------------

/// Load and merge every layer.
///
/// `home` is `None` when no home directory can be determined; the per-user
/// layer is skipped in that case. Missing implicit layers are skipped; a
/// missing `explicit` file is [`ConfigError::NotFound`].
pub fn load_at(
    home: Option<&Path>,
    repo_root: &Path,
    explicit: Option<&Path>,
) -> Result<SyncConfig, ConfigError> {
    let mut config = SyncConfig::default();

    if let Some(home) = home {
        let path = global_config_path_at(home);
        if let Some(layer) = read_layer(&path)? {
            config = layer.apply(config, &anchor_of(&path));
        }
    }

    let path = repo_config_path(repo_root);
    if let Some(layer) = read_layer(&path)? {
        config = layer.apply(config, repo_root);
    }

    if let Some(path) = explicit {
        let layer = read_layer(path)?.ok_or_else(|| ConfigError::NotFound {
            path: path.to_path_buf(),
        })?;
        config = layer.apply(config, &anchor_of(path));
    }

    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load(repo_root: &Path, explicit: Option<&Path>) -> Result<SyncConfig, ConfigError> {
    let home = dirs::home_dir();
    load_at(home.as_deref(), repo_root, explicit)
}

fn read_layer(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if contents.trim().is_empty() {
        return Ok(Some(PartialConfig::default()));
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
}

fn anchor_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
