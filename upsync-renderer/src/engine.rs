//! Tera rendering engine: [`ReportKind`] enum and [`ReportRenderer`].
//!
//! # Report files
//!
//! | Report        | Template                  | Output file        |
//! |---------------|---------------------------|--------------------|
//! | Changes       | `changes.md.tera`         | `changes.md`       |
//! | Compatibility | `compatibility.md.tera`   | `compatibility.md` |
//! | Summary       | `summary.md.tera`         | `summary.md`       |
//!
//! A `templates_dir` may hold files with the same names to override the
//! embedded defaults. Override names are matched case-insensitively; any
//! other file in the directory is ignored.

use std::path::Path;

use serde::Serialize;
use tera::Tera;

use upsync_core::{CompatibilityAssessment, DiffReport};

use crate::context::{to_tera_context, ChangesContext, CompatibilityContext, SummaryContext};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("changes.md.tera", include_str!("templates/changes.md.tera")),
    (
        "compatibility.md.tera",
        include_str!("templates/compatibility.md.tera"),
    ),
    ("summary.md.tera", include_str!("templates/summary.md.tera")),
];

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Contents of the override for `template` in `dir`, if one exists.
/// File names match case-insensitively (`Summary.md.tera` overrides
/// `summary.md.tera`); files that name no report are ignored.
fn read_override(dir: &Path, template: &str) -> Result<Option<String>, RenderError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(RenderError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(template));
        if matches && path.is_file() {
            return std::fs::read_to_string(&path)
                .map(Some)
                .map_err(|source| RenderError::Io { path, source });
        }
    }
    Ok(None)
}

/// One template per report kind: the override when present, else the
/// embedded default. A broken override fails here, not at render time.
fn build_tera(overrides: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates = Vec::with_capacity(TPLS.len());
    for (name, embedded) in TPLS {
        let content = match overrides {
            Some(dir) => read_override(dir, name)?,
            None => None,
        };
        templates.push((*name, content.unwrap_or_else(|| (*embedded).to_string())));
    }
    let mut tera = Tera::default();
    tera.add_raw_templates(templates)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// ReportKind
// ---------------------------------------------------------------------------

/// Narrative reports produced per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Changes,
    Compatibility,
    Summary,
}

impl ReportKind {
    /// All report kinds in a stable order.
    pub fn all() -> &'static [ReportKind] {
        &[
            ReportKind::Changes,
            ReportKind::Compatibility,
            ReportKind::Summary,
        ]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            ReportKind::Changes => "changes.md.tera",
            ReportKind::Compatibility => "compatibility.md.tera",
            ReportKind::Summary => "summary.md.tera",
        }
    }

    /// File name inside the run's report directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ReportKind::Changes => "changes.md",
            ReportKind::Compatibility => "compatibility.md",
            ReportKind::Summary => "summary.md",
        }
    }
}

// ---------------------------------------------------------------------------
// ReportRenderer
// ---------------------------------------------------------------------------

/// Renders narrative reports. Create once per run and reuse.
pub struct ReportRenderer {
    tera: Tera,
}

impl ReportRenderer {
    /// Load embedded templates, replacing any that `user_template_dir`
    /// overrides (see the module docs for name matching).
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(ReportRenderer { tera })
    }

    pub fn render_changes(&self, report: &DiffReport) -> Result<String, RenderError> {
        self.render(ReportKind::Changes, &ChangesContext::from_report(report))
    }

    pub fn render_compatibility(
        &self,
        assessment: &CompatibilityAssessment,
        target_ref: &str,
    ) -> Result<String, RenderError> {
        self.render(
            ReportKind::Compatibility,
            &CompatibilityContext::from_assessment(assessment, target_ref),
        )
    }

    pub fn render_summary(&self, ctx: &SummaryContext) -> Result<String, RenderError> {
        self.render(ReportKind::Summary, ctx)
    }

    /// Render `kind` with any serializable payload. Output uses LF line endings.
    pub fn render<T: Serialize>(&self, kind: ReportKind, ctx: &T) -> Result<String, RenderError> {
        let tera_ctx = to_tera_context(ctx)?;
        let rendered = self.tera.render(kind.template_name(), &tera_ctx)?;
        Ok(rendered.replace("\r\n", "\n"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
