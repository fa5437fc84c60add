//! # upsync-renderer
//!
//! Tera-based rendering of the human-readable sync reports. Every narrative
//! report is rendered from the same typed value the structured (JSON) report
//! is serialized from, so the two views cannot drift.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use upsync_core::DiffReport;
//! use upsync_renderer::ReportRenderer;
//!
//! fn narrate(report: &DiffReport) {
//!     if let Ok(renderer) = ReportRenderer::new(None) {
//!         if let Ok(markdown) = renderer.render_changes(report) {
//!             println!("{markdown}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{ChangesContext, CompatibilityContext, SummaryContext};
pub use engine::{ReportKind, ReportRenderer};
pub use error::RenderError;
