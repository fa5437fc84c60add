//! Conflict classification and resolution guidance.
//!
//! Conflicted paths go through the same [`Category`] taxonomy as the change
//! report, and each category maps to one resolution procedure in the
//! conflict guide document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use upsync_core::{Category, Layout};

/// A path left unmerged by a merge or rebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFile {
    pub path: String,
    pub category: Category,
}

impl ConflictFile {
    pub fn classify(path: impl Into<String>, layout: &Layout) -> Self {
        let path = path.into();
        let category = Category::classify(&path, layout);
        Self { path, category }
    }
}

/// Classify every conflicted path.
pub fn classify_all(paths: Vec<String>, layout: &Layout) -> Vec<ConflictFile> {
    paths
        .into_iter()
        .map(|p| ConflictFile::classify(p, layout))
        .collect()
}

/// Resolution procedure for one category.
pub fn procedure(category: Category) -> &'static str {
    match category {
        Category::Templates => {
            "take the upstream template structure, then re-apply local sections and placeholders"
        }
        Category::Cli => {
            "keep upstream code paths, port local patches on top, and re-run the CLI smoke tests"
        }
        Category::Scripts => {
            "start from the upstream script and re-apply local modifications one hunk at a time"
        }
        Category::Ci => "prefer upstream workflow steps; keep local secrets, runners and triggers",
        Category::Tests => "keep both sides' test cases unless one replaces the other",
        Category::Documentation => {
            "prefer upstream wording; re-apply fork-specific notes in their own sections"
        }
        Category::Dependencies => {
            "take the newer version of each dependency, then regenerate lock files"
        }
        Category::Other => "resolve by hand; no category-specific procedure applies",
    }
}

/// Human-readable guidance grouped by category, most sensitive category
/// first. Each group links to the matching section of `guide`.
pub fn guidance(files: &[ConflictFile], guide: &str) -> Vec<String> {
    let mut grouped: BTreeMap<Category, Vec<&str>> = BTreeMap::new();
    for file in files {
        grouped.entry(file.category).or_default().push(&file.path);
    }

    let mut lines = Vec::new();
    for (category, paths) in grouped {
        lines.push(format!(
            "{category} ({} file(s)): {} [{guide}#{category}]",
            paths.len(),
            procedure(category)
        ));
        for path in paths {
            lines.push(format!("  - {path}"));
        }
    }
    lines
}
