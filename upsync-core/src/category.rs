//! Change taxonomy.
//!
//! [`Category::classify`] is the only place a repository path is mapped to a
//! category. The diff reporter groups by it and the compatibility analyzer
//! weights by it, so the two can never disagree.
//!
//! Precedence (first match wins):
//! 1. `templates`: under the templates root
//! 2. `cli`: under a CLI source root, or the CLI manifest file itself
//! 3. `scripts`: under the scripts root, outside the CI root
//! 4. `ci`: under the CI workflow root
//! 5. `tests`: under the tests root
//! 6. `documentation`: under a docs root, or a `.md` file
//! 7. `dependencies`: a recognized manifest file name
//! 8. `other`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Layout;

/// Category of a changed path. Declaration order is match precedence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Templates,
    Cli,
    Scripts,
    Ci,
    Tests,
    Documentation,
    Dependencies,
    Other,
}

impl Category {
    /// All categories in match-precedence order.
    pub fn all() -> &'static [Category] {
        &[
            Category::Templates,
            Category::Cli,
            Category::Scripts,
            Category::Ci,
            Category::Tests,
            Category::Documentation,
            Category::Dependencies,
            Category::Other,
        ]
    }

    /// Fixed risk weight.
    pub fn weight(self) -> u32 {
        match self {
            Category::Templates => 5,
            Category::Cli => 4,
            Category::Scripts => 3,
            Category::Dependencies => 3,
            Category::Ci => 2,
            Category::Documentation => 1,
            Category::Tests => 1,
            Category::Other => 1,
        }
    }

    /// Whether `path` (repo-relative, `/`-separated) belongs to this category,
    /// ignoring precedence.
    pub fn matches(self, path: &str, layout: &Layout) -> bool {
        match self {
            Category::Templates => under(path, &layout.templates_root),
            Category::Cli => {
                layout.cli_roots.iter().any(|root| under(path, root))
                    || path == layout.cli_manifest
            }
            Category::Scripts => {
                under(path, &layout.scripts_root) && !under(path, &layout.ci_root)
            }
            Category::Ci => under(path, &layout.ci_root),
            Category::Tests => under(path, &layout.tests_root),
            Category::Documentation => {
                layout.docs_roots.iter().any(|root| under(path, root))
                    || path.to_ascii_lowercase().ends_with(".md")
            }
            Category::Dependencies => {
                let name = file_name(path);
                layout.manifest_names.iter().any(|m| m == name)
            }
            Category::Other => true,
        }
    }

    /// Classify a path. Total: unmatched paths are [`Category::Other`].
    pub fn classify(path: &str, layout: &Layout) -> Category {
        Category::all()
            .iter()
            .copied()
            .find(|category| category.matches(path, layout))
            .unwrap_or(Category::Other)
    }

    /// Changes in this category always need manual follow-up.
    pub fn requires_adaptation(self) -> bool {
        matches!(self, Category::Templates | Category::Cli)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Templates => "templates",
            Category::Cli => "cli",
            Category::Scripts => "scripts",
            Category::Ci => "ci",
            Category::Tests => "tests",
            Category::Documentation => "documentation",
            Category::Dependencies => "dependencies",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `path` equals `root` or lies beneath it. An empty root matches nothing.
fn under(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return false;
    }
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
