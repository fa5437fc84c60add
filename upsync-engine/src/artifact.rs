//! Report directory writer.
//!
//! ## `write` protocol
//!
//! 1. Normalise line endings to LF.
//! 2. SHA-256 hash the content.
//! 3. Write to `<name>.upsync.tmp` inside the report directory.
//! 4. Rename to the final name (atomic on POSIX).
//! 5. Record name and digest in the manifest that ends up in `run.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

/// One file written into a run's report directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub sha256: String,
    pub bytes: usize,
}

/// Writes artifacts into one report directory and keeps their manifest.
#[derive(Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
    written: Vec<Artifact>,
}

impl ArtifactWriter {
    /// Create the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomically write `name`. Rewriting a name replaces its manifest entry.
    pub fn write(&mut self, name: &str, content: &str) -> Result<PathBuf, SyncError> {
        let content = content.replace("\r\n", "\n");
        let sha256 = digest(&content);

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.upsync.tmp"));
        std::fs::write(&tmp, &content).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }

        self.written.retain(|a| a.name != name);
        self.written.push(Artifact {
            name: name.to_string(),
            sha256,
            bytes: content.len(),
        });
        tracing::debug!(path = %path.display(), "wrote report artifact");
        Ok(path)
    }

    /// Serialize `value` as pretty JSON with a trailing newline.
    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<PathBuf, SyncError> {
        let mut json = serde_json::to_string_pretty(value)?;
        json.push('\n');
        self.write(name, &json)
    }

    /// Artifacts in write order.
    pub fn manifest(&self) -> &[Artifact] {
        &self.written
    }

    /// Names only, for linking from the summary.
    pub fn names(&self) -> Vec<String> {
        self.written.iter().map(|a| a.name.clone()).collect()
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn digest(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    hex::encode(h.finalize())
}
