//! List output files with idempotent writes: an output whose signature
//! matches the previous edition is not rewritten, so consumers watching
//! file modification times see no spurious change.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::ListOutput;
use crate::store::files;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

#[derive(Debug)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, list_id: &str) -> PathBuf {
        self.dir.join(format!("{list_id}.json"))
    }

    /// Previous edition of a list, if present and readable. A corrupt file
    /// is treated as absent; the next write replaces it.
    pub fn load(&self, list_id: &str) -> Option<ListOutput> {
        let path = self.path_for(list_id);
        match files::read_json(&path) {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(
                    list_id,
                    path = %path.display(),
                    error = %error,
                    "ignoring unreadable previous output"
                );
                None
            }
        }
    }

    /// Write the new edition unless its signature matches the previous one.
    /// With `dry_run` the decision is reported but nothing touches disk.
    pub fn write_if_changed(
        &self,
        output: &ListOutput,
        previous: Option<&ListOutput>,
        dry_run: bool,
    ) -> Result<WriteOutcome> {
        if previous.is_some_and(|prev| prev.signature() == output.signature()) {
            return Ok(WriteOutcome::Unchanged);
        }
        if !dry_run {
            files::write_json_atomic(&self.path_for(&output.list_id), output)?;
        }
        Ok(WriteOutcome::Written)
    }

    /// Modification time of a list's output file, for tests and diagnostics.
    pub fn modified_at(&self, list_id: &str) -> Option<DateTime<Utc>> {
        let metadata = std::fs::metadata(self.path_for(list_id)).ok()?;
        let modified = metadata.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }
}
