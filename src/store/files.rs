//! JSON file helpers: tolerant reads and temp-file-then-rename writes.
//! Every piece of cross-run state goes through these so a crash mid-run can
//! lose at most the current run's not-yet-flushed updates.

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;

/// Read and deserialize a JSON file. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Read a JSON state file, falling back to the default value when it is
/// missing or unreadable. Used for caches whose loss is recoverable; the
/// fallback is logged so silent resets stay visible.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json(path) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "discarding unreadable state file"
            );
            T::default()
        }
    }
}

/// Serialize `value` and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    let body = serde_json::to_vec_pretty(value).context("failed to serialize state")?;
    tmp.write_all(&body)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|error| anyhow::Error::new(error.error))
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
