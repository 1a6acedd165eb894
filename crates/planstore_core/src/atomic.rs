//! Crash-safe single-file JSON writes.
//!
//! Every document the engine persists goes through [`atomic_write`]: the new
//! content lands in a uniquely named temp file beside the target, is synced and
//! re-parsed, and only then renamed over the target. Readers therefore observe
//! either the complete old file or the complete new one.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// File name prefix shared by all temp files, used by verification to spot strays.
pub const TEMP_PREFIX: &str = ".tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
///
/// Parent directories are created as needed.
pub fn atomic_write<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::storage(path, format!("failed to serialize: {e}")))?;
    atomic_write_bytes_with(path, &bytes, validate_json)
}

/// Writes `bytes` atomically to `path`, running `validate` against the bytes
/// read back from the temp file before the rename.
///
/// If anything fails the temp file is removed and `path` keeps its prior content.
pub fn atomic_write_bytes_with<F>(path: &Path, bytes: &[u8], validate: F) -> Result<()>
where
    F: FnOnce(&Path, &[u8]) -> Result<()>,
{
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::storage(path, "target has no parent directory"))?;
    fs::create_dir_all(dir).map_err(|e| StoreError::storage(dir, e.to_string()))?;

    let tmp_path = temp_path_for(path);
    let outcome = write_verify_rename(&tmp_path, path, bytes, validate);

    if outcome.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %e, "failed to remove temp file");
            }
        }
        return outcome;
    }

    // fsync parent directory (Unix-specific for crash safety)
    #[cfg(unix)]
    {
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }

    Ok(())
}

fn write_verify_rename<F>(tmp_path: &Path, path: &Path, bytes: &[u8], validate: F) -> Result<()>
where
    F: FnOnce(&Path, &[u8]) -> Result<()>,
{
    {
        let mut file = File::create(tmp_path).map_err(|e| StoreError::storage(tmp_path, e.to_string()))?;
        file.write_all(bytes)
            .map_err(|e| StoreError::storage(tmp_path, e.to_string()))?;
        file.sync_all()
            .map_err(|e| StoreError::storage(tmp_path, e.to_string()))?;
    }

    let written = fs::read(tmp_path).map_err(|e| StoreError::storage(tmp_path, e.to_string()))?;
    validate(tmp_path, &written)?;

    fs::rename(tmp_path, path).map_err(|e| StoreError::storage(path, e.to_string()))
}

/// Default validator: the temp file must hold well-formed JSON.
fn validate_json(tmp_path: &Path, bytes: &[u8]) -> Result<()> {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .map(|_| ())
        .map_err(|e| StoreError::storage(tmp_path, format!("written file is not valid JSON: {e}")))
}

/// Builds a temp path unique per call: pid, a process-wide counter and a uuid.
fn temp_path_for(path: &Path) -> PathBuf {
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_name = format!(
        "{TEMP_PREFIX}{}-{seq}-{}-{name}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    path.with_file_name(tmp_name)
}

/// Reads and deserializes a JSON document.
///
/// Returns `Ok(None)` if the file does not exist. A file that exists but does
/// not parse is reported as a [`StoreError::Storage`]; no repair is attempted.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::storage(path, e.to_string())),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::storage(path, format!("corrupted JSON: {e}")))
}

/// Reads a file's raw bytes, `None` if absent.
pub(crate) fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::storage(path, e.to_string())),
    }
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::storage(path, e.to_string())),
    }
}

/// Returns true if `path` names a temp file left by an interrupted write.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}
