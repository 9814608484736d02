//! Snapshot file I/O.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use autoedit_models::{Job, JobId};
use tokio::io::AsyncWriteExt;

use crate::error::{StoreError, StoreResult};

/// Path of the temporary file used while writing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("jobs_data.json"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize the table with stable key order.
pub fn encode(jobs: &HashMap<JobId, Job>) -> StoreResult<Vec<u8>> {
    let ordered: BTreeMap<&JobId, &Job> = jobs.iter().collect();
    Ok(serde_json::to_vec_pretty(&ordered)?)
}

/// Write `bytes` to `path` via temp file, fsync and rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
    file.write_all(bytes).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}

/// Read a snapshot. Returns `None` when no snapshot exists yet.
pub async fn read(path: &Path) -> StoreResult<Option<HashMap<JobId, Job>>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    Ok(Some(serde_json::from_slice(&bytes)?))
}
