//! Result artifact persistence
//!
//! Completed jobs write their serialized payload to one file per job id
//! under the results directory. The job store keeps the artifact path, and
//! the results endpoint streams the file back without re-serializing, so
//! the stored key order is exactly what clients receive.

use std::fs;
use std::path::{Path, PathBuf};
use surveystats_core::StatsResult;
use tracing::debug;

#[derive(Debug)]
pub struct ResultStore {
    directory: PathBuf,
}

impl ResultStore {
    /// Open the store, creating the directory if needed
    pub fn new(directory: impl Into<PathBuf>) -> StatsResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Location of the artifact for one job
    pub fn artifact_path(&self, job_id: u64) -> PathBuf {
        self.directory.join(format!("{job_id}.json"))
    }

    /// Persist one serialized result, returning the artifact path
    pub fn write(&self, job_id: u64, payload: &str) -> StatsResult<PathBuf> {
        let path = self.artifact_path(job_id);
        fs::write(&path, payload)?;
        debug!("Persisted result for job {} at {}", job_id, path.display());
        Ok(path)
    }

    /// Read a previously persisted artifact back as raw JSON text
    pub fn read(&self, artifact: &Path) -> StatsResult<String> {
        Ok(fs::read_to_string(artifact)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();

        let path = store.write(4, "{\"Utah\":25.0}").unwrap();
        assert_eq!(path, store.artifact_path(4));
        assert_eq!(store.read(&path).unwrap(), "{\"Utah\":25.0}");
    }

    #[test]
    fn test_new_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = ResultStore::new(&nested).unwrap();

        store.write(1, "{}").unwrap();
        assert!(nested.join("1.json").exists());
    }

    #[test]
    fn test_read_missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path()).unwrap();
        assert!(store.read(&store.artifact_path(12)).is_err());
    }
}
