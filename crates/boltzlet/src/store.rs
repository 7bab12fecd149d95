//! On-disk job store.
//!
//! Layout under the jobs root:
//!
//! ```text
//! <root>/<job_id>/job_info.json      record (atomically replaced)
//! <root>/<job_id>/boltz_input.yaml   predictor input
//! <root>/<job_id>/boltz_output/      predictor output tree
//! ```
//!
//! The store holds no job state in memory. Every read goes to disk.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::job::{JobId, JobRecord};

pub const RECORD_FILE: &str = "job_info.json";
pub const OUTPUT_DIR: &str = "boltz_output";

const STALE_RUNNING_DETAIL: &str = "interrupted: server restarted before the predictor finished";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed job record {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Handle to the jobs root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open the store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        tracing::debug!(root = %root.display(), "Opened job store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn output_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(OUTPUT_DIR)
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(RECORD_FILE)
    }

    pub fn exists(&self, id: &JobId) -> bool {
        self.job_dir(id).is_dir()
    }

    /// Ensure the job directory exists. Succeeds if it already does.
    pub fn create_job_dir(&self, id: &JobId) -> Result<PathBuf, StoreError> {
        let dir = self.job_dir(id);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    pub fn create_output_dir(&self, id: &JobId) -> Result<PathBuf, StoreError> {
        let dir = self.output_dir(id);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    /// Replace the job's record.
    ///
    /// Writes a uniquely named sibling temp file and renames it over the
    /// record, so readers see either the old or the new record in full.
    pub fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.job_id);
        let json = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Json {
            path: path.clone(),
            source: e,
        })?;

        let temp_path = self
            .job_dir(&record.job_id)
            .join(format!(".{}.{}.tmp", RECORD_FILE, uuid::Uuid::new_v4()));
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io(&path, e));
        }

        tracing::debug!(job_id = %record.job_id, status = %record.status, "Saved job record");
        Ok(())
    }

    /// Load the job's record. `None` when the job or its record does not exist.
    pub fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Json { path, source: e })
    }

    /// All readable records, newest first.
    ///
    /// Directories that do not follow the job naming convention are ignored.
    /// Records that fail to load are skipped with a warning.
    pub fn list_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read jobs directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(JobId::parse) else {
                continue;
            };

            match self.get(&id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to load job record"),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Close out records left `running` by a previous server process.
    ///
    /// The process that owned them is gone, so their outcome is unknown. They
    /// are moved to `error` and never re-run. Returns how many were updated.
    pub fn reconcile_stale(&self) -> Result<usize, StoreError> {
        let mut reconciled = 0;
        for mut record in self.list_all()? {
            if record.is_terminal() {
                continue;
            }
            if record.set_error(STALE_RUNNING_DETAIL).is_err() {
                continue;
            }
            self.put(&record)?;
            tracing::warn!(job_id = %record.job_id, "Marked stale running job as error");
            reconciled += 1;
        }
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::request::PredictionRequest;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs")).unwrap();
        (dir, store)
    }

    fn record_for(store: &JobStore, id: &str, created_at: &str) -> JobRecord {
        let id = JobId::parse(id).unwrap();
        let request: PredictionRequest = serde_json::from_value(json!({
            "sequences": [{"entity_type": "protein", "id": "A", "sequence": "MVTPEG"}]
        }))
        .unwrap();
        let dir = store.job_dir(&id);
        let mut record = JobRecord::running(
            id.clone(),
            &request,
            &dir,
            &dir.join("boltz_input.yaml"),
            &store.output_dir(&id),
            "boltz predict boltz_input.yaml".to_string(),
        );
        record.created_at = created_at.to_string();
        record
    }

    #[test]
    fn open_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("jobs");
        JobStore::open(&root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn create_job_dir_is_idempotent() {
        let (_tmp, store) = store();
        let id = JobId::generate();
        let first = store.create_job_dir(&id).unwrap();
        let second = store.create_job_dir(&id).unwrap();
        assert_eq!(first, second);
        assert!(store.exists(&id));
    }

    #[test]
    fn create_job_dir_propagates_io_errors() {
        let (_tmp, store) = store();
        let id = JobId::generate();
        // A regular file where the job directory should go.
        fs::write(store.job_dir(&id), b"not a directory").unwrap();
        assert!(matches!(store.create_job_dir(&id), Err(StoreError::Io { .. })));
    }

    #[test]
    fn get_missing_is_none() {
        let (_tmp, store) = store();
        let id = JobId::generate();
        assert!(store.get(&id).unwrap().is_none());

        store.create_job_dir(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn put_then_get_overwrites() {
        let (_tmp, store) = store();
        let mut record = record_for(&store, "job_20250101_000000_aaaaaaaa", "2025-01-01T00:00:00.000000Z");
        store.create_job_dir(&record.job_id).unwrap();
        store.put(&record).unwrap();
        assert_eq!(store.get(&record.job_id).unwrap().unwrap().status, JobStatus::Running);

        record.complete("done".into(), String::new()).unwrap();
        store.put(&record).unwrap();
        let loaded = store.get(&record.job_id).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn put_leaves_no_temp_files() {
        let (_tmp, store) = store();
        let record = record_for(&store, "job_20250101_000000_aaaaaaaa", "2025-01-01T00:00:00.000000Z");
        store.create_job_dir(&record.job_id).unwrap();
        store.put(&record).unwrap();
        store.put(&record).unwrap();

        let names: Vec<_> = fs::read_dir(store.job_dir(&record.job_id))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![RECORD_FILE.to_string()]);
    }

    #[test]
    fn concurrent_reader_never_sees_partial_record() {
        let (_tmp, store) = store();
        let small = record_for(&store, "job_20250101_000000_aaaaaaaa", "2025-01-01T00:00:00.000000Z");
        let mut large = small.clone();
        large.complete("x".repeat(256 * 1024), String::new()).unwrap();
        store.create_job_dir(&small.job_id).unwrap();
        store.put(&small).unwrap();

        let done = std::sync::atomic::AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200 {
                    let record = if i % 2 == 0 { &large } else { &small };
                    store.put(record).unwrap();
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            });

            let mut reads = 0;
            while !done.load(std::sync::atomic::Ordering::SeqCst) || reads == 0 {
                let loaded = store.get(&small.job_id).unwrap().unwrap();
                assert!(loaded == small || loaded == large);
                reads += 1;
            }
        });
    }

    #[test]
    fn put_without_job_dir_fails() {
        let (_tmp, store) = store();
        let record = record_for(&store, "job_20250101_000000_aaaaaaaa", "2025-01-01T00:00:00.000000Z");
        assert!(store.put(&record).is_err());
    }

    #[test]
    fn list_all_sorts_newest_first_and_skips_bad_entries() {
        let (_tmp, store) = store();
        for (id, at) in [
            ("job_20250101_000000_aaaaaaaa", "2025-01-01T00:00:00.000000Z"),
            ("job_20250301_000000_cccccccc", "2025-03-01T00:00:00.000000Z"),
            ("job_20250201_000000_bbbbbbbb", "2025-02-01T00:00:00.000000Z"),
        ] {
            let record = record_for(&store, id, at);
            store.create_job_dir(&record.job_id).unwrap();
            store.put(&record).unwrap();
        }

        // Corrupt record, directory without record, foreign directory.
        let corrupt = store.root().join("job_20250401_000000_dddddddd");
        fs::create_dir_all(&corrupt).unwrap();
        fs::write(corrupt.join(RECORD_FILE), b"{ not json").unwrap();
        fs::create_dir_all(store.root().join("job_20250501_000000_eeeeeeee")).unwrap();
        fs::create_dir_all(store.root().join("scratch")).unwrap();
        fs::write(store.root().join("scratch").join(RECORD_FILE), b"{}").unwrap();

        let ids: Vec<_> = store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|r| r.job_id.to_string())
            .collect();
        assert_eq!(
            ids,
            vec![
                "job_20250301_000000_cccccccc",
                "job_20250201_000000_bbbbbbbb",
                "job_20250101_000000_aaaaaaaa",
            ]
        );
    }

    #[test]
    fn reconcile_stale_moves_running_to_error() {
        let (_tmp, store) = store();
        let running = record_for(&store, "job_20250101_000000_aaaaaaaa", "2025-01-01T00:00:00.000000Z");
        let mut done = record_for(&store, "job_20250102_000000_bbbbbbbb", "2025-01-02T00:00:00.000000Z");
        done.complete(String::new(), String::new()).unwrap();
        for record in [&running, &done] {
            store.create_job_dir(&record.job_id).unwrap();
            store.put(record).unwrap();
        }

        assert_eq!(store.reconcile_stale().unwrap(), 1);

        let stale = store.get(&running.job_id).unwrap().unwrap();
        assert_eq!(stale.status, JobStatus::Error);
        assert!(stale.error.unwrap().contains("restarted"));
        assert!(stale.completed_at.is_some());
        assert_eq!(store.get(&done.job_id).unwrap().unwrap(), done);

        assert_eq!(store.reconcile_stale().unwrap(), 0);
    }
}
