//! Persistence collaborators for the student progress table.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::models::StudentTable;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Loads and saves the whole student table. `load` returns an empty table
/// when nothing has been persisted yet; `save` replaces the table without
/// exposing partial writes.
#[allow(async_fn_in_trait)]
pub trait StudentStore {
    async fn load(&self) -> Result<StudentTable, StoreError>;
    async fn save(&self, table: &StudentTable) -> Result<(), StoreError>;
}

/// Table stored as a single JSON document, e.g. `data/student_progress.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "student_progress.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StudentStore for JsonFileStore {
    async fn load(&self) -> Result<StudentTable, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no progress file yet");
                return Ok(StudentTable::new());
            }
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };

        if contents.trim().is_empty() {
            return Ok(StudentTable::new());
        }

        let table: StudentTable = serde_json::from_str(&contents)?;
        tracing::debug!(path = %self.path.display(), students = table.len(), "loaded progress");
        Ok(table)
    }

    async fn save(&self, table: &StudentTable) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }

        let body = serde_json::to_string_pretty(table)?;
        let temp = self.temp_path();
        let written = match write_synced(&temp, body.as_bytes()).await {
            Ok(()) => tokio::fs::rename(&temp, &self.path)
                .await
                .map_err(|err| StoreError::io(&self.path, err)),
            Err(err) => Err(StoreError::io(&temp, err)),
        };
        if let Err(err) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                tracing::debug!(path = %temp.display(), error = %cleanup, "temp file not removed");
            }
            return Err(err);
        }

        tracing::debug!(path = %self.path.display(), students = table.len(), "saved progress");
        Ok(())
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body).await?;
    file.sync_all().await
}

/// In-process table. Loads and saves can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<StudentTable>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: StudentTable) -> Self {
        Self {
            table: Mutex::new(table),
            ..Self::default()
        }
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Copy of what is currently persisted.
    pub fn snapshot(&self) -> StudentTable {
        match self.table.lock() {
            Ok(table) => table.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StudentStore for MemoryStore {
    async fn load(&self) -> Result<StudentTable, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("load disabled".to_string()));
        }
        Ok(self.snapshot())
    }

    async fn save(&self, table: &StudentTable) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("save disabled".to_string()));
        }
        let mut guard = self
            .table
            .lock()
            .map_err(|_| StoreError::Unavailable("memory table poisoned".to_string()))?;
        *guard = table.clone();
        Ok(())
    }
}

/// Appends one serialized row, writing the header only into a new file.
pub(crate) fn append_csv_row<T: serde::Serialize>(path: &Path, row: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    }

    let is_new = std::fs::metadata(path)
        .map(|meta| meta.len() == 0)
        .unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| StoreError::io(path, err))?;

    let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
    writer.serialize(row)?;
    writer.flush().map_err(|err| StoreError::io(path, err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Group, StudentInteractionRecord};
    use chrono::NaiveDate;

    fn sample_table() -> StudentTable {
        let mut record = StudentInteractionRecord::new("S1", Group::Group1);
        record
            .interaction_dates
            .insert(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        record.pre_test_completed = true;
        [record, StudentInteractionRecord::new("S2", Group::Group2)]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("student_progress.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student_progress.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(JsonFileStore::new(path).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_store_round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("student_progress.json");
        let store = JsonFileStore::new(&path);

        let table = sample_table();
        store.save(&table).await.unwrap();

        assert_eq!(store.load().await.unwrap(), table);
        assert!(!path.with_file_name("student_progress.json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_replace_keeps_old_data_and_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student_progress.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();
        let store = JsonFileStore::new(&path);

        let err = store.save(&sample_table()).await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!dir.path().join("student_progress.json.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[tokio::test]
    async fn save_overwrites_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("student_progress.json"));
        store.save(&sample_table()).await.unwrap();
        store.save(&StudentTable::new()).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student_progress.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[tokio::test]
    async fn memory_store_failures_are_reported() {
        let store = MemoryStore::with_table(sample_table());
        store.set_fail_saves(true);
        assert!(store.save(&StudentTable::new()).await.is_err());
        assert_eq!(store.snapshot().len(), 2);

        store.set_fail_loads(true);
        assert!(matches!(store.load().await, Err(StoreError::Unavailable(_))));
    }
}
