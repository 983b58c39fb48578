//! Append-only CSV log of tutor replies: what the student saw next to what
//! the model actually produced.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Group;
use crate::store::{append_csv_row, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub student_id: String,
    pub group: Group,
    pub recorded_at: DateTime<Utc>,
    pub student_view: String,
    pub audit_view: String,
}

impl TranscriptEntry {
    pub fn new(
        student_id: impl Into<String>,
        group: Group,
        student_view: impl Into<String>,
        audit_view: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student_id.into(),
            group,
            recorded_at: Utc::now(),
            student_view: student_view.into(),
            audit_view: audit_view.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptLog {
    path: PathBuf,
}

impl TranscriptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry on the blocking pool so a slow disk does not stall
    /// the runtime.
    pub async fn append(&self, entry: &TranscriptEntry) -> Result<(), StoreError> {
        let path = self.path.clone();
        let row = entry.clone();
        tokio::task::spawn_blocking(move || append_csv_row(&path, &row))
            .await
            .map_err(|err| StoreError::Unavailable(format!("transcript writer failed: {err}")))??;
        tracing::debug!(student_id = %entry.student_id, id = %entry.id, "logged tutor reply");
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<TranscriptEntry>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut entries = Vec::new();
        for result in reader.deserialize::<TranscriptEntry>() {
            entries.push(result?);
        }
        Ok(entries)
    }
}
