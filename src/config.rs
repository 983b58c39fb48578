use std::path::PathBuf;

use anyhow::Context;

pub const DATA_DIR_ENV: &str = "TUTOR_STUDY_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "data";

/// Where the study keeps its files and, optionally, its database.
#[derive(Debug, Clone)]
pub struct StudyConfig {
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
}

impl StudyConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var(DATA_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Self {
            data_dir,
            database_url,
        }
    }

    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        self
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to use the postgres backend")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.file("student_progress.json")
    }

    pub fn ratings_file(&self) -> PathBuf {
        self.file("performance_ratings.csv")
    }

    pub fn comparison_file(&self) -> PathBuf {
        self.file("comparison_results.csv")
    }

    pub fn assessments_file(&self) -> PathBuf {
        self.file("assessments.csv")
    }

    pub fn transcript_file(&self) -> PathBuf {
        self.file("tutor_transcripts.csv")
    }

    fn file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}
