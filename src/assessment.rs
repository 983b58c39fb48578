//! Raw assessment answers, one row per submission in `assessments.csv`.

use std::path::Path;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::models::{local_timestamp, AssessmentKind, Group};
use crate::store::{append_csv_row, StoreError};

/// Answers kept per submission; later answers are dropped.
pub const ANSWER_SLOTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub student_id: String,
    pub group: Group,
    pub assessment_type: AssessmentKind,
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub q1_answer: String,
    #[serde(default)]
    pub q2_answer: String,
    #[serde(default)]
    pub q3_answer: String,
    #[serde(default)]
    pub q4_answer: String,
    #[serde(default)]
    pub q5_answer: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default = "first_attempt")]
    pub attempts: u32,
}

fn first_attempt() -> u32 {
    1
}

impl AssessmentRecord {
    pub fn new(
        student_id: impl Into<String>,
        group: Group,
        assessment_type: AssessmentKind,
        answers: &[String],
        score: f64,
    ) -> Self {
        let slot = |i: usize| answers.get(i).cloned().unwrap_or_default();
        Self {
            student_id: student_id.into(),
            group,
            assessment_type,
            timestamp: Local::now().naive_local(),
            q1_answer: slot(0),
            q2_answer: slot(1),
            q3_answer: slot(2),
            q4_answer: slot(3),
            q5_answer: slot(4),
            score,
            attempts: first_attempt(),
        }
    }

    pub fn answers(&self) -> [&str; ANSWER_SLOTS] {
        [
            self.q1_answer.as_str(),
            self.q2_answer.as_str(),
            self.q3_answer.as_str(),
            self.q4_answer.as_str(),
            self.q5_answer.as_str(),
        ]
    }
}

pub fn save_assessment(path: &Path, record: &AssessmentRecord) -> Result<(), StoreError> {
    if record.score < 0.0 || !record.score.is_finite() {
        return Err(StoreError::Corrupt(format!(
            "assessment score must be a non-negative number, got {}",
            record.score
        )));
    }
    append_csv_row(path, record)?;
    tracing::info!(
        student_id = %record.student_id,
        kind = %record.assessment_type,
        "saved assessment answers"
    );
    Ok(())
}

/// Every submission for `student_id`, oldest first. A missing file means no
/// submissions yet.
pub fn student_assessments(path: &Path, student_id: &str) -> Result<Vec<AssessmentRecord>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize::<AssessmentRecord>() {
        let record = result?;
        if record.student_id == student_id {
            records.push(record);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn answers_fill_five_slots() {
        let short = AssessmentRecord::new("S1", Group::Group1, AssessmentKind::Pre, &answers(&["a", "b"]), 0.0);
        assert_eq!(short.answers(), ["a", "b", "", "", ""]);
        assert_eq!(short.attempts, 1);

        let long = answers(&["1", "2", "3", "4", "5", "6"]);
        let record = AssessmentRecord::new("S1", Group::Group1, AssessmentKind::Final, &long, 80.0);
        assert_eq!(record.answers(), ["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn filters_submissions_by_student() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessments.csv");
        assert!(student_assessments(&path, "S1").unwrap().is_empty());

        let pre = AssessmentRecord::new("S1", Group::Group1, AssessmentKind::Pre, &answers(&["sin = o/h"]), 20.0);
        let other = AssessmentRecord::new("S2", Group::Group2, AssessmentKind::Pre, &answers(&["x"]), 0.0);
        let fin = AssessmentRecord::new("S1", Group::Group1, AssessmentKind::Final, &answers(&["1/2, \"half\""]), 60.0);
        for record in [&pre, &other, &fin] {
            save_assessment(&path, record).unwrap();
        }

        assert_eq!(student_assessments(&path, "S1").unwrap(), vec![pre, fin]);
        assert!(student_assessments(&path, "S3").unwrap().is_empty());
    }

    #[test]
    fn reads_rows_written_by_the_web_app() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessments.csv");
        std::fs::write(
            &path,
            "student_id,group,assessment_type,timestamp,q1_answer,q2_answer,q3_answer,q4_answer,q5_answer,score,attempts\n\
             S1,1,pre,2024-03-05T14:30:15.123456,0.5,,sqrt(3)/2,,,0,1\n",
        )
        .unwrap();

        let records = student_assessments(&path, "S1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].answers(), ["0.5", "", "sqrt(3)/2", "", ""]);
        assert_eq!(records[0].assessment_type, AssessmentKind::Pre);
        assert_eq!(records[0].score, 0.0);
    }

    #[test]
    fn negative_score_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessments.csv");
        let record = AssessmentRecord::new("S1", Group::Group1, AssessmentKind::Pre, &[], -1.0);
        assert!(matches!(save_assessment(&path, &record), Err(StoreError::Corrupt(_))));
        assert!(!path.exists());
    }
}
