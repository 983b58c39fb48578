use std::path::Path;

use chrono::Local;

use crate::models::{AssessmentKind, Group, GroupComparison, PerformanceRating, Winner};
use crate::store::{append_csv_row, StoreError};

pub fn compare_groups(ratings: &[PerformanceRating]) -> GroupComparison {
    let g1_pre = mean_score(ratings, Group::Group1, AssessmentKind::Pre);
    let g2_pre = mean_score(ratings, Group::Group2, AssessmentKind::Pre);
    let g1_final = mean_score(ratings, Group::Group1, AssessmentKind::Final);
    let g2_final = mean_score(ratings, Group::Group2, AssessmentKind::Final);

    let g1_improvement = g1_final - g1_pre;
    let g2_improvement = g2_final - g2_pre;

    let winner = if g1_improvement > g2_improvement {
        Winner::Group1
    } else if g2_improvement > g1_improvement {
        Winner::Group2
    } else {
        Winner::Tie
    };

    GroupComparison {
        group1_avg_pre: round2(g1_pre),
        group2_avg_pre: round2(g2_pre),
        group1_avg_final: round2(g1_final),
        group2_avg_final: round2(g2_final),
        improvement_group1: round2(g1_improvement),
        improvement_group2: round2(g2_improvement),
        winner,
        analysis: format!(
            "Group 1 improved by {g1_improvement:.2}%, Group 2 improved by {g2_improvement:.2}%"
        ),
        timestamp: Local::now().naive_local(),
    }
}

/// Mean score for one group and assessment; zero when there are no rows.
pub fn mean_score(ratings: &[PerformanceRating], group: Group, kind: AssessmentKind) -> f64 {
    let scores: Vec<f64> = ratings
        .iter()
        .filter(|r| r.group == group && r.assessment_type == kind)
        .map(|r| r.score_percentage)
        .collect();

    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn load_ratings(path: &Path) -> Result<Vec<PerformanceRating>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut ratings = Vec::new();
    for result in reader.deserialize::<PerformanceRating>() {
        ratings.push(result?);
    }
    Ok(ratings)
}

pub fn append_rating(path: &Path, rating: &PerformanceRating) -> Result<(), StoreError> {
    append_csv_row(path, rating)
}

pub fn append_comparison(path: &Path, comparison: &GroupComparison) -> Result<(), StoreError> {
    append_csv_row(path, comparison)
}
