use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;

use serde::Serialize;

use crate::models::{Group, GroupComparison, StudentInteractionRecord, StudentTable};
use crate::store::StoreError;
use crate::transcript::TranscriptEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupProgress {
    pub students: usize,
    pub gates_unlocked: usize,
    pub pretests_completed: usize,
    pub finals_completed: usize,
}

pub fn summarize_group(table: &StudentTable, group: Group) -> GroupProgress {
    table
        .records()
        .filter(|record| record.group == group)
        .fold(GroupProgress::default(), |mut summary, record| {
            summary.students += 1;
            summary.gates_unlocked += usize::from(record.final_gate_enabled);
            summary.pretests_completed += usize::from(record.pre_test_completed);
            summary.finals_completed += usize::from(record.final_test_completed);
            summary
        })
}

/// Records ordered by days interacted, most engaged first.
pub fn rank_by_engagement(table: &StudentTable) -> Vec<&StudentInteractionRecord> {
    let mut records: Vec<&StudentInteractionRecord> = table.records().collect();
    records.sort_by(|a, b| {
        b.days_interacted()
            .cmp(&a.days_interacted())
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    records
}

pub fn build_report(
    table: &StudentTable,
    comparison: &GroupComparison,
    transcripts: &[TranscriptEntry],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Trigonometry Tutor Study Report");
    let _ = writeln!(output, "Generated at {}", comparison.timestamp.format("%Y-%m-%d %H:%M"));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Study Overview");

    if table.is_empty() {
        let _ = writeln!(output, "No students enrolled yet.");
    } else {
        for group in [Group::Group1, Group::Group2] {
            let summary = summarize_group(table, group);
            let _ = writeln!(
                output,
                "- {}: {} students, {} final gates unlocked, {} pre-tests and {} finals completed",
                group.label(),
                summary.students,
                summary.gates_unlocked,
                summary.pretests_completed,
                summary.finals_completed
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Student Progress");

    if table.is_empty() {
        let _ = writeln!(output, "No interaction history recorded.");
    } else {
        for record in rank_by_engagement(table) {
            let last = record
                .last_interaction()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "never".to_string());
            let gate = if record.final_gate_enabled { "unlocked" } else { "locked" };
            let override_note = if record.admin_override { " (admin override)" } else { "" };
            let _ = writeln!(
                output,
                "- {} (group {}): {} days, last {}, final gate {}{}",
                record.student_id,
                record.group,
                record.days_interacted(),
                last,
                gate,
                override_note
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Assessment Comparison");
    let _ = writeln!(
        output,
        "- Group 1: pre {:.1}%, final {:.1}%, improvement {:+.1}%",
        comparison.group1_avg_pre, comparison.group1_avg_final, comparison.improvement_group1
    );
    let _ = writeln!(
        output,
        "- Group 2: pre {:.1}%, final {:.1}%, improvement {:+.1}%",
        comparison.group2_avg_pre, comparison.group2_avg_final, comparison.improvement_group2
    );
    let _ = writeln!(output, "- Winner: {}", comparison.winner);

    let mut turns: HashMap<&str, usize> = HashMap::new();
    for entry in transcripts {
        *turns.entry(entry.student_id.as_str()).or_insert(0) += 1;
    }
    let mut turns: Vec<(&str, usize)> = turns.into_iter().collect();
    turns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Tutor Turns Logged");

    if turns.is_empty() {
        let _ = writeln!(output, "No tutor turns logged.");
    } else {
        for (student_id, count) in turns {
            let _ = writeln!(output, "- {}: {} turns", student_id, count);
        }
    }

    output
}

#[derive(Debug, Serialize)]
struct ProgressRow<'a> {
    student_id: &'a str,
    group: Group,
    days_interacted: usize,
    interaction_dates: String,
    final_test_enabled: bool,
    admin_override: bool,
    pre_test_completed: bool,
    final_test_completed: bool,
}

/// Flat CSV export of the progress table for spreadsheet users.
pub fn write_progress_csv(table: &StudentTable, path: &Path) -> Result<usize, StoreError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut written = 0usize;

    for record in table.records() {
        let dates: Vec<String> = record.interaction_dates.iter().map(|d| d.to_string()).collect();
        writer.serialize(ProgressRow {
            student_id: &record.student_id,
            group: record.group,
            days_interacted: record.days_interacted(),
            interaction_dates: dates.join(";"),
            final_test_enabled: record.final_gate_enabled,
            admin_override: record.admin_override,
            pre_test_completed: record.pre_test_completed,
            final_test_completed: record.final_test_completed,
        })?;
        written += 1;
    }

    writer.flush().map_err(|err| StoreError::io(path, err))?;
    Ok(written)
}
