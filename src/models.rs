use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of distinct interaction days that unlocks the final assessment.
pub const FINAL_GATE_DAY_THRESHOLD: usize = 3;

/// Study arm a student was assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    /// Socratic customized tutor.
    #[serde(rename = "1", alias = "Group1", alias = "group1")]
    Group1,
    /// Plain ChatGPT-style interface.
    #[serde(rename = "2", alias = "Group2", alias = "group2")]
    Group2,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Group1 => "1",
            Group::Group2 => "2",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Group::Group1 => "Group 1 (Customized Tutor)",
            Group::Group2 => "Group 2 (ChatGPT Interface)",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Group {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "group1" => Ok(Group::Group1),
            "2" | "group2" => Ok(Group::Group2),
            other => Err(format!("unknown group '{other}', expected 1 or 2")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentInteractionRecord {
    pub student_id: String,
    pub group: Group,
    pub interaction_dates: BTreeSet<NaiveDate>,
    pub final_gate_enabled: bool,
    pub admin_override: bool,
    pub pre_test_completed: bool,
    pub final_test_completed: bool,
}

impl StudentInteractionRecord {
    pub fn new(student_id: impl Into<String>, group: Group) -> Self {
        Self {
            student_id: student_id.into(),
            group,
            interaction_dates: BTreeSet::new(),
            final_gate_enabled: false,
            admin_override: false,
            pre_test_completed: false,
            final_test_completed: false,
        }
    }

    /// Distinct calendar days with at least one tutoring exchange.
    pub fn days_interacted(&self) -> usize {
        self.interaction_dates.len()
    }

    pub fn last_interaction(&self) -> Option<NaiveDate> {
        self.interaction_dates.iter().next_back().copied()
    }

    fn from_wire(student_id: String, wire: RecordWire) -> Self {
        Self {
            student_id,
            group: wire.group,
            interaction_dates: wire.interaction_dates.into_iter().collect(),
            final_gate_enabled: wire.final_test_enabled,
            admin_override: wire.admin_override,
            pre_test_completed: wire.pre_test_completed,
            final_test_completed: wire.final_test_completed,
        }
    }

    fn to_wire(&self) -> RecordWire {
        RecordWire {
            group: self.group,
            pre_test_completed: self.pre_test_completed,
            interaction_dates: self.interaction_dates.iter().copied().collect(),
            days_interacted: self.days_interacted(),
            final_test_enabled: self.final_gate_enabled,
            final_test_completed: self.final_test_completed,
            admin_override: self.admin_override,
        }
    }
}

/// Persisted shape of one student record. `days_interacted` is written for
/// readers of the raw file but ignored on load.
#[derive(Debug, Serialize, Deserialize)]
struct RecordWire {
    group: Group,
    #[serde(default)]
    pre_test_completed: bool,
    #[serde(default)]
    interaction_dates: Vec<NaiveDate>,
    #[serde(default, skip_deserializing)]
    days_interacted: usize,
    #[serde(default)]
    final_test_enabled: bool,
    #[serde(default)]
    final_test_completed: bool,
    #[serde(default)]
    admin_override: bool,
}

/// Every student record, keyed by student id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentTable {
    records: BTreeMap<String, StudentInteractionRecord>,
}

impl StudentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, student_id: &str) -> bool {
        self.records.contains_key(student_id)
    }

    pub fn get(&self, student_id: &str) -> Option<&StudentInteractionRecord> {
        self.records.get(student_id)
    }

    pub fn get_mut(&mut self, student_id: &str) -> Option<&mut StudentInteractionRecord> {
        self.records.get_mut(student_id)
    }

    /// Inserts a record under its own student id, replacing any previous one.
    pub fn insert(&mut self, record: StudentInteractionRecord) {
        self.records.insert(record.student_id.clone(), record);
    }

    pub fn records(&self) -> impl Iterator<Item = &StudentInteractionRecord> {
        self.records.values()
    }
}

impl FromIterator<StudentInteractionRecord> for StudentTable {
    fn from_iter<I: IntoIterator<Item = StudentInteractionRecord>>(iter: I) -> Self {
        let mut table = StudentTable::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}

impl Serialize for StudentTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire: BTreeMap<&str, RecordWire> = self
            .records
            .iter()
            .map(|(id, record)| (id.as_str(), record.to_wire()))
            .collect();
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StudentTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = BTreeMap::<String, RecordWire>::deserialize(deserializer)?;
        Ok(wire
            .into_iter()
            .map(|(id, record)| StudentInteractionRecord::from_wire(id, record))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentKind {
    Pre,
    Final,
}

impl fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssessmentKind::Pre => f.write_str("pre"),
            AssessmentKind::Final => f.write_str("final"),
        }
    }
}

/// One graded assessment, as stored in `performance_ratings.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRating {
    pub student_id: String,
    pub group: Group,
    pub assessment_type: AssessmentKind,
    pub score_percentage: f64,
    pub correct_answers: u32,
    #[serde(default, with = "pipe_list")]
    pub weak_areas: Vec<String>,
    #[serde(default, with = "pipe_list")]
    pub strong_areas: Vec<String>,
    pub difficulty_level: String,
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    #[serde(rename = "Group 1 (Customized Tutor)")]
    Group1,
    #[serde(rename = "Group 2 (ChatGPT Interface)")]
    Group2,
    Tie,
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Winner::Group1 => f.write_str(Group::Group1.label()),
            Winner::Group2 => f.write_str(Group::Group2.label()),
            Winner::Tie => f.write_str("Tie"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupComparison {
    pub group1_avg_pre: f64,
    pub group2_avg_pre: f64,
    pub group1_avg_final: f64,
    pub group2_avg_final: f64,
    pub improvement_group1: f64,
    pub improvement_group2: f64,
    pub winner: Winner,
    pub analysis: String,
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
}

/// Area lists stored as one `|`-joined CSV field.
pub(crate) mod pipe_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(areas: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&areas.join("|"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let joined = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(joined
            .split('|')
            .map(str::trim)
            .filter(|area| !area.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Local wall-clock timestamps written as `YYYY-MM-DDTHH:MM:SS[.ffffff]`.
/// Reading also accepts a space separator and RFC 3339 values with an
/// offset, which keep their own wall-clock time.
pub(crate) mod local_timestamp {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(raw.trim()).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
    }
}
