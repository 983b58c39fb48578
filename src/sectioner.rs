//! Splits tutor replies into labeled sections so internal reasoning can be
//! kept for audit but hidden from the student.
//!
//! A section starts at a line whose first token (after whitespace, an
//! optional `1.` / `2)` / `-` / `+` list marker and emphasis markup) is
//! `THOUGHT`, `ACTION` or `OBSERVATION` followed by a colon. Label words used
//! as ordinary prose never start a section.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[ \t]*(?:(?:\d+[.)]|[-+])[ \t]+)?(?:[*_#>][ \t]*)*(thought|action|observation)[ \t]*(?:[*_]+[ \t]*)?:",
    )
    .expect("label pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionLabel {
    Thought,
    Action,
    Observation,
    /// Text before the first recognized label, or the whole reply when no
    /// label is present.
    Unlabeled,
}

impl SectionLabel {
    /// Whether the section may be shown to the student.
    pub fn is_student_visible(&self) -> bool {
        matches!(self, SectionLabel::Thought | SectionLabel::Action)
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "thought" => Some(SectionLabel::Thought),
            "action" => Some(SectionLabel::Action),
            "observation" => Some(SectionLabel::Observation),
            _ => None,
        }
    }
}

impl fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionLabel::Thought => "THOUGHT",
            SectionLabel::Action => "ACTION",
            SectionLabel::Observation => "OBSERVATION",
            SectionLabel::Unlabeled => "UNLABELED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub label: SectionLabel,
    /// Section text including its label line and line terminators.
    pub body: String,
}

/// One parsed tutor reply. Concatenating the section bodies in order yields
/// the raw reply byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorResponse {
    raw: String,
    sections: Vec<Section>,
    labeled: bool,
}

/// Returns the recognized label if `line` starts a section.
pub fn label_of_line(line: &str) -> Option<SectionLabel> {
    LABEL_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|token| SectionLabel::from_token(token.as_str()))
}

/// Parses a raw reply. Never fails: text without labels becomes one
/// unlabeled section.
pub fn parse(raw_text: &str) -> TutorResponse {
    let mut sections: Vec<Section> = Vec::new();
    let mut labeled = false;

    for line in raw_text.split_inclusive('\n') {
        match label_of_line(line) {
            Some(label) => {
                labeled = true;
                sections.push(Section {
                    label,
                    body: line.to_string(),
                });
            }
            None => match sections.last_mut() {
                Some(current) => current.body.push_str(line),
                None => sections.push(Section {
                    label: SectionLabel::Unlabeled,
                    body: line.to_string(),
                }),
            },
        }
    }

    if sections.is_empty() {
        sections.push(Section {
            label: SectionLabel::Unlabeled,
            body: String::new(),
        });
    }

    tracing::debug!(sections = sections.len(), labeled, "parsed tutor reply");

    TutorResponse {
        raw: raw_text.to_string(),
        sections,
        labeled,
    }
}

impl TutorResponse {
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Whether any section label was recognized.
    pub fn is_labeled(&self) -> bool {
        self.labeled
    }

    /// The reply exactly as generated.
    pub fn audit_view(&self) -> &str {
        &self.raw
    }

    /// THOUGHT and ACTION sections in source order with blank-line runs
    /// collapsed. Falls back to the raw text rather than ever returning
    /// nothing.
    pub fn student_view(&self) -> String {
        if !self.labeled {
            return self.raw.clone();
        }

        let visible: String = self
            .sections
            .iter()
            .filter(|section| section.label.is_student_visible())
            .map(|section| section.body.as_str())
            .collect();

        let view = collapse_blank_lines(&visible);
        if view.is_empty() {
            tracing::warn!("no student-visible sections in reply, showing raw text");
            return self.raw.clone();
        }
        view
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut previous_blank = false;

    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        lines.push(if blank { "" } else { line });
        previous_blank = blank;
    }

    lines.join("\n").trim().to_string()
}
