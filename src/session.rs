//! Request-scoped tutoring session state and the per-turn pipeline:
//! generate a reply, decide what the student sees, record the day, and log
//! the full reply for audit.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Group;
use crate::sectioner;
use crate::store::{StoreError, StudentStore};
use crate::tracker::InteractionTracker;
use crate::transcript::{TranscriptEntry, TranscriptLog};

#[derive(Debug, Error)]
#[error("text generation failed: {message}")]
pub struct GenerateError {
    pub message: String,
}

impl GenerateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The language model behind the tutor, seen as an opaque prompt-to-text call.
#[allow(async_fn_in_trait)]
pub trait TextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Tutor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub student_view: String,
    pub audit_view: String,
}

/// Conversation state for one student, owned by the request handler.
/// History only ever holds what the student was shown.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub student_id: String,
    pub group: Group,
    pub history: Vec<ChatMessage>,
}

impl SessionState {
    pub fn new(student_id: impl Into<String>, group: Group) -> Self {
        Self {
            student_id: student_id.into(),
            group,
            history: Vec::new(),
        }
    }

    pub fn build_prompt(&self, message: &str) -> String {
        let mut prompt = String::new();
        for entry in &self.history {
            let speaker = match entry.role {
                Role::Student => "Student",
                Role::Tutor => "Tutor",
            };
            prompt.push_str(speaker);
            prompt.push_str(": ");
            prompt.push_str(&entry.content);
            prompt.push('\n');
        }
        prompt.push_str("Student: ");
        prompt.push_str(message);
        prompt
    }

    /// Runs one exchange. Customized-tutor replies are sectioned so internal
    /// observations stay out of the chat; plain-chat replies pass through.
    /// History is left untouched; see [`SessionState::push_turn`].
    pub async fn exchange<G: TextGenerator>(
        &self,
        generator: &G,
        message: &str,
    ) -> Result<TurnOutcome, GenerateError> {
        let prompt = self.build_prompt(message);
        let reply = generator.generate(&prompt).await?;

        let student_view = match self.group {
            Group::Group1 => sectioner::parse(&reply).student_view(),
            Group::Group2 => reply.clone(),
        };

        Ok(TurnOutcome {
            student_view,
            audit_view: reply,
        })
    }

    /// Appends a delivered turn to the history.
    pub fn push_turn(&mut self, message: &str, outcome: &TurnOutcome) {
        self.history.push(ChatMessage {
            role: Role::Student,
            content: message.to_string(),
        });
        self.history.push(ChatMessage {
            role: Role::Tutor,
            content: outcome.student_view.clone(),
        });
    }
}

/// One full tutoring turn. The interaction day is only recorded once a
/// reply has been produced, and the history only grows once the day and
/// transcript are persisted.
pub async fn run_turn<G, S>(
    session: &mut SessionState,
    generator: &G,
    tracker: &InteractionTracker<S>,
    transcript: Option<&TranscriptLog>,
    message: &str,
    date: NaiveDate,
) -> Result<TurnOutcome, TurnError>
where
    G: TextGenerator,
    S: StudentStore,
{
    let outcome = session.exchange(generator, message).await?;

    if !tracker.record_interaction(&session.student_id, date).await? {
        tracing::warn!(
            student_id = %session.student_id,
            "turn completed for a student without a progress record"
        );
    }

    if let Some(log) = transcript {
        log.append(&TranscriptEntry::new(
            session.student_id.clone(),
            session.group,
            outcome.student_view.clone(),
            outcome.audit_view.clone(),
        ))
        .await?;
    }

    session.push_turn(message, &outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::store::MemoryStore;

    struct ScriptedGenerator {
        replies: Mutex<Vec<Result<String, GenerateError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String, GenerateError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GenerateError::new("script exhausted")))
        }
    }

    const REACT_REPLY: &str =
        "**THOUGHT:** they need the ratio\n**OBSERVATION:** student seems unsure\n**ACTION:** What is opposite over hypotenuse?";

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[tokio::test]
    async fn customized_tutor_hides_observations() {
        let generator = ScriptedGenerator::new(vec![Ok(REACT_REPLY.to_string())]);
        let mut session = SessionState::new("S1", Group::Group1);

        let outcome = session.exchange(&generator, "what is sine?").await.unwrap();
        assert_eq!(
            outcome.student_view,
            "**THOUGHT:** they need the ratio\n**ACTION:** What is opposite over hypotenuse?"
        );
        assert_eq!(outcome.audit_view, REACT_REPLY);
        assert!(session.history.is_empty());

        session.push_turn("what is sine?", &outcome);
        assert_eq!(session.history.len(), 2);
        assert!(!session.history[1].content.contains("unsure"));
    }

    #[tokio::test]
    async fn plain_chat_reply_is_shown_as_is() {
        let generator = ScriptedGenerator::new(vec![Ok(REACT_REPLY.to_string())]);
        let session = SessionState::new("S2", Group::Group2);
        let outcome = session.exchange(&generator, "what is sine?").await.unwrap();
        assert_eq!(outcome.student_view, REACT_REPLY);
    }

    #[tokio::test]
    async fn prompt_carries_visible_history() {
        let generator = ScriptedGenerator::new(vec![
            Ok(REACT_REPLY.to_string()),
            Ok("ACTION: good".to_string()),
        ]);
        let tracker = InteractionTracker::new(MemoryStore::new());
        tracker.init_student("S1", Group::Group1).await.unwrap();
        let mut session = SessionState::new("S1", Group::Group1);
        run_turn(&mut session, &generator, &tracker, None, "what is sine?", date(1))
            .await
            .unwrap();
        run_turn(&mut session, &generator, &tracker, None, "opposite/hyp", date(1))
            .await
            .unwrap();

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0], "Student: what is sine?");
        assert!(prompts[1].starts_with("Student: what is sine?\nTutor: **THOUGHT:**"));
        assert!(prompts[1].ends_with("Student: opposite/hyp"));
        assert!(!prompts[1].contains("unsure"));
    }

    #[tokio::test]
    async fn run_turn_records_day_and_logs_audit() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path().join("tutor_transcripts.csv"));
        let tracker = InteractionTracker::new(MemoryStore::new());
        tracker.init_student("S1", Group::Group1).await.unwrap();

        let generator = ScriptedGenerator::new(vec![
            Ok(REACT_REPLY.to_string()),
            Ok(REACT_REPLY.to_string()),
        ]);
        let mut session = SessionState::new("S1", Group::Group1);
        run_turn(&mut session, &generator, &tracker, Some(&log), "hi", date(1))
            .await
            .unwrap();
        run_turn(&mut session, &generator, &tracker, Some(&log), "again", date(1))
            .await
            .unwrap();

        let record = tracker.get("S1").await.unwrap().unwrap();
        assert_eq!(record.days_interacted(), 1);

        let entries = log.entries().unwrap();
        assert_eq!(session.history.len(), 4);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].audit_view, REACT_REPLY);
        assert!(!entries[0].student_view.contains("unsure"));
    }

    #[tokio::test]
    async fn failed_generation_records_nothing() {
        let tracker = InteractionTracker::new(MemoryStore::new());
        tracker.init_student("S1", Group::Group1).await.unwrap();
        let generator = ScriptedGenerator::new(vec![Err(GenerateError::new("rate limited"))]);
        let mut session = SessionState::new("S1", Group::Group1);

        let result = run_turn(&mut session, &generator, &tracker, None, "hi", date(2)).await;
        assert!(matches!(result, Err(TurnError::Generate(_))));
        assert!(session.history.is_empty());
        assert_eq!(tracker.get("S1").await.unwrap().unwrap().days_interacted(), 0);
    }

    #[tokio::test]
    async fn failed_save_keeps_reply_out_of_history() {
        let tracker = InteractionTracker::new(MemoryStore::new());
        tracker.init_student("S1", Group::Group1).await.unwrap();
        tracker.store().set_fail_saves(true);
        let generator = ScriptedGenerator::new(vec![
            Ok("ACTION: secret-unseen-reply".to_string()),
            Ok("ACTION: fine".to_string()),
        ]);
        let mut session = SessionState::new("S1", Group::Group1);

        let result = run_turn(&mut session, &generator, &tracker, None, "hi", date(3)).await;
        assert!(matches!(result, Err(TurnError::Store(_))));
        assert!(session.history.is_empty());
        assert_eq!(session.build_prompt("next"), "Student: next");

        tracker.store().set_fail_saves(false);
        run_turn(&mut session, &generator, &tracker, None, "next", date(3))
            .await
            .unwrap();
        let prompts = generator.prompts.lock().unwrap();
        assert!(!prompts[1].contains("secret-unseen-reply"));
        assert_eq!(session.history.len(), 2);
    }

    #[tokio::test]
    async fn failed_transcript_keeps_reply_out_of_history() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("tutor_transcripts.csv");
        std::fs::create_dir(&blocked).unwrap();
        let log = TranscriptLog::new(&blocked);
        let tracker = InteractionTracker::new(MemoryStore::new());
        tracker.init_student("S1", Group::Group1).await.unwrap();
        let generator = ScriptedGenerator::new(vec![Ok(REACT_REPLY.to_string())]);
        let mut session = SessionState::new("S1", Group::Group1);

        let result = run_turn(&mut session, &generator, &tracker, Some(&log), "hi", date(4)).await;
        assert!(matches!(result, Err(TurnError::Store(_))));
        assert!(session.history.is_empty());
    }
}
