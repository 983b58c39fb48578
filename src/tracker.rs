//! Per-student interaction days and the final assessment gate.
//!
//! Missing students are reported through `Ok(false)`; only persistence
//! failures surface as errors.

use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::models::{Group, StudentInteractionRecord, StudentTable, FINAL_GATE_DAY_THRESHOLD};
use crate::store::{StoreError, StudentStore};

pub struct InteractionTracker<S> {
    store: S,
    // Serializes load-modify-save cycles between tasks sharing this tracker.
    write_lock: Mutex<()>,
}

impl<S: StudentStore> InteractionTracker<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn get(&self, student_id: &str) -> Result<Option<StudentInteractionRecord>, StoreError> {
        Ok(self.store.load().await?.get(student_id).cloned())
    }

    pub async fn all(&self) -> Result<StudentTable, StoreError> {
        self.store.load().await
    }

    /// Creates an empty record for a new student. Existing history is never
    /// overwritten.
    pub async fn init_student(&self, student_id: &str, group: Group) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.store.load().await?;
        if table.contains(student_id) {
            tracing::debug!(student_id, "student already initialised");
            return Ok(());
        }

        table.insert(StudentInteractionRecord::new(student_id, group));
        self.store.save(&table).await?;
        tracing::info!(student_id, %group, "initialised student");
        Ok(())
    }

    /// Adds `date` to the student's interaction days and unlocks the final
    /// gate once the distinct-day threshold is reached.
    pub async fn record_interaction(&self, student_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        self.update(student_id, |record| {
            record.interaction_dates.insert(date);
            if record.days_interacted() >= FINAL_GATE_DAY_THRESHOLD
                && !record.final_test_completed
                && !record.final_gate_enabled
            {
                record.final_gate_enabled = true;
                tracing::info!(
                    student_id = %record.student_id,
                    days = record.days_interacted(),
                    "final assessment unlocked"
                );
            }
        })
        .await
    }

    /// Sets the gate directly and marks the record as touched by an admin.
    pub async fn admin_set_gate(&self, student_id: &str, enabled: bool) -> Result<bool, StoreError> {
        self.update(student_id, |record| {
            record.final_gate_enabled = enabled;
            record.admin_override = true;
            tracing::info!(student_id = %record.student_id, enabled, "admin changed final gate");
        })
        .await
    }

    pub async fn complete_pretest(&self, student_id: &str) -> Result<bool, StoreError> {
        self.update(student_id, |record| {
            if !record.pre_test_completed {
                record.pre_test_completed = true;
                tracing::info!(student_id = %record.student_id, "pre-test completed");
            }
        })
        .await
    }

    pub async fn complete_final_test(&self, student_id: &str) -> Result<bool, StoreError> {
        self.update(student_id, |record| {
            if !record.final_test_completed {
                record.final_test_completed = true;
                tracing::info!(student_id = %record.student_id, "final test completed");
            }
        })
        .await
    }

    /// Replaces the whole persisted table with an empty one.
    pub async fn reset_all(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.store.save(&StudentTable::new()).await?;
        tracing::info!("student progress reset");
        Ok(())
    }

    async fn update<F>(&self, student_id: &str, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut StudentInteractionRecord),
    {
        let _guard = self.write_lock.lock().await;
        let mut table = self.store.load().await?;
        let Some(record) = table.get_mut(student_id) else {
            tracing::warn!(student_id, "no record for student");
            return Ok(false);
        };

        apply(record);
        self.store.save(&table).await?;
        Ok(true)
    }
}
