use std::num::NonZeroU32;

use serde::Deserialize;
use serde::Serialize;

use crate::StoreError;

const SAMPLE_QUOTA: NonZeroU32 = NonZeroU32::new(3).unwrap();

/// Identifier assigned by the store at creation. Never reused.
pub type TaskId = i64;

/// A unit of quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub max_submissions: u32,
    pub submissions_count: u32,
}

impl Task {
    /// Number of submissions the task will still accept.
    pub fn remaining(&self) -> u32 {
        self.max_submissions.saturating_sub(self.submissions_count)
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }
}

/// A task that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub max_submissions: NonZeroU32,
}

impl NewTask {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        max_submissions: NonZeroU32,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            max_submissions,
        }
    }

    /// The task inserted into an empty store at startup.
    pub fn sample() -> Self {
        Self::new("Sample Task", "Demo", SAMPLE_QUOTA)
    }

    /// Checks the text fields. The quota is positive by construction.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.title.trim().is_empty() {
            return Err(StoreError::InvalidTask("title must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(StoreError::InvalidTask("description must not be empty"));
        }
        Ok(())
    }
}
