//! # quota-limit
//!
//! `quota-limit` enforces per-task submission quotas: a task admits at most
//! `max_submissions` accepted submissions, no matter how many arrive at once.
//!
//! ## Core Philosophy
//!
//! Two independent mechanisms guard every counter:
//!
//! * **Atomic stores**: a [`CounterStore`] re-reads the counter and its limit inside a
//!   single transaction (or CAS loop) and only then increments it.
//! * **Key-scoped locks**: a [`KeyLock`] serialises contenders for the same task in
//!   arrival order while leaving every other task untouched.
//!
//! Either mechanism on its own keeps `submissions_count <= max_submissions`.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroU32;
//! use std::ops::ControlFlow;
//!
//! use quota_limit::CounterStore;
//! use quota_limit::MemoryCounterStore;
//! use quota_limit::NewTask;
//!
//! let store = MemoryCounterStore::new();
//! let task = store
//!     .create(&NewTask::new("Survey", "Demo", NonZeroU32::new(1).unwrap()))
//!     .unwrap();
//!
//! assert_eq!(store.increment_if_under_limit(task.id).unwrap(), ControlFlow::Continue(1));
//! assert!(store.increment_if_under_limit(task.id).unwrap().is_break());
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;

mod error;
mod key_lock;
mod memory;
mod sqlite;
mod task;

pub use error::StoreError;
pub use error::StoreResult;
pub use key_lock::KeyGuard;
pub use key_lock::KeyLock;
pub use memory::MemoryCounterStore;
pub use sqlite::SqliteCounterStore;
pub use task::NewTask;
pub use task::Task;
pub use task::TaskId;

/// Reasons why a check-and-increment left the counter untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// No task exists under the requested id.
    NotFound,
    /// The task has already admitted `max_submissions` submissions.
    QuotaExceeded { max_submissions: u32 },
}

/// Durable owner of task state.
///
/// Stores must be `Send` and `Sync` so they can be shared across tasks and
/// blocking threads via `Arc`.
pub trait CounterStore: Debug + Send + Sync {
    /// Reads a task. Never mutates `submissions_count`.
    fn get(&self, id: TaskId) -> StoreResult<Option<Task>>;

    /// Reads every task, ordered by id.
    fn list(&self) -> StoreResult<Vec<Task>>;

    /// Inserts a task with `submissions_count = 0` and returns it with its new id.
    fn create(&self, task: &NewTask) -> StoreResult<Task>;

    /// Atomically increments `submissions_count` if it is still below
    /// `max_submissions`.
    ///
    /// Both values are read inside the same indivisible unit as the write;
    /// values observed earlier by the caller are never trusted.
    ///
    /// Returns `Continue(new_count)` when the increment was committed and
    /// `Break(reason)` when nothing was written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying storage fails. Nothing is
    /// committed in that case.
    fn increment_if_under_limit(&self, id: TaskId) -> StoreResult<ControlFlow<Reason, u32>>;
}
