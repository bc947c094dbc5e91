use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use quota_limit::CounterStore;
use quota_limit::KeyLock;
use quota_limit::NewTask;
use quota_limit::Reason;
use quota_limit::StoreError;
use quota_limit::StoreResult;
use quota_limit::Task;
use quota_limit::TaskId;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::QuotaError;
use crate::notify::Notification;
use crate::notify::NotificationDispatcher;

/// One submission attempt. Lives only for the duration of a `submit` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: TaskId,
    /// Opaque to the enforcer; forwarded untouched to the notification receiver.
    pub payload: Value,
}

impl Submission {
    pub fn new(task_id: TaskId, payload: Value) -> Self {
        Self { task_id, payload }
    }
}

/// Terminal state of a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The increment was committed; `new_count` is the count it produced.
    Accepted { new_count: u32 },
    /// The task had no capacity left. Nothing was written.
    Rejected { max_submissions: u32 },
    /// No such task.
    NotFound,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Converts the business outcome into the boundary's error vocabulary.
    pub fn into_result(self, task_id: TaskId) -> Result<u32, QuotaError> {
        match self {
            Self::Accepted { new_count } => Ok(new_count),
            Self::Rejected { max_submissions } => Err(QuotaError::QuotaExceeded {
                task_id,
                max_submissions,
            }),
            Self::NotFound => Err(QuotaError::NotFound { task_id }),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Clone, Debug)]
struct QuotaMetrics {
    submissions: Counter<u64>,
}

/// Serialises check-and-increment per task and classifies the result.
///
/// ```text
/// RECEIVED --lookup--> NOT_FOUND
/// RECEIVED --found---> LOCK_WAIT --acquired--> CHECKING --+--> ACCEPTED
///                                                          +--> REJECTED
///                                                          +--> NOT_FOUND
/// ```
///
/// The key lock is released on leaving `CHECKING` on every path. Clones share
/// the store, the lock table and the dispatcher.
pub struct QuotaEnforcer<S>
where
    S: ?Sized,
{
    store: Arc<S>,
    locks: Arc<KeyLock<TaskId>>,
    dispatcher: Option<NotificationDispatcher>,
    instruments: QuotaMetrics,
}

// Manually implement Clone so `S` itself need not be Clone
impl<S> Clone for QuotaEnforcer<S>
where
    S: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            dispatcher: self.dispatcher.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S> fmt::Debug for QuotaEnforcer<S>
where
    S: CounterStore + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaEnforcer")
            .field("store", &self.store)
            .field("locks", &self.locks)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl<S> QuotaEnforcer<S>
where
    S: CounterStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        let meter = global::meter("quota_enforcer");
        let instruments = QuotaMetrics {
            submissions: meter.u64_counter("quota_submissions").build(),
        };

        Self {
            store,
            locks: Arc::new(KeyLock::new()),
            dispatcher: None,
            instruments,
        }
    }

    /// Notifies `dispatcher` after every accepted submission.
    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Runs one submission attempt to a terminal state.
    ///
    /// `Accepted`, `Rejected` and `NotFound` are normal results. Only a
    /// failing store is reported as an error, and the task's key lock is
    /// released on that path too.
    ///
    /// The attempt runs on its own task: dropping the returned future does
    /// not interrupt it, so the lock is held until the increment has finished
    /// and an accepted submission is still notified.
    #[tracing::instrument(level = "debug", skip_all, fields(task_id = submission.task_id))]
    pub async fn submit(&self, submission: Submission) -> StoreResult<Outcome> {
        let enforcer = self.clone();
        tokio::spawn(async move { enforcer.submit_detached(submission).await }.in_current_span())
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?
    }

    async fn submit_detached(&self, submission: Submission) -> StoreResult<Outcome> {
        let result = self.enforce(submission).await;

        match &result {
            Ok(outcome) => {
                self.instruments
                    .submissions
                    .add(1, &[KeyValue::new("outcome", outcome.label())]);
            }
            Err(error) => {
                self.instruments
                    .submissions
                    .add(1, &[KeyValue::new("outcome", "error")]);
                warn!(%error, "submission failed");
            }
        }
        result
    }

    async fn enforce(&self, submission: Submission) -> StoreResult<Outcome> {
        let Submission { task_id, payload } = submission;

        // RECEIVED
        if self.get_task(task_id).await?.is_none() {
            debug!(task_id, "unknown task");
            return Ok(Outcome::NotFound);
        }

        // LOCK_WAIT
        let guard = self.locks.lock(task_id).await;

        // CHECKING: the in-lock read is authoritative
        let checked = self
            .run_blocking(move |store| store.increment_if_under_limit(task_id))
            .await;
        drop(guard);

        let outcome = match checked? {
            ControlFlow::Continue(new_count) => {
                info!(task_id, new_count, "submission accepted");
                if let Some(dispatcher) = &self.dispatcher {
                    // Detached: the response never waits on delivery.
                    drop(dispatcher.dispatch(Notification {
                        task_id,
                        data: payload,
                    }));
                }
                Outcome::Accepted { new_count }
            }
            ControlFlow::Break(Reason::QuotaExceeded { max_submissions }) => {
                info!(task_id, max_submissions, "submission rejected, quota reached");
                Outcome::Rejected { max_submissions }
            }
            ControlFlow::Break(Reason::NotFound) => {
                debug!(task_id, "task vanished before the check");
                Outcome::NotFound
            }
        };
        Ok(outcome)
    }

    /// Reads a task without taking its lock.
    pub async fn get_task(&self, task_id: TaskId) -> StoreResult<Option<Task>> {
        self.run_blocking(move |store| store.get(task_id)).await
    }

    pub async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        self.run_blocking(|store| store.list()).await
    }

    pub async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        self.run_blocking(move |store| store.create(&task)).await
    }

    /// Number of tasks with a submission currently holding or awaiting the lock.
    pub fn active_locks(&self) -> usize {
        self.locks.active_keys()
    }

    async fn run_blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&S) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&*store))
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?
    }

    /// Like [`QuotaEnforcer::submit`], folding the outcome into [`QuotaError`].
    pub async fn submit_checked(&self, submission: Submission) -> Result<u32, QuotaError> {
        let task_id = submission.task_id;
        self.submit(submission).await?.into_result(task_id)
    }
}
