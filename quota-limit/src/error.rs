pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by a [`crate::CounterStore`].
///
/// Business outcomes (unknown task, exhausted quota) are never reported here;
/// see [`crate::Reason`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The task definition was rejected before reaching storage.
    #[error("invalid task: {0}")]
    InvalidTask(&'static str),

    /// The store could not be reached or its state is unusable.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The SQLite backend reported an error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
