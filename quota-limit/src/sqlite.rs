use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use tracing::debug;
use tracing::info;

use super::CounterStore;
use super::Reason;
use crate::NewTask;
use crate::StoreError;
use crate::StoreResult;
use crate::Task;
use crate::TaskId;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    max_submissions INTEGER NOT NULL,
    submissions_count INTEGER NOT NULL DEFAULT 0,
    CHECK (max_submissions > 0),
    CHECK (submissions_count >= 0 AND submissions_count <= max_submissions)
);";

const TASK_SELECT_SQL: &str =
    "SELECT id, title, description, max_submissions, submissions_count FROM tasks";

/// A durable store backed by a single SQLite connection.
///
/// Every check-and-increment runs in its own `BEGIN IMMEDIATE` transaction
/// that re-reads the row before writing, and the table carries `CHECK`
/// constraints so the database itself refuses an overshooting count.
#[derive(Debug)]
pub struct SqliteCounterStore {
    conn: Mutex<Connection>,
}

impl SqliteCounterStore {
    /// Opens (or creates) the database file and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened task database");
        Self::bootstrap(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts `task` only when the table is empty.
    ///
    /// Returns the inserted task, or `None` if tasks already existed.
    pub fn seed_if_empty(&self, task: &NewTask) -> StoreResult<Option<Task>> {
        task.validate()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: i64 = tx.query_row("SELECT count(1) FROM tasks", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(None);
        }
        let seeded = insert(&tx, task)?;
        tx.commit()?;

        info!(task_id = seeded.id, title = %seeded.title, "seeded empty task table");
        Ok(Some(seeded))
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

fn insert(conn: &Connection, task: &NewTask) -> StoreResult<Task> {
    conn.execute(
        "INSERT INTO tasks (title, description, max_submissions) VALUES (?1, ?2, ?3)",
        params![task.title, task.description, task.max_submissions.get()],
    )?;

    Ok(Task {
        id: conn.last_insert_rowid(),
        title: task.title.clone(),
        description: task.description.clone(),
        max_submissions: task.max_submissions.get(),
        submissions_count: 0,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        max_submissions: row.get(3)?,
        submissions_count: row.get(4)?,
    })
}

impl CounterStore for SqliteCounterStore {
    fn get(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("{TASK_SELECT_SQL} WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn list(&self) -> StoreResult<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} ORDER BY id"))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn create(&self, task: &NewTask) -> StoreResult<Task> {
        task.validate()?;
        let conn = self.conn()?;
        let created = insert(&conn, task)?;
        debug!(task_id = created.id, max_submissions = created.max_submissions, "created task");
        Ok(created)
    }

    fn increment_if_under_limit(&self, id: TaskId) -> StoreResult<ControlFlow<Reason, u32>> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front, so the read below cannot go stale.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row: Option<(u32, u32)> = tx
            .query_row(
                "SELECT submissions_count, max_submissions FROM tasks WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // Dropping `tx` without commit rolls back.
        let Some((count, max_submissions)) = row else {
            return Ok(ControlFlow::Break(Reason::NotFound));
        };
        if count >= max_submissions {
            return Ok(ControlFlow::Break(Reason::QuotaExceeded { max_submissions }));
        }

        tx.execute(
            "UPDATE tasks SET submissions_count = submissions_count + 1 WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;

        Ok(ControlFlow::Continue(count + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::num::NonZeroU32;
    use std::sync::Arc;

    use more_asserts::assert_le;

    fn new_task(max: u32) -> NewTask {
        NewTask::new("Test Task", "Testing", NonZeroU32::new(max).unwrap())
    }

    #[test]
    fn it_enforces_limits() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        let task = store.create(&new_task(2)).unwrap();

        assert_eq!(
            store.increment_if_under_limit(task.id).unwrap(),
            ControlFlow::Continue(1)
        );
        assert_eq!(
            store.increment_if_under_limit(task.id).unwrap(),
            ControlFlow::Continue(2)
        );
        assert_eq!(
            store.increment_if_under_limit(task.id).unwrap(),
            ControlFlow::Break(Reason::QuotaExceeded { max_submissions: 2 })
        );
        assert_eq!(store.get(task.id).unwrap().unwrap().submissions_count, 2);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        assert_eq!(store.get(99).unwrap(), None);
        assert_eq!(
            store.increment_if_under_limit(99).unwrap(),
            ControlFlow::Break(Reason::NotFound)
        );
    }

    #[test]
    fn reads_do_not_mutate() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        let task = store.create(&new_task(3)).unwrap();
        store.increment_if_under_limit(task.id).unwrap();

        for _ in 0..10 {
            assert_eq!(store.get(task.id).unwrap().unwrap().submissions_count, 1);
            assert_eq!(store.list().unwrap()[0].submissions_count, 1);
        }
    }

    #[test]
    fn schema_rejects_overshoot() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        let task = store.create(&new_task(1)).unwrap();

        let conn = store.conn().unwrap();
        let result = conn.execute(
            "UPDATE tasks SET submissions_count = 2 WHERE id = ?1",
            params![task.id],
        );
        assert!(result.is_err(), "CHECK constraint must refuse count > max");
    }

    #[test]
    fn seed_only_fills_an_empty_table() {
        let store = SqliteCounterStore::open_in_memory().unwrap();

        let seeded = store.seed_if_empty(&NewTask::sample()).unwrap().unwrap();
        assert_eq!(seeded.max_submissions, 3);
        assert!(store.seed_if_empty(&NewTask::sample()).unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let id = {
            let store = SqliteCounterStore::open(&path).unwrap();
            let task = store.create(&new_task(5)).unwrap();
            store.increment_if_under_limit(task.id).unwrap();
            task.id
        };

        let reopened = SqliteCounterStore::open(&path).unwrap();
        let task = reopened.get(id).unwrap().unwrap();
        assert_eq!(task.submissions_count, 1);
        assert_eq!(task.title, "Test Task");
    }

    #[test]
    fn test_two_connections_never_overshoot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        let first = Arc::new(SqliteCounterStore::open(&path).unwrap());
        let second = Arc::new(SqliteCounterStore::open(&path).unwrap());
        let task = first.create(&new_task(3)).unwrap();

        let mut handles = vec![];
        for i in 0..20 {
            let store = if i % 2 == 0 {
                Arc::clone(&first)
            } else {
                Arc::clone(&second)
            };
            handles.push(std::thread::spawn(move || {
                store.increment_if_under_limit(task.id).unwrap()
            }));
        }

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_continue())
            .count();

        assert_eq!(accepted, 3);
        let count = first.get(task.id).unwrap().unwrap().submissions_count;
        assert_le!(count, 3);
        assert_eq!(count, 3);
    }
}
