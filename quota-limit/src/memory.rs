use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use super::CounterStore;
use super::Reason;
use crate::NewTask;
use crate::StoreError;
use crate::StoreResult;
use crate::Task;
use crate::TaskId;

#[derive(Debug)]
struct Slot {
    title: String,
    description: String,
    max_submissions: u32,
    submissions_count: AtomicU32,
}

impl Slot {
    fn snapshot(&self, id: TaskId) -> Task {
        Task {
            id,
            title: self.title.clone(),
            description: self.description.clone(),
            max_submissions: self.max_submissions,
            submissions_count: self.submissions_count.load(Ordering::Acquire),
        }
    }
}

/// A process-local store.
///
/// Counters are plain atomics and the check-and-increment is a single
/// compare-and-swap loop, so increments never take the table lock for
/// writing. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    tasks: RwLock<BTreeMap<TaskId, Arc<Slot>>>,
    last_id: AtomicI64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: TaskId) -> StoreResult<Option<Arc<Slot>>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        Ok(tasks.get(&id).cloned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("task table lock poisoned".to_string())
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, id: TaskId) -> StoreResult<Option<Task>> {
        Ok(self.slot(id)?.map(|slot| slot.snapshot(id)))
    }

    fn list(&self) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        Ok(tasks
            .iter()
            .map(|(id, slot)| slot.snapshot(*id))
            .collect())
    }

    fn create(&self, task: &NewTask) -> StoreResult<Task> {
        task.validate()?;

        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = Arc::new(Slot {
            title: task.title.clone(),
            description: task.description.clone(),
            max_submissions: task.max_submissions.get(),
            submissions_count: AtomicU32::new(0),
        });
        let created = slot.snapshot(id);

        self.tasks.write().map_err(|_| poisoned())?.insert(id, slot);
        Ok(created)
    }

    fn increment_if_under_limit(&self, id: TaskId) -> StoreResult<ControlFlow<Reason, u32>> {
        let Some(slot) = self.slot(id)? else {
            return Ok(ControlFlow::Break(Reason::NotFound));
        };

        let max_submissions = slot.max_submissions;
        let previous = slot.submissions_count.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |count| (count < max_submissions).then_some(count + 1),
        );

        match previous {
            Ok(count) => Ok(ControlFlow::Continue(count + 1)),
            Err(_) => Ok(ControlFlow::Break(Reason::QuotaExceeded { max_submissions })),
        }
    }
}
