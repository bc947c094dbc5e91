use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::Mutex as FairMutex;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug)]
struct Queue {
    mutex: Arc<FairMutex<()>>,
    // Guards handed out for this key, held or still waiting.
    holders: usize,
}

/// Mutual exclusion scoped to a key.
///
/// Contenders for the same key are admitted one at a time, in the order they
/// called [`KeyLock::lock`]. Contenders for different keys never wait on each
/// other. A key's queue exists only while someone holds or waits for it.
pub struct KeyLock<K>
where
    K: Eq + Hash,
{
    queues: Mutex<HashMap<K, Queue>>,
}

impl<K> KeyLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until `key` is free and returns a guard holding it.
    ///
    /// The key is released when the guard is dropped, including during a
    /// panic unwind. Dropping this future while it waits gives up the place
    /// in the queue.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let mutex = {
            let mut queues = self.queues();
            let queue = queues.entry(key.clone()).or_insert_with(|| Queue {
                mutex: Arc::default(),
                holders: 0,
            });
            queue.holders += 1;
            Arc::clone(&queue.mutex)
        };

        let mut guard = KeyGuard {
            owner: self,
            key,
            permit: None,
        };
        // tokio's mutex is fair, so waiters are served FIFO
        guard.permit = Some(mutex.lock_owned().await);
        guard
    }

    /// Runs `critical` while holding `key`.
    pub async fn with_lock<F, Fut, T>(&self, key: K, critical: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        critical().await
    }

    /// Number of keys currently held or waited for.
    pub fn active_keys(&self) -> usize {
        self.queues().len()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<K, Queue>> {
        // The map is consistent after every statement, so a poisoned lock is still usable.
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Default for KeyLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyLock<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLock")
            .field("active_keys", &self.active_keys())
            .finish()
    }
}

/// Exclusive hold on one key of a [`KeyLock`].
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a, K>
where
    K: Eq + Hash,
{
    owner: &'a KeyLock<K>,
    key: K,
    permit: Option<OwnedMutexGuard<()>>,
}

impl<K> KeyGuard<'_, K>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Admit the next waiter before touching the map.
        self.permit.take();

        let mut queues = self
            .owner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = queues.get_mut(&self.key) {
            queue.holders -= 1;
            if queue.holders == 0 {
                queues.remove(&self.key);
            }
        }
    }
}
