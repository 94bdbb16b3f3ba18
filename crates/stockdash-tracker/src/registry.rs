/*
[INPUT]:  TaskApi active-task listing
[OUTPUT]: Immutable, Arc-shared ActiveSnapshot per fetch
[POS]:    Data layer - read-only bulk view of backend tasks
[UPDATE]: When changing how the active listing is fetched or ordered
*/

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use stockdash_adapter::{AdapterError, TaskApi, TaskSnapshot};

/// Point-in-time listing of active tasks, in backend order.
#[derive(Debug, Clone)]
pub struct ActiveSnapshot {
    pub tasks: Arc<[TaskSnapshot]>,
    pub fetched_at: DateTime<Utc>,
    /// Strictly increasing per registry; doubles as the registry event sequence.
    pub generation: u64,
}

impl ActiveSnapshot {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.tasks.iter()
    }
}

/// Fetches a fresh snapshot on every call; nothing is cached.
pub struct ActiveTaskRegistry {
    api: Arc<dyn TaskApi>,
    request_timeout: Duration,
    generation: AtomicU64,
}

impl ActiveTaskRegistry {
    pub fn new(api: Arc<dyn TaskApi>, request_timeout: Duration) -> Self {
        Self {
            api,
            request_timeout,
            generation: AtomicU64::new(0),
        }
    }

    pub async fn fetch(&self) -> Result<ActiveSnapshot, AdapterError> {
        let tasks = tokio::time::timeout(self.request_timeout, self.api.active_tasks())
            .await
            .map_err(|_| AdapterError::timeout(self.request_timeout))??;

        let mut seen = HashSet::with_capacity(tasks.len());
        let tasks: Vec<TaskSnapshot> = tasks
            .into_iter()
            .filter(|task| {
                let first = seen.insert(task.task_id.clone());
                if !first {
                    debug!(task_id = %task.task_id, "duplicate id in active listing");
                }
                first
            })
            .collect();

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(generation, count = tasks.len(), "active task snapshot fetched");
        Ok(ActiveSnapshot {
            tasks: tasks.into(),
            fetched_at: Utc::now(),
            generation,
        })
    }
}
