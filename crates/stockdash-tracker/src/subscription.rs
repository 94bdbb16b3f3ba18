/*
[INPUT]:  Per-task broadcast of folded states + snapshot at subscribe time
[OUTPUT]: Ordered, de-duplicated stream of TaskState ending at a terminal state
[POS]:    Caller-facing handle returned by observe/submit
[UPDATE]: When changing delivery guarantees to subscribers
*/

use tokio::sync::broadcast;
use tracing::warn;

use crate::state::{TaskId, TaskState};

/// Independent view of one task's state transitions.
///
/// Yields the state known at subscribe time first, then every later
/// transition. Ends after yielding a terminal state.
#[derive(Debug)]
pub struct TaskSubscription {
    task_id: TaskId,
    initial: Option<TaskState>,
    updates: broadcast::Receiver<TaskState>,
    last_revision: Option<u64>,
    finished: bool,
}

impl TaskSubscription {
    pub(crate) fn new(initial: TaskState, updates: broadcast::Receiver<TaskState>) -> Self {
        Self {
            task_id: initial.id.clone(),
            initial: Some(initial),
            updates,
            last_revision: None,
            finished: false,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn next(&mut self) -> Option<TaskState> {
        if self.finished {
            return None;
        }
        if let Some(state) = self.initial.take() {
            return Some(self.deliver(state));
        }

        loop {
            match self.updates.recv().await {
                Ok(state) => {
                    if self.last_revision.is_some_and(|last| state.revision <= last) {
                        continue;
                    }
                    return Some(self.deliver(state));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(task_id = %self.task_id, skipped, "subscriber lagged; skipping to newer states");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Drain the subscription, returning the final state seen.
    pub async fn wait_terminal(mut self) -> Option<TaskState> {
        let mut last = None;
        while let Some(state) = self.next().await {
            last = Some(state);
        }
        last
    }

    fn deliver(&mut self, state: TaskState) -> TaskState {
        self.last_revision = Some(state.revision);
        if state.is_terminal() {
            self.finished = true;
        }
        state
    }
}
