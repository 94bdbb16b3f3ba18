/*
[INPUT]:  TaskApi + StreamConnector + TrackerConfig; caller submit/observe/cancel/list requests
[OUTPUT]: Tracked task states, subscriptions, cancellation outcomes
[POS]:    Runtime layer - owns every tracked task and its observer
[UPDATE]: When changing the public tracker API or task lifecycle
*/

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use stockdash_adapter::{
    AdapterError, AnalysisRequest, ClientConfig, DashboardClient, StreamConnector, TaskApi,
    TaskStatus, WsConnector,
};

use crate::channel::{PollingChannel, ProgressChannel, StreamingChannel, TransportStatus};
use crate::config::TrackerConfig;
use crate::error::{SubmissionError, TrackerError};
use crate::event::{EventSource, ProgressEvent};
use crate::metrics::{ObservationMetrics, ObservationMetricsSnapshot};
use crate::observer::Observer;
use crate::registry::ActiveTaskRegistry;
use crate::state::{FoldOutcome, FoldRejection, TaskId, TaskState};
use crate::subscription::TaskSubscription;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// What the backend said about a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum BackendAck {
    Acknowledged,
    /// Backend declined or failed to confirm; local state is cancelled anyway.
    Unacknowledged { reason: String },
    /// Backend exposes no cancellation endpoint; teardown was local only.
    NotSupported,
    /// No backend call made: the task was already terminal or already signalled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub state: TaskState,
    pub backend: BackendAck,
}

struct Observation {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Shared per-task record: state, notifications, transport, metrics.
pub(crate) struct TaskEntry {
    id: TaskId,
    state: watch::Sender<TaskState>,
    updates: broadcast::Sender<TaskState>,
    pub(crate) transport: Arc<watch::Sender<TransportStatus>>,
    pub(crate) metrics: Arc<ObservationMetrics>,
    observation: StdMutex<Option<Observation>>,
    backend_cancel_sent: AtomicBool,
    local_sequence: AtomicU64,
}

impl TaskEntry {
    pub(crate) fn new(initial: TaskState, buffer: usize) -> Arc<Self> {
        let (updates, _) = broadcast::channel(buffer.max(1));
        let (transport, _) = watch::channel(TransportStatus::Closed);
        Arc::new(Self {
            id: initial.id.clone(),
            state: watch::channel(initial).0,
            updates,
            transport: Arc::new(transport),
            metrics: Arc::new(ObservationMetrics::default()),
            observation: StdMutex::new(None),
            backend_cancel_sent: AtomicBool::new(false),
            local_sequence: AtomicU64::new(0),
        })
    }

    pub(crate) fn id(&self) -> &TaskId {
        &self.id
    }

    pub(crate) fn current(&self) -> TaskState {
        self.state.borrow().clone()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    pub(crate) fn set_transport(&self, status: TransportStatus) {
        self.transport.send_replace(status);
    }

    /// Fold under the per-task state lock; notifies subscribers on change.
    pub(crate) fn fold(&self, event: &ProgressEvent) -> Result<FoldOutcome, FoldRejection> {
        let mut result = Ok(FoldOutcome::Unchanged);
        self.state.send_if_modified(|state| {
            result = state.apply(event);
            let applied = matches!(result, Ok(FoldOutcome::Applied));
            if applied {
                let _ = self.updates.send(state.clone());
            }
            applied
        });
        self.metrics.record_fold(&result);

        match &result {
            Ok(FoldOutcome::Applied) => {
                let state = self.state.borrow();
                debug!(
                    task_id = %self.id,
                    source = %event.source,
                    status = %state.status,
                    progress = ?state.progress,
                    revision = state.revision,
                    "task state updated"
                );
            }
            Ok(FoldOutcome::Unchanged) => {
                trace!(task_id = %self.id, source = %event.source, sequence = event.sequence, "event carried nothing new");
            }
            Err(rejection) if rejection.is_protocol_violation() => {
                warn!(task_id = %self.id, source = %event.source, %rejection, "protocol violation; event rejected");
            }
            Err(rejection) => {
                debug!(task_id = %self.id, source = %event.source, %rejection, "event rejected");
            }
        }

        if matches!(result, Ok(FoldOutcome::Applied)) && self.is_terminal() {
            self.stop_observation();
        }
        result
    }

    fn subscribe(&self) -> TaskSubscription {
        let updates = self.updates.subscribe();
        TaskSubscription::new(self.current(), updates)
    }

    fn next_local_sequence(&self) -> u64 {
        self.local_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock_observation(&self) -> MutexGuard<'_, Option<Observation>> {
        self.observation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_observation(&self) {
        if let Some(observation) = self.lock_observation().as_ref() {
            observation.stop.cancel();
        }
    }

    fn take_observation(&self) -> Option<Observation> {
        self.lock_observation().take()
    }
}

/// Client-side tracker for backend analysis tasks.
///
/// Every observed task gets one observer on the tokio runtime that prefers
/// streaming and substitutes polling when streaming is unavailable.
pub struct TaskTracker {
    api: Arc<dyn TaskApi>,
    connector: Arc<dyn StreamConnector>,
    config: TrackerConfig,
    registry: ActiveTaskRegistry,
    tasks: Mutex<HashMap<TaskId, Arc<TaskEntry>>>,
    shutdown: CancellationToken,
}

impl TaskTracker {
    pub fn new(
        api: Arc<dyn TaskApi>,
        connector: Arc<dyn StreamConnector>,
        config: TrackerConfig,
    ) -> Self {
        let registry = ActiveTaskRegistry::new(Arc::clone(&api), config.api.request_timeout());
        Self {
            api,
            connector,
            config,
            registry,
            tasks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the HTTP client and WebSocket connector described by `config`.
    pub fn from_config(config: TrackerConfig) -> Result<Self, TrackerError> {
        let client_config = ClientConfig {
            timeout: config.api.request_timeout(),
            connect_timeout: config.api.connect_timeout(),
        };
        let client = DashboardClient::with_config_and_base_url(client_config, &config.api.base_url)
            .map_err(TrackerError::Setup)?;
        let connector = match config.api.ws_url.as_deref() {
            Some(ws_url) => WsConnector::new(ws_url),
            None => WsConnector::from_http_base(&config.api.base_url),
        }
        .map_err(TrackerError::Setup)?;

        Ok(Self::new(Arc::new(client), Arc::new(connector), config))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Send the job request once and start observing the new task.
    pub async fn submit(&self, request: &AnalysisRequest) -> Result<TaskId, SubmissionError> {
        request.validate().map_err(SubmissionError::Invalid)?;

        let request_timeout = self.config.api.request_timeout();
        let response = tokio::time::timeout(request_timeout, self.api.submit_analysis(request))
            .await
            .map_err(|_| SubmissionError::timeout(request_timeout))??;

        if response.task_id.trim().is_empty() {
            return Err(SubmissionError::Transport(AdapterError::InvalidResponse(
                "submission returned an empty task id".to_string(),
            )));
        }

        let task_id = TaskId::from(response.task_id);
        info!(%task_id, stock_code = %request.stock_code, "analysis task submitted");

        let entry = self.entry_or_pending(&task_id).await;
        self.ensure_observed(&entry);
        Ok(task_id)
    }

    /// Subscribe to a task's state transitions, starting observation if needed.
    ///
    /// Unknown ids are adopted as `pending`. Repeated calls share one observer.
    pub async fn observe(&self, task_id: impl Into<TaskId>) -> Result<TaskSubscription, TrackerError> {
        if self.shutdown.is_cancelled() {
            return Err(TrackerError::ShuttingDown);
        }
        let task_id = task_id.into();
        let entry = self.entry_or_pending(&task_id).await;
        let subscription = entry.subscribe();
        self.ensure_observed(&entry);
        Ok(subscription)
    }

    /// Best-effort cancellation: local teardown always, at most one backend signal.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<CancelOutcome, TrackerError> {
        let entry = self
            .entry(task_id)
            .await
            .ok_or_else(|| TrackerError::UnknownTask(task_id.clone()))?;

        if entry.is_terminal() {
            return Ok(CancelOutcome {
                state: entry.current(),
                backend: BackendAck::Skipped,
            });
        }

        let event = ProgressEvent::status(
            task_id.clone(),
            EventSource::Local,
            entry.next_local_sequence(),
            TaskStatus::Cancelled,
        );
        if entry.fold(&event).is_err() && entry.current().status != TaskStatus::Cancelled {
            // A terminal state won the race.
            return Ok(CancelOutcome {
                state: entry.current(),
                backend: BackendAck::Skipped,
            });
        }
        entry.stop_observation();

        if entry.backend_cancel_sent.swap(true, Ordering::SeqCst) {
            return Ok(CancelOutcome {
                state: entry.current(),
                backend: BackendAck::Skipped,
            });
        }

        let request_timeout = self.config.api.request_timeout();
        let backend = match tokio::time::timeout(request_timeout, self.api.cancel_task(task_id.as_str())).await {
            Ok(Ok(response)) if response.cancelled => {
                info!(%task_id, "backend acknowledged cancellation");
                BackendAck::Acknowledged
            }
            Ok(Ok(response)) => {
                let reason = response
                    .message
                    .unwrap_or_else(|| "backend declined cancellation".to_string());
                warn!(%task_id, %reason, "cancellation unacknowledged");
                BackendAck::Unacknowledged { reason }
            }
            Ok(Err(AdapterError::NotSupported { .. } | AdapterError::NotFound(_))) => {
                debug!(%task_id, "no backend cancellation endpoint; local teardown only");
                BackendAck::NotSupported
            }
            Ok(Err(err)) => {
                warn!(%task_id, error = %err, "cancellation unacknowledged");
                BackendAck::Unacknowledged {
                    reason: err.to_string(),
                }
            }
            Err(_) => {
                warn!(%task_id, timeout = ?request_timeout, "cancellation unacknowledged");
                BackendAck::Unacknowledged {
                    reason: format!("cancel request timed out after {request_timeout:?}"),
                }
            }
        };

        Ok(CancelOutcome {
            state: entry.current(),
            backend,
        })
    }

    /// Fresh active listing, reconciled with tracked tasks, in backend order.
    pub async fn list_active(&self) -> Result<Vec<TaskState>, TrackerError> {
        let snapshot = self.registry.fetch().await.map_err(TrackerError::Registry)?;
        let buffer = self.config.subscriber_buffer;
        let mut states = Vec::with_capacity(snapshot.len());

        for reported in snapshot.iter() {
            let task_id = TaskId::from(reported.task_id.as_str());
            let (entry, adopted) = {
                let mut tasks = self.tasks.lock().await;
                match tasks.get(&task_id) {
                    Some(entry) => (Arc::clone(entry), false),
                    None => {
                        let entry = TaskEntry::new(TaskState::from_snapshot(reported), buffer);
                        tasks.insert(task_id.clone(), Arc::clone(&entry));
                        (entry, true)
                    }
                }
            };

            if adopted {
                info!(%task_id, status = %reported.status, "adopting task from active listing");
                if !self.shutdown.is_cancelled() {
                    self.ensure_observed(&entry);
                }
            } else {
                let event = ProgressEvent::from_snapshot(
                    reported.clone(),
                    EventSource::Registry,
                    snapshot.generation,
                );
                let _ = entry.fold(&event);
            }
            states.push(entry.current());
        }

        Ok(states)
    }

    pub async fn state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.entry(task_id).await.map(|entry| entry.current())
    }

    /// Ids of every tracked task, sorted.
    pub async fn tracked(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn transport(&self, task_id: &TaskId) -> Option<TransportStatus> {
        self.entry(task_id).await.map(|entry| *entry.transport.borrow())
    }

    pub async fn watch_transport(&self, task_id: &TaskId) -> Option<watch::Receiver<TransportStatus>> {
        self.entry(task_id).await.map(|entry| entry.transport.subscribe())
    }

    pub async fn metrics(&self, task_id: &TaskId) -> Option<ObservationMetricsSnapshot> {
        self.entry(task_id).await.map(|entry| entry.metrics.snapshot())
    }

    /// Forget terminal tasks last updated more than `max_age` ago. Returns how many were dropped.
    pub async fn prune_finished(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|task_id, entry| {
            let state = entry.state.borrow();
            let expired = state.is_terminal()
                && (now - state.updated_at)
                    .to_std()
                    .is_ok_and(|age| age >= max_age);
            if expired {
                debug!(%task_id, status = %state.status, "pruning finished task");
            }
            !expired
        });
        before - tasks.len()
    }

    /// Stop every observer and wait for them, aborting any still running at the deadline.
    pub async fn shutdown_and_wait(&self) -> Result<()> {
        self.shutdown.cancel();
        let observations: Vec<(TaskId, Observation)> = {
            let tasks = self.tasks.lock().await;
            tasks
                .iter()
                .filter_map(|(task_id, entry)| {
                    entry
                        .take_observation()
                        .map(|observation| (task_id.clone(), observation))
                })
                .collect()
        };
        join_all_with_deadline(observations, SHUTDOWN_TIMEOUT).await
    }

    async fn entry(&self, task_id: &TaskId) -> Option<Arc<TaskEntry>> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    async fn entry_or_pending(&self, task_id: &TaskId) -> Arc<TaskEntry> {
        let buffer = self.config.subscriber_buffer;
        let mut tasks = self.tasks.lock().await;
        let entry = tasks.entry(task_id.clone()).or_insert_with(|| {
            debug!(%task_id, "tracking task as pending");
            TaskEntry::new(TaskState::pending(task_id.clone()), buffer)
        });
        Arc::clone(entry)
    }

    /// Start an observer unless a live one exists. Restarts after `Unavailable`.
    fn ensure_observed(&self, entry: &Arc<TaskEntry>) {
        let mut slot = entry.lock_observation();
        if entry.is_terminal() {
            return;
        }
        if let Some(existing) = slot.as_ref() {
            let unavailable = *entry.transport.borrow() == TransportStatus::Unavailable;
            if !existing.handle.is_finished() && !unavailable {
                return;
            }
            info!(task_id = %entry.id(), "restarting observation");
            existing.stop.cancel();
        }

        let stop = self.shutdown.child_token();
        entry.set_transport(TransportStatus::Connecting);
        let observer = Observer::new(
            Arc::clone(entry),
            self.initial_channel(),
            Arc::clone(&self.api),
            self.config.polling.clone(),
            stop.clone(),
            self.config.subscriber_buffer,
        );
        let handle = tokio::spawn(observer.run());
        *slot = Some(Observation { stop, handle });
    }

    fn initial_channel(&self) -> Box<dyn ProgressChannel> {
        if self.config.streaming.enabled {
            Box::new(StreamingChannel::new(
                Arc::clone(&self.connector),
                self.config.streaming.clone(),
            ))
        } else {
            Box::new(PollingChannel::new(
                Arc::clone(&self.api),
                self.config.polling.clone(),
            ))
        }
    }
}

impl Drop for TaskTracker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn join_all_with_deadline(
    mut observations: Vec<(TaskId, Observation)>,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;

    while let Some((task_id, observation)) = observations.pop() {
        let mut handle = observation.handle;
        tokio::select! {
            res = &mut handle => {
                if let Err(join_err) = res {
                    abort_all(observations);
                    if join_err.is_panic() {
                        return Err(anyhow!("observer panicked task_id={task_id}: {join_err}"));
                    }
                    return Err(anyhow!("observer join error task_id={task_id}: {join_err}"));
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                handle.abort();
                abort_all(observations);
                return Err(anyhow!("shutdown timed out after {timeout:?}"));
            }
        }
    }

    Ok(())
}

fn abort_all(observations: Vec<(TaskId, Observation)>) {
    for (_, observation) in observations {
        observation.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockdash_adapter::TaskSnapshot;

    #[test]
    fn entry_fold_notifies_only_on_change() {
        let entry = TaskEntry::new(TaskState::pending(TaskId::from("T1")), 8);
        let mut rx = entry.updates.subscribe();

        let running = ProgressEvent::status(TaskId::from("T1"), EventSource::Polling, 1, TaskStatus::Running);
        assert_eq!(entry.fold(&running), Ok(FoldOutcome::Applied));
        let again = ProgressEvent::status(TaskId::from("T1"), EventSource::Polling, 2, TaskStatus::Running);
        assert_eq!(entry.fold(&again), Ok(FoldOutcome::Unchanged));
        assert!(entry.fold(&running).is_err());

        assert_eq!(rx.try_recv().unwrap().status, TaskStatus::Running);
        assert!(rx.try_recv().is_err());

        let metrics = entry.metrics.snapshot();
        assert_eq!((metrics.applied, metrics.unchanged, metrics.rejected), (1, 1, 1));
    }

    #[test]
    fn entry_adopted_from_snapshot_keeps_reported_status() {
        let mut snapshot = TaskSnapshot::new("T9", TaskStatus::Running);
        snapshot.progress = Some(42.0);
        let entry = TaskEntry::new(TaskState::from_snapshot(&snapshot), 8);
        assert_eq!(entry.current().status, TaskStatus::Running);
        assert_eq!(entry.current().progress, Some(42.0));
        assert_eq!(*entry.transport.borrow(), TransportStatus::Closed);
    }
}
