/*
[INPUT]:  TaskApi progress endpoint + polling settings (interval, timeout, retry budget)
[OUTPUT]: ProgressEvents sampled on a fixed interval until terminal or budget exhausted
[POS]:    Transport layer - fallback pull channel
[UPDATE]: When changing poll pacing or failure handling
*/

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use stockdash_adapter::{AdapterError, TaskApi, TaskSnapshot};

use super::{ChannelContext, ChannelExit, ChannelKind, ProgressChannel, TransportStatus};
use crate::backoff::Backoff;
use crate::config::PollingConfig;
use crate::event::{EventSource, ProgressEvent};

/// Periodic status requests against the progress endpoint.
pub struct PollingChannel {
    api: Arc<dyn TaskApi>,
    settings: PollingConfig,
    next_sequence: u64,
}

impl PollingChannel {
    pub fn new(api: Arc<dyn TaskApi>, settings: PollingConfig) -> Self {
        Self {
            api,
            settings,
            next_sequence: 0,
        }
    }

    async fn poll_once(&self, ctx: &ChannelContext) -> Result<TaskSnapshot, AdapterError> {
        let request_timeout = self.settings.request_timeout();
        tokio::time::timeout(request_timeout, self.api.task_progress(ctx.task_id.as_str()))
            .await
            .map_err(|_| AdapterError::timeout(request_timeout))?
    }
}

#[async_trait]
impl ProgressChannel for PollingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Polling
    }

    async fn run(&mut self, ctx: ChannelContext) -> ChannelExit {
        let backoff = Backoff::new(self.settings.backoff_base(), self.settings.backoff_max());
        let max_retries = self.settings.max_retries;
        let mut failures: u32 = 0;
        self.next_sequence = self.next_sequence.max(ctx.resume_after);

        let mut ticker = tokio::time::interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ctx.set_transport(TransportStatus::Polling);

        loop {
            tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => return ChannelExit::Stopped,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => return ChannelExit::Stopped,
                polled = self.poll_once(&ctx) => polled,
            };

            match polled {
                Ok(snapshot) => {
                    failures = 0;
                    ctx.set_transport(TransportStatus::Polling);

                    if snapshot.task_id != ctx.task_id.as_str() {
                        ctx.metrics.record_malformed_frame();
                        warn!(
                            task_id = %ctx.task_id,
                            reported = %snapshot.task_id,
                            "progress endpoint answered for another task"
                        );
                        continue;
                    }

                    // Polled snapshots repeat; only the local counter orders them.
                    self.next_sequence += 1;
                    let event =
                        ProgressEvent::from_snapshot(snapshot, EventSource::Polling, self.next_sequence);
                    let terminal = event.is_terminal();
                    if !ctx.emit(event).await {
                        return ChannelExit::Stopped;
                    }
                    if terminal {
                        debug!(task_id = %ctx.task_id, "terminal status polled");
                        return ChannelExit::Completed;
                    }
                }
                Err(err) => {
                    failures += 1;
                    ctx.metrics.record_poll_failure();
                    let reason = err.to_string();
                    if !err.is_retryable() {
                        warn!(task_id = %ctx.task_id, %reason, "progress poll failed permanently");
                        return ChannelExit::Unavailable { reason };
                    }
                    if failures > max_retries {
                        warn!(task_id = %ctx.task_id, failures, %reason, "polling retry budget exhausted");
                        return ChannelExit::Unavailable { reason };
                    }

                    let delay = backoff.delay(failures);
                    warn!(task_id = %ctx.task_id, failures, ?delay, %reason, "progress poll failed; backing off");
                    tokio::select! {
                        _ = ctx.stop.cancelled() => return ChannelExit::Stopped,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::context;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use stockdash_adapter::{
        AdapterError, AnalysisRequest, CancelResponse, SubmitResponse, TaskStatus,
    };

    #[derive(Default)]
    struct ScriptedProgress {
        replies: Mutex<VecDeque<stockdash_adapter::Result<TaskSnapshot>>>,
        calls: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedProgress {
        fn reply(&self, status: TaskStatus, progress: f64) {
            let mut snapshot = TaskSnapshot::new("T1", status);
            snapshot.progress = Some(progress);
            self.replies.lock().unwrap().push_back(Ok(snapshot));
        }

        fn fail(&self) {
            self.replies.lock().unwrap().push_back(Err(AdapterError::Api {
                code: 503,
                message: "unavailable".to_string(),
            }));
        }
    }

    #[async_trait]
    impl TaskApi for ScriptedProgress {
        async fn submit_analysis(
            &self,
            _request: &AnalysisRequest,
        ) -> stockdash_adapter::Result<SubmitResponse> {
            unreachable!("polling never submits")
        }

        async fn task_progress(&self, _task_id: &str) -> stockdash_adapter::Result<TaskSnapshot> {
            self.calls.lock().unwrap().push(tokio::time::Instant::now());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AdapterError::Timeout { duration_ms: 1 }))
        }

        async fn active_tasks(&self) -> stockdash_adapter::Result<Vec<TaskSnapshot>> {
            Ok(Vec::new())
        }

        async fn cancel_task(&self, _task_id: &str) -> stockdash_adapter::Result<CancelResponse> {
            Err(AdapterError::NotSupported {
                endpoint: "cancel".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_at_terminal_status() {
        let api = Arc::new(ScriptedProgress::default());
        api.reply(TaskStatus::Running, 20.0);
        api.reply(TaskStatus::Running, 60.0);
        api.reply(TaskStatus::Succeeded, 100.0);

        let (ctx, mut rx) = context("T1");
        let mut channel = PollingChannel::new(api.clone(), PollingConfig::default());
        assert_eq!(channel.run(ctx).await, ChannelExit::Completed);

        let progress: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| (event.status, event.progress, event.sequence))
            .collect();
        assert_eq!(
            progress,
            vec![
                (Some(TaskStatus::Running), Some(20.0), 1),
                (Some(TaskStatus::Running), Some(60.0), 2),
                (Some(TaskStatus::Succeeded), Some(100.0), 3),
            ]
        );

        let calls = api.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls.windows(2).all(|w| w[1] - w[0] >= Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_interval_has_a_floor() {
        let api = Arc::new(ScriptedProgress::default());
        api.reply(TaskStatus::Running, 1.0);
        api.reply(TaskStatus::Cancelled, 1.0);

        let (ctx, _rx) = context("T1");
        let settings = PollingConfig {
            interval_ms: 1,
            ..PollingConfig::default()
        };
        let mut channel = PollingChannel::new(api.clone(), settings);
        assert_eq!(channel.run(ctx).await, ChannelExit::Completed);

        let calls = api.calls.lock().unwrap().clone();
        assert!(calls[1] - calls[0] >= crate::config::MIN_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_recovers_from_transient_failures() {
        let api = Arc::new(ScriptedProgress::default());
        api.fail();
        api.fail();
        api.reply(TaskStatus::Succeeded, 100.0);

        let (ctx, mut rx) = context("T1");
        let metrics = ctx.metrics.clone();
        let mut channel = PollingChannel::new(api, PollingConfig::default());
        assert_eq!(channel.run(ctx).await, ChannelExit::Completed);
        assert_eq!(rx.recv().await.unwrap().status, Some(TaskStatus::Succeeded));
        assert_eq!(metrics.snapshot().poll_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_exhausts_retry_budget() {
        let api = Arc::new(ScriptedProgress::default());
        let (ctx, mut rx) = context("T1");
        let settings = PollingConfig {
            max_retries: 3,
            ..PollingConfig::default()
        };
        let mut channel = PollingChannel::new(api.clone(), settings);

        assert!(matches!(channel.run(ctx).await, ChannelExit::Unavailable { .. }));
        assert_eq!(api.calls.lock().unwrap().len(), 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_gives_up_at_once_on_unknown_task() {
        let api = Arc::new(ScriptedProgress::default());
        api.replies
            .lock()
            .unwrap()
            .push_back(Err(AdapterError::NotFound("task T1".to_string())));
        let (ctx, mut rx) = context("T1");
        let metrics = ctx.metrics.clone();
        let mut channel = PollingChannel::new(api.clone(), PollingConfig::default());

        let started = tokio::time::Instant::now();
        assert!(matches!(channel.run(ctx).await, ChannelExit::Unavailable { .. }));
        assert_eq!(api.calls.lock().unwrap().len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(metrics.snapshot().poll_failures, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_resumes_above_folded_sequence() {
        let api = Arc::new(ScriptedProgress::default());
        api.reply(TaskStatus::Succeeded, 100.0);
        let (mut ctx, mut rx) = context("T1");
        ctx.resume_after = 4;
        let mut channel = PollingChannel::new(api, PollingConfig::default());

        assert_eq!(channel.run(ctx).await, ChannelExit::Completed);
        assert_eq!(rx.recv().await.unwrap().sequence, 5);
    }
}
