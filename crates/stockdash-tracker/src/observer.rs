/*
[INPUT]:  One tracked task entry + its initial ProgressChannel
[OUTPUT]: Folded task state; transport status; streaming -> polling substitution
[POS]:    Runtime layer - exactly one observer task per observed task
[UPDATE]: When changing channel selection, fallback, or fold dispatch
*/

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stockdash_adapter::TaskApi;

use crate::channel::{
    ChannelContext, ChannelExit, ChannelKind, PollingChannel, ProgressChannel, TransportStatus,
};
use crate::config::PollingConfig;
use crate::tracker::TaskEntry;

pub(crate) struct Observer {
    entry: Arc<TaskEntry>,
    channel: Box<dyn ProgressChannel>,
    api: Arc<dyn TaskApi>,
    polling: PollingConfig,
    stop: CancellationToken,
    event_buffer: usize,
}

impl Observer {
    pub(crate) fn new(
        entry: Arc<TaskEntry>,
        channel: Box<dyn ProgressChannel>,
        api: Arc<dyn TaskApi>,
        polling: PollingConfig,
        stop: CancellationToken,
        event_buffer: usize,
    ) -> Self {
        Self {
            entry,
            channel,
            api,
            polling,
            stop,
            event_buffer: event_buffer.max(1),
        }
    }

    pub(crate) async fn run(mut self) {
        let task_id = self.entry.id().clone();
        loop {
            let kind = self.channel.kind();
            match self.drive().await {
                ChannelExit::Stopped => {
                    self.entry.set_transport(TransportStatus::Closed);
                    break;
                }
                ChannelExit::Completed if self.entry.is_terminal() => {
                    self.entry.set_transport(TransportStatus::Closed);
                    break;
                }
                ChannelExit::Completed if kind == ChannelKind::Streaming => {
                    warn!(
                        %task_id,
                        status = %self.entry.current().status,
                        "streamed terminal frame was not applied; falling back to polling"
                    );
                    self.fall_back_to_polling();
                }
                ChannelExit::Completed => {
                    warn!(
                        %task_id,
                        status = %self.entry.current().status,
                        "polled terminal status was not applied; keeping last known status"
                    );
                    self.entry.set_transport(TransportStatus::Unavailable);
                    break;
                }
                ChannelExit::Unavailable { reason } if kind == ChannelKind::Streaming => {
                    if self.stop.is_cancelled() || self.entry.is_terminal() {
                        self.entry.set_transport(TransportStatus::Closed);
                        break;
                    }
                    info!(%task_id, %reason, "streaming unavailable; falling back to polling");
                    self.fall_back_to_polling();
                }
                ChannelExit::Unavailable { reason } => {
                    warn!(
                        %task_id,
                        %reason,
                        status = %self.entry.current().status,
                        "channel unavailable; keeping last known status"
                    );
                    self.entry.set_transport(TransportStatus::Unavailable);
                    break;
                }
            }
        }
        debug!(%task_id, "observer exited");
    }

    fn fall_back_to_polling(&mut self) {
        self.entry.metrics.record_fallback();
        self.channel = Box::new(PollingChannel::new(
            Arc::clone(&self.api),
            self.polling.clone(),
        ));
    }

    /// Run the current channel to completion, folding its events in arrival order.
    async fn drive(&mut self) -> ChannelExit {
        let (events, mut rx) = mpsc::channel(self.event_buffer);
        let ctx = ChannelContext {
            task_id: self.entry.id().clone(),
            events,
            transport: Arc::clone(&self.entry.transport),
            metrics: Arc::clone(&self.entry.metrics),
            stop: self.stop.clone(),
            resume_after: self
                .entry
                .current()
                .last_sequence(self.channel.kind().source())
                .unwrap_or(0),
        };
        let entry = Arc::clone(&self.entry);

        let run = self.channel.run(ctx);
        tokio::pin!(run);

        let exit = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => {
                    let _ = entry.fold(&event);
                }
                exit = &mut run => break exit,
            }
        };

        while let Ok(event) = rx.try_recv() {
            let _ = entry.fold(&event);
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use stockdash_adapter::{
        AdapterError, AnalysisRequest, CancelResponse, SubmitResponse, TaskSnapshot, TaskStatus,
    };

    use crate::event::{EventSource, ProgressEvent};
    use crate::state::{TaskId, TaskState};

    /// Streaming stand-in that replays fixed events and reports completion.
    struct ReplayChannel {
        events: Vec<ProgressEvent>,
    }

    #[async_trait]
    impl ProgressChannel for ReplayChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Streaming
        }

        async fn run(&mut self, ctx: ChannelContext) -> ChannelExit {
            for event in self.events.drain(..) {
                ctx.emit(event).await;
            }
            ChannelExit::Completed
        }
    }

    struct ProgressOnly {
        snapshot: Mutex<Option<TaskSnapshot>>,
    }

    #[async_trait]
    impl TaskApi for ProgressOnly {
        async fn submit_analysis(&self, _request: &AnalysisRequest) -> stockdash_adapter::Result<SubmitResponse> {
            unreachable!("observer never submits")
        }

        async fn task_progress(&self, _task_id: &str) -> stockdash_adapter::Result<TaskSnapshot> {
            self.snapshot
                .lock()
                .unwrap()
                .take()
                .ok_or(AdapterError::Timeout { duration_ms: 1 })
        }

        async fn active_tasks(&self) -> stockdash_adapter::Result<Vec<TaskSnapshot>> {
            Ok(Vec::new())
        }

        async fn cancel_task(&self, _task_id: &str) -> stockdash_adapter::Result<CancelResponse> {
            unreachable!("observer never cancels")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_terminal_frame_falls_back_to_polling() {
        let id = TaskId::from("T1");
        let entry = TaskEntry::new(TaskState::pending(id.clone()), 8);
        let running = ProgressEvent::status(id.clone(), EventSource::Streaming, 5, TaskStatus::Running);
        entry.fold(&running).unwrap();

        let stale = ProgressEvent::status(id.clone(), EventSource::Streaming, 3, TaskStatus::Succeeded);
        let api = Arc::new(ProgressOnly {
            snapshot: Mutex::new(Some(TaskSnapshot::new("T1", TaskStatus::Succeeded))),
        });
        let observer = Observer::new(
            Arc::clone(&entry),
            Box::new(ReplayChannel { events: vec![stale] }),
            api,
            PollingConfig::default(),
            CancellationToken::new(),
            8,
        );
        observer.run().await;

        assert_eq!(entry.current().status, TaskStatus::Succeeded);
        assert_eq!(*entry.transport.borrow(), TransportStatus::Closed);
        assert_eq!(entry.metrics.snapshot().fallbacks, 1);
    }
}
