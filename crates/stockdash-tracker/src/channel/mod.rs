/*
[INPUT]:  Per-task observation context (event sink, transport status, stop token)
[OUTPUT]: ProgressChannel strategy trait + transport lifecycle types
[POS]:    Transport layer - seam between the observer and streaming/polling
[UPDATE]: When adding channel kinds or transport states
*/

mod polling;
mod streaming;

pub use polling::PollingChannel;
pub use streaming::StreamingChannel;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::event::{EventSource, ProgressEvent};
use crate::metrics::ObservationMetrics;
use crate::state::TaskId;

/// Lifecycle of the transport currently observing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransportStatus {
    Connecting,
    Open,
    /// Connection suspected lost; `attempt` is the reconnection attempt in flight.
    Degraded { attempt: u32 },
    Polling,
    /// Both transports exhausted their budgets. The task keeps its last status.
    Unavailable,
    Closed,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportStatus::Connecting => f.write_str("connecting"),
            TransportStatus::Open => f.write_str("open"),
            TransportStatus::Degraded { attempt } => write!(f, "degraded(attempt {attempt})"),
            TransportStatus::Polling => f.write_str("polling"),
            TransportStatus::Unavailable => f.write_str("unavailable"),
            TransportStatus::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Streaming,
    Polling,
}

impl ChannelKind {
    pub fn source(self) -> EventSource {
        match self {
            ChannelKind::Streaming => EventSource::Streaming,
            ChannelKind::Polling => EventSource::Polling,
        }
    }
}

/// Why a channel returned control to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelExit {
    /// A terminal event was emitted. The fold may still have rejected it.
    Completed,
    /// The stop token fired or the event sink went away.
    Stopped,
    /// The transport exhausted its budget.
    Unavailable { reason: String },
}

/// Everything a channel needs to observe one task.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub task_id: TaskId,
    pub events: mpsc::Sender<ProgressEvent>,
    pub transport: Arc<watch::Sender<TransportStatus>>,
    pub metrics: Arc<ObservationMetrics>,
    pub stop: CancellationToken,
    /// Last sequence already folded from this channel's source. Emitted
    /// sequences must start above it.
    pub resume_after: u64,
}

impl ChannelContext {
    pub fn set_transport(&self, status: TransportStatus) {
        self.transport.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Hand an event to the observer. Returns `false` once the observer is gone.
    pub async fn emit(&self, event: ProgressEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// A transport strategy that turns backend traffic into ordered progress events.
#[async_trait]
pub trait ProgressChannel: Send {
    fn kind(&self) -> ChannelKind;

    /// Observe `ctx.task_id` until a terminal event, a stop request, or budget exhaustion.
    async fn run(&mut self, ctx: ChannelContext) -> ChannelExit;
}
