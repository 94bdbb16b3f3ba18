/*
[INPUT]:  StreamConnector + streaming settings (connect timeout, heartbeat, reconnect budget)
[OUTPUT]: Ordered ProgressEvents for one task + Connecting/Open/Degraded transitions
[POS]:    Transport layer - preferred push channel
[UPDATE]: When changing heartbeat, reconnection backoff, or frame handling
*/

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use stockdash_adapter::{
    DuplexStream, HEARTBEAT_SENTINEL, InboundFrame, ServerFrame, StreamConnector, decode_frame,
};

use super::{ChannelContext, ChannelExit, ChannelKind, ProgressChannel, TransportStatus};
use crate::backoff::Backoff;
use crate::config::StreamingConfig;
use crate::event::{EventSource, ProgressEvent};

const MALFORMED_LOG_LIMIT: u64 = 10;

/// WebSocket-style push channel with heartbeat and bounded reconnection.
pub struct StreamingChannel {
    connector: Arc<dyn StreamConnector>,
    settings: StreamingConfig,
    next_sequence: u64,
    /// Highest server `seq` seen on the current connection.
    connection_seq: Option<u64>,
    malformed: u64,
}

#[derive(Debug)]
enum PumpExit {
    Terminal,
    Stopped,
    Lost(String),
}

enum FrameOutcome {
    Continue,
    Terminal,
    SinkClosed,
}

impl StreamingChannel {
    pub fn new(connector: Arc<dyn StreamConnector>, settings: StreamingConfig) -> Self {
        Self {
            connector,
            settings,
            next_sequence: 0,
            connection_seq: None,
            malformed: 0,
        }
    }

    async fn connect(&self, ctx: &ChannelContext) -> Result<DuplexStream, String> {
        let connect_timeout = self.settings.connect_timeout();
        let attempt = tokio::time::timeout(
            connect_timeout,
            self.connector.connect(ctx.task_id.as_str()),
        );
        match attempt.await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("connect timed out after {connect_timeout:?}")),
        }
    }

    async fn pump(&mut self, ctx: &ChannelContext, mut stream: DuplexStream) -> PumpExit {
        let interval = self.settings.heartbeat_interval();
        let grace = self.settings.heartbeat_grace();
        // Servers restart `seq` per connection.
        self.connection_seq = None;

        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let liveness = tokio::time::sleep(grace);
        tokio::pin!(liveness);

        loop {
            tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => return PumpExit::Stopped,
                frame = stream.recv() => {
                    match frame {
                        Some(InboundFrame::Text(text)) => {
                            liveness.as_mut().reset(Instant::now() + grace);
                            match self.handle_text(ctx, &text).await {
                                FrameOutcome::Continue => {}
                                FrameOutcome::Terminal => return PumpExit::Terminal,
                                FrameOutcome::SinkClosed => return PumpExit::Stopped,
                            }
                        }
                        Some(InboundFrame::Closed { reason }) => {
                            return PumpExit::Lost(format!(
                                "closed by server: {}",
                                reason.unwrap_or_else(|| "no reason".to_string())
                            ));
                        }
                        Some(InboundFrame::Error(err)) => return PumpExit::Lost(err),
                        None => return PumpExit::Lost("stream ended".to_string()),
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = stream.send_text(HEARTBEAT_SENTINEL).await {
                        return PumpExit::Lost(err.to_string());
                    }
                    ctx.metrics.record_heartbeat();
                    trace!(task_id = %ctx.task_id, "heartbeat sent");
                }
                _ = &mut liveness => {
                    return PumpExit::Lost(format!("no inbound traffic within {grace:?}"));
                }
            }
        }
    }

    async fn handle_text(&mut self, ctx: &ChannelContext, text: &str) -> FrameOutcome {
        let mut snapshot = match decode_frame(text) {
            Ok(ServerFrame::Pong) => {
                trace!(task_id = %ctx.task_id, "heartbeat acknowledged");
                return FrameOutcome::Continue;
            }
            Ok(ServerFrame::Progress(snapshot)) => snapshot,
            Err(err) => {
                self.malformed += 1;
                ctx.metrics.record_malformed_frame();
                if self.malformed <= MALFORMED_LOG_LIMIT {
                    warn!(
                        task_id = %ctx.task_id,
                        sample_index = self.malformed,
                        sample_limit = MALFORMED_LOG_LIMIT,
                        error = %err,
                        "dropping malformed progress frame"
                    );
                } else {
                    debug!(task_id = %ctx.task_id, error = %err, "dropping malformed progress frame");
                }
                return FrameOutcome::Continue;
            }
        };

        if snapshot.task_id != ctx.task_id.as_str() {
            debug!(
                task_id = %ctx.task_id,
                frame_task_id = %snapshot.task_id,
                "dropping frame for another task"
            );
            return FrameOutcome::Continue;
        }

        if let Some(seq) = snapshot.seq.take() {
            if self.connection_seq.is_some_and(|last| seq <= last) {
                debug!(task_id = %ctx.task_id, seq, "dropping replayed frame");
                return FrameOutcome::Continue;
            }
            self.connection_seq = Some(seq);
        }

        self.next_sequence += 1;
        let event = ProgressEvent::from_snapshot(snapshot, EventSource::Streaming, self.next_sequence);
        let terminal = event.is_terminal();
        if !ctx.emit(event).await {
            return FrameOutcome::SinkClosed;
        }
        if terminal {
            FrameOutcome::Terminal
        } else {
            FrameOutcome::Continue
        }
    }
}

#[async_trait]
impl ProgressChannel for StreamingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Streaming
    }

    async fn run(&mut self, ctx: ChannelContext) -> ChannelExit {
        let backoff = Backoff::new(
            self.settings.reconnect_base_delay(),
            self.settings.reconnect_max_delay(),
        );
        let max_attempts = self.settings.max_reconnect_attempts;
        self.next_sequence = self.next_sequence.max(ctx.resume_after);
        let mut opened = false;
        let mut attempt: u32 = 0;

        loop {
            if ctx.stop.is_cancelled() {
                return ChannelExit::Stopped;
            }

            if attempt == 0 {
                ctx.set_transport(TransportStatus::Connecting);
            } else {
                if attempt > max_attempts {
                    warn!(task_id = %ctx.task_id, max_attempts, "reconnection budget exhausted");
                    return ChannelExit::Unavailable {
                        reason: format!("reconnection budget of {max_attempts} attempts exhausted"),
                    };
                }
                ctx.set_transport(TransportStatus::Degraded { attempt });
                ctx.metrics.record_reconnect_attempt();
                let delay = backoff.delay(attempt);
                debug!(task_id = %ctx.task_id, attempt, ?delay, "scheduling reconnection");
                tokio::select! {
                    _ = ctx.stop.cancelled() => return ChannelExit::Stopped,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let stream = tokio::select! {
                _ = ctx.stop.cancelled() => return ChannelExit::Stopped,
                connected = self.connect(&ctx) => connected,
            };

            match stream {
                Ok(stream) => {
                    if attempt > 0 {
                        info!(task_id = %ctx.task_id, attempt, "progress stream reconnected");
                    }
                    opened = true;
                    attempt = 0;
                    ctx.set_transport(TransportStatus::Open);

                    match self.pump(&ctx, stream).await {
                        PumpExit::Terminal => return ChannelExit::Completed,
                        PumpExit::Stopped => return ChannelExit::Stopped,
                        PumpExit::Lost(reason) => {
                            warn!(task_id = %ctx.task_id, %reason, "progress stream degraded");
                            attempt = 1;
                            ctx.set_transport(TransportStatus::Degraded { attempt });
                        }
                    }
                }
                Err(reason) if !opened => {
                    warn!(task_id = %ctx.task_id, %reason, "progress stream failed to open");
                    return ChannelExit::Unavailable { reason };
                }
                Err(reason) => {
                    warn!(task_id = %ctx.task_id, attempt, %reason, "reconnection attempt failed");
                    attempt += 1;
                }
            }
        }
    }
}
