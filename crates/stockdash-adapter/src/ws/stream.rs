/*
[INPUT]:  Task id to observe, transport-specific connection pump
[OUTPUT]: DuplexStream handle (outbound text, inbound frames) behind StreamConnector
[POS]:    WebSocket layer - transport-neutral duplex primitive
[UPDATE]: When changing the duplex contract consumed by the tracker
*/

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::http::{AdapterError, Result};

/// One inbound event from a duplex connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Closed { reason: Option<String> },
    Error(String),
}

/// Opens duplex connections keyed by task id.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, task_id: &str) -> Result<DuplexStream>;
}

/// Handle to one open duplex connection.
///
/// Dropping the handle closes the connection: the pump sees the outbound
/// sender disappear and sends a close frame.
#[derive(Debug)]
pub struct DuplexStream {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<InboundFrame>,
}

impl DuplexStream {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<InboundFrame>) -> Self {
        Self { outbound, inbound }
    }

    /// Queue a text frame for sending.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.outbound
            .send(text.into())
            .await
            .map_err(|_| AdapterError::WebSocket("send channel closed".to_string()))
    }

    /// Next inbound frame; `None` once the pump has exited.
    pub async fn recv(&mut self) -> Option<InboundFrame> {
        self.inbound.recv().await
    }
}
