/*
[INPUT]:  WebSocket base URL and task id
[OUTPUT]: DuplexStream carrying raw progress frames for one task
[POS]:    WebSocket layer - real-time progress stream handling
[UPDATE]: When changing connection logic or the progress stream path
*/

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

use crate::http::client::segment_url;
use crate::http::{AdapterError, Result};
use crate::ws::stream::{DuplexStream, InboundFrame, StreamConnector};

const CHANNEL_CAPACITY: usize = 100;
const CONNECT_LOG_LIMIT: usize = 10;

static CONNECT_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// WebSocket connector for per-task progress streams
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
}

impl WsConnector {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "ws" | "wss") {
            return Err(AdapterError::Config(format!(
                "WebSocket URL must use ws:// or wss://, got {}",
                base_url.scheme()
            )));
        }
        Ok(Self { base_url })
    }

    /// Derive the WebSocket base from an HTTP base URL (`http` -> `ws`, `https` -> `wss`)
    pub fn from_http_base(http_base: &str) -> Result<Self> {
        let mut url = Url::parse(http_base)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(AdapterError::Config(format!(
                    "cannot derive WebSocket URL from scheme {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| AdapterError::Config(format!("cannot switch scheme to {scheme}")))?;
        Ok(Self { base_url: url })
    }

    /// Address of the progress stream for a task
    pub fn progress_url(&self, task_id: &str) -> Result<Url> {
        segment_url(&self.base_url, &["ws", "progress", task_id])
    }

    async fn connect_url(&self, url: Url) -> Result<DuplexStream> {
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| AdapterError::WebSocket(err.to_string()))?;
        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        log_connected(&url);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(text) => {
                                if let Err(err) = write.send(WsMessage::Text(text.into())).await {
                                    let _ = inbound_tx.send(InboundFrame::Error(err.to_string())).await;
                                    break;
                                }
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Close(frame))) => {
                                let reason = frame.map(|frame| frame.reason.as_str().to_string());
                                let _ = write.send(WsMessage::Close(None)).await;
                                let _ = inbound_tx.send(InboundFrame::Closed { reason }).await;
                                break;
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(WsMessage::Text(text))) => {
                                if inbound_tx.send(InboundFrame::Text(text.to_string())).await.is_err() {
                                    let _ = write.send(WsMessage::Close(None)).await;
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Binary(bytes))) => {
                                let text = String::from_utf8_lossy(&bytes).into_owned();
                                if inbound_tx.send(InboundFrame::Text(text)).await.is_err() {
                                    let _ = write.send(WsMessage::Close(None)).await;
                                    break;
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                let _ = inbound_tx.send(InboundFrame::Error(err.to_string())).await;
                                break;
                            }
                            None => {
                                let _ = inbound_tx.send(InboundFrame::Closed { reason: None }).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!("progress stream pump exited");
        });

        Ok(DuplexStream::new(outbound_tx, inbound_rx))
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, task_id: &str) -> Result<DuplexStream> {
        let url = self.progress_url(task_id)?;
        self.connect_url(url).await
    }
}

fn log_connected(url: &Url) {
    let count = CONNECT_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < CONNECT_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = CONNECT_LOG_LIMIT,
            url = %url,
            "ws progress stream connected"
        );
    } else {
        debug!(url = %url, "ws progress stream connected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_url() {
        let connector = WsConnector::new("ws://127.0.0.1:8000").unwrap();
        assert_eq!(
            connector.progress_url("T1").unwrap().as_str(),
            "ws://127.0.0.1:8000/ws/progress/T1"
        );
    }

    #[test]
    fn test_from_http_base() {
        let connector = WsConnector::from_http_base("https://dash.example.com").unwrap();
        assert_eq!(
            connector.progress_url("abc").unwrap().as_str(),
            "wss://dash.example.com/ws/progress/abc"
        );
        assert_eq!(
            connector.progress_url("a/b?c#d").unwrap().as_str(),
            "wss://dash.example.com/ws/progress/a%2Fb%3Fc%23d"
        );
        assert!(WsConnector::from_http_base("ftp://example.com").is_err());
        assert!(WsConnector::new("http://example.com").is_err());
    }
}
