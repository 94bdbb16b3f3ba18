/*
[INPUT]:  Test scenarios needing a backend
[OUTPUT]: Scripted in-memory TaskApi + StreamConnector doubles
[POS]:    Integration test helpers
[UPDATE]: When the adapter traits change
*/

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use stockdash_adapter::{
    AdapterError, AnalysisRequest, CancelResponse, DuplexStream, InboundFrame, StreamConnector,
    SubmitResponse, TaskApi, TaskSnapshot, TaskStatus,
};
use stockdash_tracker::{TaskTracker, TrackerConfig};

pub fn snapshot(task_id: &str, status: TaskStatus, progress: f64) -> TaskSnapshot {
    let mut snapshot = TaskSnapshot::new(task_id, status);
    snapshot.progress = Some(progress);
    snapshot
}

#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Fail,
}

impl<T> Reply<T> {
    fn into_result(self) -> stockdash_adapter::Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Fail => Err(AdapterError::Api {
                code: 503,
                message: "service unavailable".to_string(),
            }),
        }
    }
}

/// Scripted backend. Progress replies are consumed per task; an empty script fails.
#[derive(Default)]
pub struct MockApi {
    submit: Mutex<Option<stockdash_adapter::Result<SubmitResponse>>>,
    progress: Mutex<HashMap<String, VecDeque<Reply<TaskSnapshot>>>>,
    active: Mutex<Vec<TaskSnapshot>>,
    cancel: Mutex<Option<stockdash_adapter::Result<CancelResponse>>>,
    pub submit_calls: AtomicUsize,
    pub progress_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_submit(&self, reply: stockdash_adapter::Result<SubmitResponse>) {
        *self.submit.lock().unwrap() = Some(reply);
    }

    pub fn accept_submit(&self, task_id: &str) {
        self.on_submit(Ok(SubmitResponse {
            task_id: task_id.to_string(),
            status: Some("pending".to_string()),
        }));
    }

    pub fn push_progress(&self, reply: Reply<TaskSnapshot>) {
        let task_id = match &reply {
            Reply::Ok(snapshot) => snapshot.task_id.clone(),
            Reply::Fail => String::new(),
        };
        self.progress
            .lock()
            .unwrap()
            .entry(task_id)
            .or_default()
            .push_back(reply);
    }

    pub fn set_active(&self, tasks: Vec<TaskSnapshot>) {
        *self.active.lock().unwrap() = tasks;
    }

    pub fn on_cancel(&self, reply: stockdash_adapter::Result<CancelResponse>) {
        *self.cancel.lock().unwrap() = Some(reply);
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskApi for MockApi {
    async fn submit_analysis(&self, _request: &AnalysisRequest) -> stockdash_adapter::Result<SubmitResponse> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submit
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AdapterError::WebSocket("no submit scripted".to_string())))
    }

    async fn task_progress(&self, task_id: &str) -> stockdash_adapter::Result<TaskSnapshot> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        self.progress
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Fail)
            .into_result()
    }

    async fn active_tasks(&self) -> stockdash_adapter::Result<Vec<TaskSnapshot>> {
        Ok(self.active.lock().unwrap().clone())
    }

    async fn cancel_task(&self, _task_id: &str) -> stockdash_adapter::Result<CancelResponse> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.lock().unwrap().take().unwrap_or_else(|| {
            Ok(CancelResponse {
                cancelled: true,
                message: None,
            })
        })
    }
}

/// Server half of one scripted streaming connection.
pub struct ServerEnd {
    pub to_client: mpsc::Sender<InboundFrame>,
    pub from_client: mpsc::Receiver<String>,
}

impl ServerEnd {
    pub async fn push(&self, json: &str) {
        self.to_client
            .send(InboundFrame::Text(json.to_string()))
            .await
            .expect("client side dropped");
    }

    pub async fn close(&self) {
        let _ = self.to_client.send(InboundFrame::Closed { reason: None }).await;
    }
}

enum Connect {
    Accept(DuplexStream),
    Refuse,
    Hang,
}

/// Connector whose connection attempts follow a script; an empty script refuses.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Connect>>,
    pub connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept(&self) -> ServerEnd {
        let (to_client, inbound) = mpsc::channel(32);
        let (outbound, from_client) = mpsc::channel(32);
        self.script
            .lock()
            .unwrap()
            .push_back(Connect::Accept(DuplexStream::new(outbound, inbound)));
        ServerEnd {
            to_client,
            from_client,
        }
    }

    pub fn refuse(&self) {
        self.script.lock().unwrap().push_back(Connect::Refuse);
    }

    pub fn hang(&self) {
        self.script.lock().unwrap().push_back(Connect::Hang);
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, _task_id: &str) -> stockdash_adapter::Result<DuplexStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Connect::Accept(stream)) => Ok(stream),
            Some(Connect::Hang) => std::future::pending().await,
            Some(Connect::Refuse) | None => {
                Err(AdapterError::WebSocket("connection refused".to_string()))
            }
        }
    }
}

pub fn tracker(api: &Arc<MockApi>, connector: &Arc<ScriptedConnector>, config: TrackerConfig) -> TaskTracker {
    TaskTracker::new(api.clone(), connector.clone(), config)
}
