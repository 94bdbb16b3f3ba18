/*
[INPUT]:  Analysis job parameters and task identifiers
[OUTPUT]: Task ids, task snapshots, active task listings, cancellation acks
[POS]:    HTTP layer - analysis task endpoints
[UPDATE]: When task endpoints change path or payload shape
*/

use crate::http::{DashboardClient, Result};
use crate::types::{AnalysisRequest, CancelResponse, SubmitResponse, TaskSnapshot};
use async_trait::async_trait;
use reqwest::Method;
use uuid::Uuid;

/// Request/response surface the task tracker depends on.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn submit_analysis(&self, request: &AnalysisRequest) -> Result<SubmitResponse>;

    async fn task_progress(&self, task_id: &str) -> Result<TaskSnapshot>;

    async fn active_tasks(&self) -> Result<Vec<TaskSnapshot>>;

    async fn cancel_task(&self, task_id: &str) -> Result<CancelResponse>;
}

impl DashboardClient {
    /// Submit an asynchronous stock analysis job
    ///
    /// POST /api/v1/stock/analyze-async
    pub async fn submit_analysis(&self, request: &AnalysisRequest) -> Result<SubmitResponse> {
        let builder = self
            .request(Method::POST, "/api/v1/stock/analyze-async")?
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(request);
        self.send_json(builder).await
    }

    /// Query the current progress record of a task
    ///
    /// GET /api/v1/tasks/{task_id}/progress
    pub async fn task_progress(&self, task_id: &str) -> Result<TaskSnapshot> {
        let builder =
            self.request_segments(Method::GET, &["api", "v1", "tasks", task_id, "progress"])?;
        self.send_json(builder).await
    }

    /// List every task the backend considers pending or running
    ///
    /// GET /api/v1/tasks/active
    pub async fn active_tasks(&self) -> Result<Vec<TaskSnapshot>> {
        let builder = self.request(Method::GET, "/api/v1/tasks/active")?;
        self.send_json(builder).await
    }

    /// Ask the backend to stop a task
    ///
    /// POST /api/v1/tasks/{task_id}/cancel
    pub async fn cancel_task(&self, task_id: &str) -> Result<CancelResponse> {
        let builder =
            self.request_segments(Method::POST, &["api", "v1", "tasks", task_id, "cancel"])?;
        self.send_json(builder).await
    }
}

#[async_trait]
impl TaskApi for DashboardClient {
    async fn submit_analysis(&self, request: &AnalysisRequest) -> Result<SubmitResponse> {
        DashboardClient::submit_analysis(self, request).await
    }

    async fn task_progress(&self, task_id: &str) -> Result<TaskSnapshot> {
        DashboardClient::task_progress(self, task_id).await
    }

    async fn active_tasks(&self) -> Result<Vec<TaskSnapshot>> {
        DashboardClient::active_tasks(self).await
    }

    async fn cancel_task(&self, task_id: &str) -> Result<CancelResponse> {
        DashboardClient::cancel_task(self, task_id).await
    }
}
