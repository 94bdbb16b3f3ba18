/*
[INPUT]:  Caller-supplied analysis job parameters
[OUTPUT]: Validated request bodies for job submission
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When the analysis job schema changes
*/

use serde::{Deserialize, Serialize};

const MAX_STOCK_CODE_LEN: usize = 16;

/// Body of a stock analysis submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub stock_code: String,
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,
}

impl AnalysisRequest {
    pub fn new(stock_code: impl Into<String>) -> Self {
        Self {
            stock_code: stock_code.into(),
            period: default_period(),
            agents: None,
        }
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = period.into();
        self
    }

    pub fn with_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agents = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    /// Check the request locally before it is sent.
    pub fn validate(&self) -> Result<(), String> {
        let code = self.stock_code.trim();
        if code.is_empty() {
            return Err("stock_code must not be empty".to_string());
        }
        if code.len() > MAX_STOCK_CODE_LEN {
            return Err(format!(
                "stock_code longer than {MAX_STOCK_CODE_LEN} characters"
            ));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(format!("stock_code contains invalid characters: {code}"));
        }
        if self.period.trim().is_empty() {
            return Err("period must not be empty".to_string());
        }
        if let Some(agents) = &self.agents {
            if agents.is_empty() {
                return Err("agents must not be an empty list".to_string());
            }
            if agents.iter().any(|agent| agent.trim().is_empty()) {
                return Err("agent names must not be blank".to_string());
            }
        }
        Ok(())
    }
}

fn default_period() -> String {
    "1y".to_string()
}
