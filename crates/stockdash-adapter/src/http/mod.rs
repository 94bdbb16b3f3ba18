/*
[INPUT]:  HTTP client configuration and API endpoints
[OUTPUT]: HTTP responses and typed API results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod tasks;

pub use error::{AdapterError, Result};
pub use tasks::TaskApi;

pub use client::{ClientConfig, DEFAULT_BASE_URL, DashboardClient};
