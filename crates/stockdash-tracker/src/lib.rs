/*
[INPUT]:  Public API exports for stockdash-tracker crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
mod observer;
pub mod registry;
pub mod state;
pub mod subscription;
pub mod tracker;

// Re-export main types for convenience
pub use channel::{ChannelContext, ChannelExit, ChannelKind, ProgressChannel, TransportStatus};
pub use config::TrackerConfig;
pub use error::{SubmissionError, TrackerError};
pub use event::{EventSource, ProgressEvent};
pub use metrics::ObservationMetricsSnapshot;
pub use registry::{ActiveSnapshot, ActiveTaskRegistry};
pub use state::{FoldOutcome, FoldRejection, TaskId, TaskState};
pub use subscription::TaskSubscription;
pub use tracker::{BackendAck, CancelOutcome, TaskTracker};
