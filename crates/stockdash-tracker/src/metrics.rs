/*
[INPUT]:  Fold outcomes and channel activity for one observed task
[OUTPUT]: Snapshot-friendly observation counters
[POS]:    Shared runtime metrics between the observer, its channels and callers
[UPDATE]: When adding/removing observation signals
*/

use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::{FoldOutcome, FoldRejection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservationMetricsSnapshot {
    pub applied: u64,
    pub unchanged: u64,
    pub rejected: u64,
    pub protocol_violations: u64,
    pub malformed_frames: u64,
    pub heartbeats_sent: u64,
    pub reconnect_attempts: u64,
    pub fallbacks: u64,
    pub poll_failures: u64,
}

#[derive(Debug, Default)]
pub struct ObservationMetrics {
    applied: AtomicU64,
    unchanged: AtomicU64,
    rejected: AtomicU64,
    protocol_violations: AtomicU64,
    malformed_frames: AtomicU64,
    heartbeats_sent: AtomicU64,
    reconnect_attempts: AtomicU64,
    fallbacks: AtomicU64,
    poll_failures: AtomicU64,
}

impl ObservationMetrics {
    pub fn snapshot(&self) -> ObservationMetricsSnapshot {
        ObservationMetricsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }

    pub fn record_fold(&self, result: &Result<FoldOutcome, FoldRejection>) {
        match result {
            Ok(FoldOutcome::Applied) => bump(&self.applied),
            Ok(FoldOutcome::Unchanged) => bump(&self.unchanged),
            Err(rejection) => {
                bump(&self.rejected);
                if rejection.is_protocol_violation() {
                    bump(&self.protocol_violations);
                }
            }
        }
    }

    pub fn record_malformed_frame(&self) {
        bump(&self.malformed_frames);
    }

    pub fn record_heartbeat(&self) {
        bump(&self.heartbeats_sent);
    }

    pub fn record_reconnect_attempt(&self) {
        bump(&self.reconnect_attempts);
    }

    pub fn record_fallback(&self) {
        bump(&self.fallbacks);
    }

    pub fn record_poll_failure(&self) {
        bump(&self.poll_failures);
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockdash_adapter::TaskStatus;

    #[test]
    fn metrics_split_rejections_by_kind() {
        let metrics = ObservationMetrics::default();
        metrics.record_fold(&Ok(FoldOutcome::Applied));
        metrics.record_fold(&Ok(FoldOutcome::Unchanged));
        metrics.record_fold(&Err(FoldRejection::StatusRegression {
            from: TaskStatus::Running,
            to: TaskStatus::Pending,
        }));
        metrics.record_fold(&Err(FoldRejection::Stale {
            origin: crate::event::EventSource::Polling,
            sequence: 1,
            last: 1,
        }));
        metrics.record_malformed_frame();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.applied, 1);
        assert_eq!(snapshot.unchanged, 1);
        assert_eq!(snapshot.rejected, 2);
        assert_eq!(snapshot.protocol_violations, 1);
        assert_eq!(snapshot.malformed_frames, 1);
        assert_eq!(snapshot.fallbacks, 0);
    }
}
