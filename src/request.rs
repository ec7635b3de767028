use crate::scope::Scope;
use serde::Serialize;
use std::time::Duration;

pub const STATUS_OK: u16 = 200;
pub const STATUS_INTERNAL_ERROR: u16 = 500;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Record attached to one in-flight request.
///
/// Created at the edge when the request enters the pipeline; timing fields
/// are only meaningful after the worker pool hands the record back. Once the
/// record reaches the feedback path it is read-only.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub scope: Scope,
    pub queueing_time: Duration,
    pub processing_time: Duration,
    pub total_time: Duration,
    /// Shared-queue depth observed at enqueue, including this request.
    pub queue_depth_at_dispatch: usize,
    pub workers_busy_at_dispatch: u32,
    pub status: u16,
}

impl RequestRecord {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            queueing_time: Duration::ZERO,
            processing_time: Duration::ZERO,
            total_time: Duration::ZERO,
            queue_depth_at_dispatch: 0,
            workers_busy_at_dispatch: 0,
            status: 0,
        }
    }

    /// Whether this request was shed at the edge. Denied requests must never
    /// feed the overload detector.
    pub fn denied(&self) -> bool {
        self.status == STATUS_TOO_MANY_REQUESTS
    }
}
