//! The admission-control contract between the transport edge and the load
//! analyzers.

use crate::request::RequestRecord;
use crate::telemetry::MetricsHandle;
use std::time::Instant;

/// A load-analysis policy: decides admission and digests completed-request
/// feedback. Time is injected so policies stay deterministic under test.
pub trait LoadAnalyzer: Send + Sync {
    fn allow_access_at(&self, record: &RequestRecord, now: Instant) -> bool;
    fn analyze_request_at(&self, record: &RequestRecord, now: Instant);
}

/// The single contract the transport layer consumes.
///
/// `allow_access` runs on every connection thread and must be cheap and
/// concurrent; `log_access` is invoked once per finished request from the
/// feedback path.
pub trait AccessController: Send + Sync {
    fn allow_access(&self, record: &RequestRecord) -> bool;
    fn log_access(&self, record: &RequestRecord);
}

/// Admits everything and learns nothing. Used when load control is
/// disabled so the rest of the pipeline is unchanged.
pub struct PassthroughController;

impl AccessController for PassthroughController {
    fn allow_access(&self, _record: &RequestRecord) -> bool {
        true
    }

    fn log_access(&self, _record: &RequestRecord) {}
}

/// Couples an analyzer's admission gate with its feedback path.
pub struct GatedController {
    analyzer: Box<dyn LoadAnalyzer>,
    metrics: MetricsHandle,
}

impl GatedController {
    pub fn new(analyzer: Box<dyn LoadAnalyzer>, metrics: MetricsHandle) -> Self {
        Self { analyzer, metrics }
    }
}

impl AccessController for GatedController {
    fn allow_access(&self, record: &RequestRecord) -> bool {
        let allowed = self.analyzer.allow_access_at(record, Instant::now());
        if allowed {
            self.metrics.inc_counter("admission.allowed", 1);
        } else {
            self.metrics.inc_counter("admission.denied", 1);
        }
        allowed
    }

    fn log_access(&self, record: &RequestRecord) {
        // Requests shed at the edge never feed the load signal.
        if record.denied() {
            return;
        }
        self.analyzer.analyze_request_at(record, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::STATUS_TOO_MANY_REQUESTS;
    use crate::scope::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAnalyzer {
        analyzed: Arc<AtomicUsize>,
    }

    impl LoadAnalyzer for CountingAnalyzer {
        fn allow_access_at(&self, _record: &RequestRecord, _now: Instant) -> bool {
            true
        }

        fn analyze_request_at(&self, _record: &RequestRecord, _now: Instant) {
            self.analyzed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn denied_requests_never_reach_the_analyzer() {
        let analyzed = Arc::new(AtomicUsize::new(0));
        let controller = GatedController::new(
            Box::new(CountingAnalyzer {
                analyzed: analyzed.clone(),
            }),
            MetricsHandle::default(),
        );

        let mut denied = RequestRecord::new(Scope::new(1));
        denied.status = STATUS_TOO_MANY_REQUESTS;
        controller.log_access(&denied);

        let mut completed = RequestRecord::new(Scope::new(1));
        completed.status = 200;
        controller.log_access(&completed);

        assert_eq!(analyzed.load(Ordering::SeqCst), 1);
    }
}
