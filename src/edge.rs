//! The simulated platform edge: accepts any amount of traffic, but its
//! response throughput is bottlenecked by the worker pool behind it.
//!
//! Request flow: parse scope from the path, consult the admission
//! controller, then either shed with 429 or block on the pool. Completed
//! and shed requests are queued onto the feedback channel; one logger
//! thread drains it into `log_access`, which keeps the analyzers'
//! mutable state on a single writer.

use crate::admission::AccessController;
use crate::net::{read_request, spawn_listener, write_json_response, ServerHandle, SimpleHttpRequest};
use crate::pool::WorkerPool;
use crate::request::{
    RequestRecord, STATUS_INTERNAL_ERROR, STATUS_OK, STATUS_TOO_MANY_REQUESTS,
};
use crate::scope::Scope;
use crate::telemetry::MetricsHandle;
use crate::timeouts::{EDGE_STREAM_TIMEOUT, SERVER_SHUTDOWN_GRACE};
use crate::util::error::{NetError, PoolError};
use log::{debug, error, info, warn};
use serde_json::json;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const FEEDBACK_QUEUE_CAPACITY: usize = 1000;

pub struct EdgeConfig {
    /// Cap on concurrent connection threads; `None` is unlimited.
    pub max_connections: Option<usize>,
    /// Artificial lag before a completed request reaches the feedback
    /// path, modeling telemetry delay.
    pub feedback_delay: Duration,
}

pub struct SimulationEdge;

impl SimulationEdge {
    pub fn start(
        listener: TcpListener,
        pool: Arc<WorkerPool>,
        controller: Arc<dyn AccessController>,
        config: EdgeConfig,
        metrics: MetricsHandle,
    ) -> Result<EdgeHandle, NetError> {
        let (feedback, completions) = sync_channel::<RequestRecord>(FEEDBACK_QUEUE_CAPACITY);

        let logger_controller = controller.clone();
        let logger = thread::spawn(move || {
            for record in completions {
                logger_controller.log_access(&record);
            }
            debug!("event=edge_logger_stopped");
        });

        let addr = listener.local_addr()?;
        let handler_metrics = metrics.clone();
        let server = spawn_listener("edge", listener, config.max_connections, move |stream, _addr, _shutdown| {
            handle_connection(
                stream,
                &pool,
                controller.as_ref(),
                &feedback,
                config.feedback_delay,
                &handler_metrics,
            )
        })?;

        info!("event=edge_started addr={addr}");
        Ok(EdgeHandle {
            server: Some(server),
            logger: Some(logger),
        })
    }
}

fn handle_connection(
    mut stream: TcpStream,
    pool: &Arc<WorkerPool>,
    controller: &dyn AccessController,
    feedback: &SyncSender<RequestRecord>,
    feedback_delay: Duration,
    metrics: &MetricsHandle,
) -> Result<(), NetError> {
    stream.set_read_timeout(Some(EDGE_STREAM_TIMEOUT))?;
    stream.set_write_timeout(Some(EDGE_STREAM_TIMEOUT))?;
    let request = read_request(&mut stream)?;

    if request.method != "GET" {
        return write_json_response(&mut stream, 405, &json!({"error": "method not allowed"}));
    }
    let scope = match parse_scope(&request) {
        Ok(scope) => scope,
        Err(RouteError::UnknownPath) => {
            return write_json_response(&mut stream, 404, &json!({"error": "not found"}));
        }
        Err(RouteError::MalformedScope) => {
            // A bad tenant id stays local to this request; it must never
            // reach the worker pool or the load signal.
            warn!("event=edge_malformed_scope path={}", request.path);
            metrics.inc_counter("edge.malformed", 1);
            return write_json_response(
                &mut stream,
                STATUS_INTERNAL_ERROR,
                &json!({"error": "unable to parse tenant id"}),
            );
        }
    };

    let mut record = RequestRecord::new(scope);
    if !controller.allow_access(&record) {
        record.status = STATUS_TOO_MANY_REQUESTS;
        metrics.inc_counter("edge.dropped", 1);
        metrics.inc_counter(&format!("edge.dropped.{scope}"), 1);
        publish_feedback(record, feedback, feedback_delay, metrics);
        return write_json_response(
            &mut stream,
            STATUS_TOO_MANY_REQUESTS,
            &json!({"error": "too many requests"}),
        );
    }
    metrics.inc_counter("edge.passed", 1);
    metrics.inc_counter(&format!("edge.passed.{scope}"), 1);

    let mut record = match pool.serve(record) {
        Ok(record) => record,
        Err(PoolError::QueueClosed) | Err(PoolError::Cancelled) => {
            // Expected while the platform drains; not an application error.
            debug!("event=edge_pool_draining scope={scope}");
            return write_json_response(&mut stream, 503, &json!({"error": "shutting down"}));
        }
        Err(err) => {
            error!("event=edge_serve_failed scope={scope} error={err}");
            return write_json_response(
                &mut stream,
                STATUS_INTERNAL_ERROR,
                &json!({"error": "internal error"}),
            );
        }
    };
    record.status = STATUS_OK;
    metrics.observe_duration("request.processing_time", record.processing_time);
    metrics.observe_duration("request.queueing_time", record.queueing_time);
    metrics.inc_counter("request.count", 1);

    let response = json!({
        "tenant_id": scope.tenant_id,
        "queueing_ms": record.queueing_time.as_millis() as u64,
        "processing_ms": record.processing_time.as_millis() as u64,
    });
    publish_feedback(record, feedback, feedback_delay, metrics);
    write_json_response(&mut stream, STATUS_OK, &response)
}

enum RouteError {
    UnknownPath,
    MalformedScope,
}

fn parse_scope(request: &SimpleHttpRequest) -> Result<Scope, RouteError> {
    match request.path_segments().as_slice() {
        ["shop", raw_id] => raw_id
            .parse::<u64>()
            .map(Scope::new)
            .map_err(|_| RouteError::MalformedScope),
        _ => Err(RouteError::UnknownPath),
    }
}

/// Hands a finished record to the feedback path. The channel is bounded;
/// when the logger falls behind we drop the sample rather than stall the
/// serving path.
fn publish_feedback(
    record: RequestRecord,
    feedback: &SyncSender<RequestRecord>,
    delay: Duration,
    metrics: &MetricsHandle,
) {
    if delay.is_zero() {
        if let Err(TrySendError::Full(_)) = feedback.try_send(record) {
            metrics.inc_counter("feedback.dropped", 1);
        }
        return;
    }
    let feedback = feedback.clone();
    let metrics = metrics.clone();
    thread::spawn(move || {
        thread::sleep(delay);
        if let Err(TrySendError::Full(_)) = feedback.try_send(record) {
            metrics.inc_counter("feedback.dropped", 1);
        }
    });
}

pub struct EdgeHandle {
    server: Option<ServerHandle>,
    logger: Option<thread::JoinHandle<()>>,
}

impl EdgeHandle {
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.as_ref().map(|server| server.local_addr())
    }

    /// Stops accepting, then waits for the feedback logger to drain.
    pub fn shutdown(&mut self) {
        if let Some(mut server) = self.server.take() {
            if let Err(err) = server.try_shutdown(SERVER_SHUTDOWN_GRACE) {
                warn!("event=edge_shutdown_timeout error={err}");
            }
        }
        if let Some(logger) = self.logger.take() {
            let _ = logger.join();
        }
    }
}

impl Drop for EdgeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
