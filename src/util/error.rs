use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

/// Failures while reading or writing a single HTTP exchange.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed before request headers were complete")]
    ConnectionClosedBeforeHeaders,
    #[error("request headers exceed maximum size")]
    HeadersTooLarge,
    #[error("incomplete HTTP request")]
    PartialRequest,
    #[error("malformed HTTP request: {0}")]
    RequestParse(#[from] httparse::Error),
    #[error("request line missing method")]
    MissingMethod,
    #[error("request line missing path")]
    MissingPath,
    #[error("timed out reading request")]
    RequestTimeout,
    #[error("timed out writing response")]
    ResponseTimeout,
    #[error("failed to format response head")]
    ResponseFormat,
    #[error("failed to serialize response body: {0}")]
    JsonSerialize(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("lock poisoned: {context}")]
    Poisoned { context: &'static str },
    #[error("server {context} did not stop within its shutdown grace period")]
    ShutdownTimeout { context: &'static str },
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Worker-pool failures. `QueueClosed` and `Cancelled` are expected during
/// graceful shutdown and must not be logged as application errors.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("work queue is closed")]
    QueueClosed,
    #[error("rate limiter wait was cancelled")]
    Cancelled,
    #[error("worker dropped the request without completing it")]
    WorkerGone,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Locks a mutex, mapping poisoning to a typed error instead of a panic.
pub fn lock_or_poison<'a, T>(
    mutex: &'a std::sync::Mutex<T>,
    context: &'static str,
) -> Result<std::sync::MutexGuard<'a, T>, ProtocolError> {
    mutex.lock().map_err(|_| ProtocolError::Poisoned { context })
}
