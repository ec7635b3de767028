use crate::timeouts::SERVER_SHUTDOWN_GRACE;
use crate::util::error::{NetError, ProtocolError};
use log::{error, warn};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

/// Condvar-backed flag the accept loop raises when it exits, so shutdown
/// can wait with a bound instead of joining blindly.
struct AcceptLoopState {
    done: Mutex<bool>,
    stopped: Condvar,
}

impl AcceptLoopState {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            stopped: Condvar::new(),
        }
    }

    fn mark_stopped(&self) {
        if let Ok(mut done) = self.done.lock() {
            *done = true;
        }
        self.stopped.notify_all();
    }

    fn wait_for_stop(&self, timeout: Duration, name: &'static str) -> Result<(), NetError> {
        let guard = self
            .done
            .lock()
            .map_err(|_| ProtocolError::Poisoned { context: "accept loop state" })?;
        let (done, _timed_out) = self
            .stopped
            .wait_timeout_while(guard, timeout, |done| !*done)
            .map_err(|_| ProtocolError::Poisoned { context: "accept loop state" })?;
        if *done {
            Ok(())
        } else {
            Err(ProtocolError::ShutdownTimeout { context: name }.into())
        }
    }
}

/// Caps concurrent connection threads; acquisitions beyond the limit are
/// rejected at accept time.
struct ConnectionLimiter {
    active: AtomicUsize,
    limit: usize,
}

impl ConnectionLimiter {
    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        loop {
            let current = self.active.load(Ordering::Relaxed);
            if current >= self.limit {
                return None;
            }
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(ConnectionPermit {
                    limiter: self.clone(),
                });
            }
        }
    }
}

struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.active.fetch_sub(1, Ordering::Release);
    }
}

pub struct ServerHandle {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    accept_join: Option<thread::JoinHandle<()>>,
    state: Arc<AcceptLoopState>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn try_shutdown(&mut self, timeout: Duration) -> Result<(), NetError> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.accept_join.take() {
            self.state.wait_for_stop(timeout, self.name)?;
            if join.join().is_err() {
                warn!("event=server_accept_loop_panic name={}", self.name);
            }
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.try_shutdown(SERVER_SHUTDOWN_GRACE);
    }
}

/// Spawns a nonblocking accept loop that hands each connection to its own
/// thread running `handler`. Connection threads are detached; they hold no
/// state beyond the stream and observe the shared shutdown flag.
pub fn spawn_listener<F>(
    name: &'static str,
    listener: TcpListener,
    max_connections: Option<usize>,
    handler: F,
) -> Result<ServerHandle, NetError>
where
    F: Fn(TcpStream, SocketAddr, Arc<AtomicBool>) -> Result<(), NetError> + Send + Sync + 'static,
{
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler = Arc::new(handler);
    let limiter = max_connections.map(|limit| {
        Arc::new(ConnectionLimiter {
            active: AtomicUsize::new(0),
            limit,
        })
    });
    let state = Arc::new(AcceptLoopState::new());

    let accept_shutdown = shutdown.clone();
    let accept_state = state.clone();
    let accept_join = thread::spawn(move || {
        while !accept_shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let permit = match limiter.as_ref() {
                        Some(limiter) => match limiter.try_acquire() {
                            Some(permit) => Some(permit),
                            None => {
                                warn!(
                                    "event={name}_connection_rejected addr={addr} reason=too_many_connections"
                                );
                                continue;
                            }
                        },
                        None => None,
                    };
                    let handler = handler.clone();
                    let shutdown = accept_shutdown.clone();
                    thread::spawn(move || {
                        let _permit = permit;
                        if let Err(err) = handler(stream, addr, shutdown) {
                            warn!("event={name}_connection_error addr={addr} error={err}");
                        }
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(err) => {
                    error!("event={name}_accept_error error={err}");
                    break;
                }
            }
        }
        accept_state.mark_stopped();
    });

    Ok(ServerHandle {
        name,
        shutdown,
        accept_join: Some(accept_join),
        state,
        local_addr,
    })
}
