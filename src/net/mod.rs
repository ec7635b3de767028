//! Blocking HTTP/1.1 plumbing for the simulation edge: a minimal parser, a
//! response writer, and a thread-per-connection accept loop with a bounded
//! shutdown.

mod http;
mod server;

pub use http::{read_request, write_json_response, write_response, SimpleHttpRequest};
pub use server::{spawn_listener, ServerHandle};
