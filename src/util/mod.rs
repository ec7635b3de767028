//! Shared helpers (error taxonomy, lock discipline).

pub mod error;

pub use error::{
    lock_or_poison, ConfigError, HttpError, NetError, PlatformError, PoolError, ProtocolError,
};
