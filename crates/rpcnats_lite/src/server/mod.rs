//! Server-side types for rpcnats_lite.
//!
//! This module contains the `KeepAliveSubscriber` and the per-message
//! dispatch wrapper that turns handler outcomes into response envelopes.

mod config;
mod handler;
mod panic_site;
mod session;
mod supervisor;
mod watcher;

pub use config::{DEFAULT_POLL_INTERVAL, DEFAULT_SETTLE_DELAY, SupervisorConfig};
pub use handler::{Handler, HandlerFuture, handler_fn, invoke};
pub use supervisor::{
    CycleOutcome, KeepAliveSubscriber, SupervisorState, SupervisorStats, keep_alive_subscribe,
};
pub use watcher::watch;
