//! Tokio host for `evbridge-core`: a reactor over `AsyncFd` and local timers, the event loop that
//! feeds the bridge, and the config and logging setup a host process needs.

pub mod config;
pub mod driver;
pub mod logging;
pub mod reactor;

pub use driver::{block_on_local, run, shutdown_signal, RunSummary};
pub use reactor::TokioReactor;
