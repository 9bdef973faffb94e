//! Event bridge between a non-blocking multi-transfer engine and a host reactor.
//! Host-driven: no I/O of its own; the host feeds reactor events in and receives completions.

pub mod arena;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod reactor;
pub mod sockets;
pub mod timer;
pub mod transfer;

#[cfg(test)]
mod mock;

pub use arena::{Arena, TransferKey};
pub use bridge::{Bridge, BridgeSlot, BridgeStats, Teardown};
pub use config::BridgeConfig;
pub use engine::{
    Completed, Direction, EngineHooks, MultiCode, Rejected, Socket, SocketInterest, TransferCode,
    TransferEngine,
};
pub use error::{BridgeError, Fault, RegistrationError, WatchOp};
pub use reactor::{EventMask, Reactor, ReactorError, ReactorEvent, TimerId};
pub use sockets::{Registration, SocketTable, TableChange};
pub use timer::TimerSlot;
pub use transfer::{AbortedTransfer, Completion, ErrorBuffer, TransferContext};
