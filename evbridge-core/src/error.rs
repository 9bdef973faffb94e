//! Bridge-level errors and the operational faults recorded from inside engine callbacks.

use std::fmt;

use crate::arena::TransferKey;
use crate::engine::{MultiCode, Socket};
use crate::reactor::ReactorError;

/// Reactor call issued by the socket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Add,
    Modify,
    Remove,
}

impl fmt::Display for WatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WatchOp::Add => "add",
            WatchOp::Modify => "modify",
            WatchOp::Remove => "remove",
        })
    }
}

/// A reactor call made on behalf of the socket table failed. The table is left as if the call
/// had no effect.
#[derive(Debug, thiserror::Error)]
#[error("{op} watch for socket {socket} failed: {source}")]
pub struct RegistrationError {
    pub socket: Socket,
    pub op: WatchOp,
    #[source]
    pub source: ReactorError,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge is already initialized")]
    AlreadyInitialized,
    #[error("bridge is not initialized")]
    NotInitialized,
    #[error("engine call `{op}` failed: {code} ({})", .code.name())]
    Engine { op: &'static str, code: MultiCode },
    #[error("reactor: {0}")]
    Reactor(#[from] ReactorError),
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferKey),
}

/// Diagnostic recorded while the bridge kept running. Drained by the host with
/// [`crate::Bridge::take_faults`].
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error("timer reprogram failed: {0}")]
    Timer(#[source] ReactorError),
    #[error("completed transfer carries no context")]
    MissingContext,
    #[error("completion for stale transfer {0}")]
    StaleTransfer(TransferKey),
    #[error("detach of transfer {key} failed: {code}")]
    Detach { key: TransferKey, code: MultiCode },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_names_code() {
        let err = BridgeError::Engine {
            op: "advance by socket",
            code: MultiCode::InternalError,
        };
        assert_eq!(
            err.to_string(),
            "engine call `advance by socket` failed: internal error (INTERNAL_ERROR)"
        );
    }

    #[test]
    fn registration_error_message() {
        let err = RegistrationError {
            socket: 9,
            op: WatchOp::Modify,
            source: ReactorError::NotWatched(9),
        };
        assert_eq!(
            err.to_string(),
            "modify watch for socket 9 failed: socket 9 is not watched"
        );
    }
}
