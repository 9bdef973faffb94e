//! Engine capability set: what the bridge needs from the multi-transfer engine.
//!
//! The engine never polls. It tells the bridge which sockets it cares about and how long it may
//! sleep, through the [`EngineHooks`] sink handed to every entry point that can call back.

use std::fmt;

use crate::arena::TransferKey;

/// Socket descriptor as the engine and the reactor see it.
#[cfg(unix)]
pub type Socket = std::os::fd::RawFd;
/// Socket descriptor as the engine and the reactor see it.
#[cfg(windows)]
pub type Socket = std::os::windows::io::RawSocket;

/// Readiness direction passed to [`TransferEngine::advance_by_socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// What the engine wants for a socket (the "what" of its socket callback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketInterest {
    /// Keep the socket known but wait for nothing.
    Idle,
    In,
    Out,
    InOut,
    /// Stop watching the socket.
    Remove,
}

impl SocketInterest {
    pub fn wants_read(self) -> bool {
        matches!(self, SocketInterest::In | SocketInterest::InOut)
    }

    pub fn wants_write(self) -> bool {
        matches!(self, SocketInterest::Out | SocketInterest::InOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SocketInterest::Idle => "none",
            SocketInterest::In => "IN",
            SocketInterest::Out => "OUT",
            SocketInterest::InOut => "INOUT",
            SocketInterest::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for SocketInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes of the engine's multi-level API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MultiCode {
    #[error("bad multi handle")]
    BadHandle,
    #[error("bad easy handle")]
    BadEasyHandle,
    #[error("out of memory")]
    OutOfMemory,
    #[error("internal error")]
    InternalError,
    #[error("bad socket")]
    BadSocket,
    #[error("unknown option")]
    UnknownOption,
    #[error("unknown multi code {0}")]
    Unknown(i32),
}

impl MultiCode {
    /// Advisory codes are logged and ignored. Only a bad-socket report qualifies: it shows up
    /// when a readiness event for an already-removed socket races the removal.
    pub fn is_advisory(self) -> bool {
        matches!(self, MultiCode::BadSocket)
    }

    pub fn name(self) -> &'static str {
        match self {
            MultiCode::BadHandle => "BAD_HANDLE",
            MultiCode::BadEasyHandle => "BAD_EASY_HANDLE",
            MultiCode::OutOfMemory => "OUT_OF_MEMORY",
            MultiCode::InternalError => "INTERNAL_ERROR",
            MultiCode::BadSocket => "BAD_SOCKET",
            MultiCode::UnknownOption => "UNKNOWN_OPTION",
            MultiCode::Unknown(_) => "unknown",
        }
    }
}

/// Per-transfer result code. Zero is success; anything else is a failure inside that transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferCode(pub i32);

impl TransferCode {
    pub const OK: TransferCode = TransferCode(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransferCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the engine's completed-transfer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completed {
    pub result: TransferCode,
    /// Key stored with [`TransferEngine::set_opaque_context`], read back through the engine's own
    /// accessor. `None` if the engine has no association for the finished transfer.
    pub key: Option<TransferKey>,
}

/// A value the engine refused, handed back with the reason.
#[derive(Debug)]
pub struct Rejected<T> {
    pub value: T,
    pub code: MultiCode,
}

impl<T> Rejected<T> {
    pub fn new(value: T, code: MultiCode) -> Self {
        Self { value, code }
    }
}

/// Callbacks the engine invokes synchronously from inside its entry points.
pub trait EngineHooks {
    /// The engine started, changed or stopped caring about `socket`. Must not block.
    fn socket_interest(&mut self, socket: Socket, interest: SocketInterest);

    /// The engine's required poll interval changed. Zero or negative means "as soon as possible".
    fn reprogram_timer(&mut self, timeout_ms: i64);
}

/// The non-blocking multi-transfer engine.
///
/// Any method taking `hooks` may call back into them before returning; implementations must
/// not stash the sink.
pub trait TransferEngine {
    /// A configured transfer that is not attached to the engine.
    type Transfer;
    /// An attached transfer. Not `Clone`: exactly one owner until handed back to [`detach`].
    ///
    /// [`detach`]: TransferEngine::detach
    type Handle;

    /// Route the socket-interest and timer-reprogram callbacks to the hook sink.
    fn install_callbacks(&mut self) -> Result<(), MultiCode>;

    /// Store `key` with the transfer so a later [`Completed`] can carry it back.
    fn set_opaque_context(
        &mut self,
        transfer: &mut Self::Transfer,
        key: TransferKey,
    ) -> Result<(), MultiCode>;

    fn attach(
        &mut self,
        transfer: Self::Transfer,
        hooks: &mut dyn EngineHooks,
    ) -> Result<Self::Handle, Rejected<Self::Transfer>>;

    /// Remove the transfer from the engine and hand it back.
    fn detach(
        &mut self,
        handle: Self::Handle,
        hooks: &mut dyn EngineHooks,
    ) -> Result<Self::Transfer, Rejected<Self::Handle>>;

    /// Perform the non-blocking I/O `socket` is ready for. Returns the running-transfer count.
    fn advance_by_socket(
        &mut self,
        socket: Socket,
        direction: Direction,
        hooks: &mut dyn EngineHooks,
    ) -> Result<usize, MultiCode>;

    /// Handle an expired timeout. Returns the running-transfer count.
    fn advance_by_timeout(&mut self, hooks: &mut dyn EngineHooks) -> Result<usize, MultiCode>;

    fn poll_next_completed(&mut self) -> Option<Completed>;

    /// Target the transfer actually ended up at, if the engine tracks one.
    fn effective_target(&self, handle: &Self::Handle) -> Option<String>;

    /// Copy the transfer's error text into `buf`.
    fn read_error(&self, handle: &Self::Handle, buf: &mut crate::transfer::ErrorBuffer);
}
