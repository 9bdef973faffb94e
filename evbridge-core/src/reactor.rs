//! Reactor capability set: descriptor watches and one-shot timers owned by the host loop.

use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

use crate::engine::{Direction, Socket};

/// Readiness bits a watch is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const READ: EventMask = EventMask(0b01);
    pub const WRITE: EventMask = EventMask(0b10);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (false, false) => f.write_str("none"),
            (true, false) => f.write_str("read"),
            (false, true) => f.write_str("write"),
            (true, true) => f.write_str("read|write"),
        }
    }
}

/// Identity of a scheduled one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Inbound event the reactor delivers for the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorEvent {
    Readable(Socket),
    Writable(Socket),
    Timer(TimerId),
}

impl ReactorEvent {
    /// Socket and direction for readiness events.
    pub fn readiness(self) -> Option<(Socket, Direction)> {
        match self {
            ReactorEvent::Readable(socket) => Some((socket, Direction::Read)),
            ReactorEvent::Writable(socket) => Some((socket, Direction::Write)),
            ReactorEvent::Timer(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("socket {0} is already watched")]
    AlreadyWatched(Socket),
    #[error("socket {0} is not watched")]
    NotWatched(Socket),
    #[error("reactor handlers are already bound")]
    AlreadyBound,
    #[error("reactor i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host event loop, as seen by the bridge.
///
/// Duplicate adds and removals of unknown sockets are errors here; the socket table never
/// issues either against a reactor it is in sync with.
pub trait Reactor {
    /// Route readable, writable and timer events for this bridge's sockets to the host loop
    /// that feeds [`crate::Bridge::handle_event`].
    fn register_handlers(&mut self) -> Result<(), ReactorError>;

    /// Undo [`Reactor::register_handlers`].
    fn release_handlers(&mut self) {}

    fn add_watch(&mut self, socket: Socket, mask: EventMask) -> Result<(), ReactorError>;

    fn modify_watch(&mut self, socket: Socket, mask: EventMask) -> Result<(), ReactorError>;

    fn remove_watch(&mut self, socket: Socket) -> Result<(), ReactorError>;

    /// Deliver [`ReactorEvent::Timer`] once, after `delay`.
    fn schedule_once(&mut self, delay: Duration) -> Result<TimerId, ReactorError>;

    /// Cancelling a timer that already fired is a no-op.
    fn cancel_scheduled(&mut self, id: TimerId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bits() {
        let both = EventMask::READ | EventMask::WRITE;
        assert!(both.is_readable() && both.is_writable());
        assert!(both.contains(EventMask::READ));
        assert!(!EventMask::READ.contains(EventMask::WRITE));
        assert!(EventMask::NONE.is_empty());
        assert_eq!(both.to_string(), "read|write");
    }

    #[test]
    fn readiness_of_events() {
        assert_eq!(
            ReactorEvent::Readable(7).readiness(),
            Some((7, Direction::Read))
        );
        assert_eq!(
            ReactorEvent::Writable(7).readiness(),
            Some((7, Direction::Write))
        );
        assert_eq!(ReactorEvent::Timer(TimerId(1)).readiness(), None);
    }
}
