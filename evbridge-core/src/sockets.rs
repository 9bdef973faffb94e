//! Socket registration table: the bridge's record of which sockets the reactor watches and for
//! what. Every entry change is paired with exactly one successful reactor call.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::engine::{Socket, SocketInterest};
use crate::error::{RegistrationError, WatchOp};
use crate::reactor::{EventMask, Reactor, ReactorError};

/// Map the engine's capability set onto reactor event bits.
pub fn interest_mask(interest: SocketInterest) -> EventMask {
    let mut mask = EventMask::NONE;
    if interest.wants_read() {
        mask = mask | EventMask::READ;
    }
    if interest.wants_write() {
        mask = mask | EventMask::WRITE;
    }
    mask
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub socket: Socket,
    pub interest: SocketInterest,
    pub mask: EventMask,
    /// Mirrors whether the reactor currently holds a watch for `socket`.
    pub registered: bool,
}

/// What a table operation did to the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableChange {
    Added,
    Modified,
    Removed,
    /// Nothing to do: removal of an unknown socket.
    Unchanged,
}

#[derive(Debug, Default)]
pub struct SocketTable {
    entries: HashMap<Socket, Registration>,
}

impl SocketTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, socket: Socket) -> Option<&Registration> {
        self.entries.get(&socket)
    }

    /// Sockets in the table, sorted.
    pub fn sockets(&self) -> Vec<Socket> {
        let mut sockets: Vec<Socket> = self.entries.keys().copied().collect();
        sockets.sort_unstable();
        sockets
    }

    /// Apply one socket-interest request from the engine.
    pub fn apply<R: Reactor + ?Sized>(
        &mut self,
        reactor: &mut R,
        socket: Socket,
        interest: SocketInterest,
    ) -> Result<TableChange, RegistrationError> {
        match interest {
            SocketInterest::Remove => self.remove(reactor, socket),
            _ => self.upsert(reactor, socket, interest),
        }
    }

    /// Create or update the registration for `socket`: add for a socket the reactor does not
    /// watch, modify otherwise. Never both.
    pub fn upsert<R: Reactor + ?Sized>(
        &mut self,
        reactor: &mut R,
        socket: Socket,
        interest: SocketInterest,
    ) -> Result<TableChange, RegistrationError> {
        let mask = interest_mask(interest);
        if let Some(entry) = self.entries.get_mut(&socket).filter(|entry| entry.registered) {
            debug!(socket, from = %entry.interest, to = %interest, "changing socket action");
            return match reactor.modify_watch(socket, mask) {
                Ok(()) => {
                    entry.interest = interest;
                    entry.mask = mask;
                    Ok(TableChange::Modified)
                }
                Err(ReactorError::NotWatched(_)) => {
                    // The reactor lost the watch; record the truth so the next upsert adds.
                    warn!(socket, "reactor no longer watches a registered socket");
                    entry.registered = false;
                    Err(failure(socket, WatchOp::Modify, ReactorError::NotWatched(socket)))
                }
                Err(source) => Err(failure(socket, WatchOp::Modify, source)),
            };
        }

        debug!(socket, what = %interest, "adding socket");
        match reactor.add_watch(socket, mask) {
            Ok(()) => {}
            Err(ReactorError::AlreadyWatched(_)) => {
                contradiction(socket, "reactor already watches a socket the table does not");
                reactor
                    .modify_watch(socket, mask)
                    .map_err(|source| failure(socket, WatchOp::Modify, source))?;
            }
            Err(source) => return Err(failure(socket, WatchOp::Add, source)),
        }
        self.entries.insert(
            socket,
            Registration {
                socket,
                interest,
                mask,
                registered: true,
            },
        );
        Ok(TableChange::Added)
    }

    /// Drop the registration for `socket`. Unknown sockets are a no-op and never reach the reactor.
    pub fn remove<R: Reactor + ?Sized>(
        &mut self,
        reactor: &mut R,
        socket: Socket,
    ) -> Result<TableChange, RegistrationError> {
        let Some(entry) = self.entries.get(&socket) else {
            debug!(socket, "remove for unknown socket");
            return Ok(TableChange::Unchanged);
        };
        if !entry.registered {
            self.entries.remove(&socket);
            return Ok(TableChange::Removed);
        }
        debug!(socket, "removing socket");
        match reactor.remove_watch(socket) {
            Ok(()) => {}
            Err(ReactorError::NotWatched(_)) => {
                // Already gone on the reactor side; follow the engine and forget it.
                contradiction(socket, "reactor did not watch a registered socket");
            }
            Err(source) => return Err(failure(socket, WatchOp::Remove, source)),
        }
        self.entries.remove(&socket);
        Ok(TableChange::Removed)
    }
}

fn failure(socket: Socket, op: WatchOp, source: ReactorError) -> RegistrationError {
    RegistrationError { socket, op, source }
}

fn contradiction(socket: Socket, what: &str) {
    warn!(socket, "{what}");
    debug_assert!(false, "socket {socket}: {what}");
}
