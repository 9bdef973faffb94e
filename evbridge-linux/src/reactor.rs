//! Tokio reactor adapter.
//!
//! Each watched socket gets an `AsyncFd` and a local task that turns readiness into
//! [`ReactorEvent`]s on an unbounded channel; timers are local sleep tasks on the same channel.
//! The host reads the channel and feeds the bridge. Everything here is `!Send` and must run
//! inside a [`tokio::task::LocalSet`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::poll_fn;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use evbridge_core::{EventMask, Reactor, ReactorError, ReactorEvent, Socket, TimerId};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Borrowed descriptor. The engine owns the socket; dropping this does not close it.
struct Descriptor(RawFd);

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

struct Watch {
    socket: Socket,
    /// Taken on removal so the descriptor leaves epoll before the task is gone.
    io: RefCell<Option<AsyncFd<Descriptor>>>,
    mask: Cell<EventMask>,
}

impl Watch {
    /// Readiness for the current mask. Readiness is cleared once reported, so the engine is
    /// expected to read or write until the socket would block.
    fn poll_events(&self, cx: &mut Context<'_>) -> Poll<Vec<ReactorEvent>> {
        let io = self.io.borrow();
        let Some(io) = io.as_ref() else {
            return Poll::Pending;
        };
        let mask = self.mask.get();
        let mut out = Vec::new();
        if mask.is_readable() {
            match io.poll_read_ready(cx) {
                Poll::Ready(Ok(mut guard)) => {
                    guard.clear_ready();
                    out.push(ReactorEvent::Readable(self.socket));
                }
                Poll::Ready(Err(e)) => {
                    warn!(socket = self.socket, error = %e, "read readiness failed");
                    out.push(ReactorEvent::Readable(self.socket));
                }
                Poll::Pending => {}
            }
        }
        if mask.is_writable() {
            match io.poll_write_ready(cx) {
                Poll::Ready(Ok(mut guard)) => {
                    guard.clear_ready();
                    out.push(ReactorEvent::Writable(self.socket));
                }
                Poll::Ready(Err(e)) => {
                    warn!(socket = self.socket, error = %e, "write readiness failed");
                    out.push(ReactorEvent::Writable(self.socket));
                }
                Poll::Pending => {}
            }
        }
        if out.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(out)
        }
    }
}

async fn watch_loop(watch: Rc<Watch>, events: UnboundedSender<ReactorEvent>) {
    loop {
        let ready = poll_fn(|cx| watch.poll_events(cx)).await;
        for event in ready {
            trace!(?event, "socket ready");
            if events.send(event).is_err() {
                return;
            }
        }
    }
}

pub struct TokioReactor {
    events: UnboundedSender<ReactorEvent>,
    watches: HashMap<Socket, (Rc<Watch>, JoinHandle<()>)>,
    timers: HashMap<TimerId, JoinHandle<()>>,
    next_timer: u64,
    bound: bool,
}

impl TokioReactor {
    /// New reactor and the receiving end of its event channel.
    pub fn new() -> (Self, UnboundedReceiver<ReactorEvent>) {
        let (tx, rx) = unbounded_channel();
        let reactor = Self {
            events: tx,
            watches: HashMap::new(),
            timers: HashMap::new(),
            next_timer: 0,
            bound: false,
        };
        (reactor, rx)
    }

    pub fn is_watched(&self, socket: Socket) -> bool {
        self.watches.contains_key(&socket)
    }

    pub fn watched_mask(&self, socket: Socket) -> Option<EventMask> {
        self.watches.get(&socket).map(|(watch, _)| watch.mask.get())
    }

    /// Timers scheduled and not yet fired or cancelled.
    pub fn pending_timers(&self) -> usize {
        self.timers.values().filter(|t| !t.is_finished()).count()
    }

    fn spawn_watch(&self, watch: Rc<Watch>) -> JoinHandle<()> {
        tokio::task::spawn_local(watch_loop(watch, self.events.clone()))
    }
}

impl Reactor for TokioReactor {
    fn register_handlers(&mut self) -> Result<(), ReactorError> {
        if self.bound {
            return Err(ReactorError::AlreadyBound);
        }
        self.bound = true;
        Ok(())
    }

    fn release_handlers(&mut self) {
        self.bound = false;
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }

    fn add_watch(&mut self, socket: Socket, mask: EventMask) -> Result<(), ReactorError> {
        if self.watches.contains_key(&socket) {
            return Err(ReactorError::AlreadyWatched(socket));
        }
        let io = AsyncFd::with_interest(Descriptor(socket), Interest::READABLE | Interest::WRITABLE)?;
        let watch = Rc::new(Watch {
            socket,
            io: RefCell::new(Some(io)),
            mask: Cell::new(mask),
        });
        let task = self.spawn_watch(watch.clone());
        self.watches.insert(socket, (watch, task));
        debug!(socket, %mask, "watch added");
        Ok(())
    }

    fn modify_watch(&mut self, socket: Socket, mask: EventMask) -> Result<(), ReactorError> {
        let Some((watch, task)) = self.watches.get_mut(&socket) else {
            return Err(ReactorError::NotWatched(socket));
        };
        watch.mask.set(mask);
        task.abort();
        let watch = watch.clone();
        let fresh = tokio::task::spawn_local(watch_loop(watch, self.events.clone()));
        *task = fresh;
        debug!(socket, %mask, "watch modified");
        Ok(())
    }

    fn remove_watch(&mut self, socket: Socket) -> Result<(), ReactorError> {
        let Some((watch, task)) = self.watches.remove(&socket) else {
            return Err(ReactorError::NotWatched(socket));
        };
        task.abort();
        drop(watch.io.borrow_mut().take());
        debug!(socket, "watch removed");
        Ok(())
    }

    fn schedule_once(&mut self, delay: Duration) -> Result<TimerId, ReactorError> {
        self.timers.retain(|_, task| !task.is_finished());
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        let events = self.events.clone();
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ReactorEvent::Timer(id));
        });
        self.timers.insert(id, task);
        Ok(id)
    }

    fn cancel_scheduled(&mut self, id: TimerId) {
        if let Some(task) = self.timers.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioReactor {
    fn drop(&mut self) {
        for (_, (watch, task)) in self.watches.drain() {
            task.abort();
            watch.io.borrow_mut().take();
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}
