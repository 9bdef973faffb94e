//! Test doubles: a recording reactor and a scripted engine.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::arena::TransferKey;
use crate::engine::{
    Completed, Direction, EngineHooks, MultiCode, Rejected, Socket, SocketInterest, TransferCode,
    TransferEngine,
};
use crate::reactor::{EventMask, Reactor, ReactorError, TimerId};
use crate::transfer::ErrorBuffer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactorCall {
    Bind,
    Release,
    Add(Socket, EventMask),
    Modify(Socket, EventMask),
    Remove(Socket),
    Schedule(TimerId, Duration),
    Cancel(TimerId),
}

/// Strict reactor: duplicate adds and operations on unknown sockets fail, like a real one.
#[derive(Debug, Default)]
pub struct MockReactor {
    pub calls: Vec<ReactorCall>,
    watched: HashMap<Socket, EventMask>,
    timers: BTreeSet<TimerId>,
    next_timer: u64,
    fail_next: bool,
    bound: bool,
}

impl MockReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next fallible call fail with an I/O error.
    pub fn fail_next_with_io(&mut self) {
        self.fail_next = true;
    }

    pub fn is_watched(&self, socket: Socket) -> bool {
        self.watched.contains_key(&socket)
    }

    pub fn watched_mask(&self, socket: Socket) -> Option<EventMask> {
        self.watched.get(&socket).copied()
    }

    pub fn watched_sockets(&self) -> Vec<Socket> {
        let mut sockets: Vec<Socket> = self.watched.keys().copied().collect();
        sockets.sort_unstable();
        sockets
    }

    /// Drop a watch behind the table's back.
    pub fn forget(&mut self, socket: Socket) {
        self.watched.remove(&socket);
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn scheduled_timers(&self) -> Vec<TimerId> {
        self.timers.iter().copied().collect()
    }

    /// Fire the oldest scheduled timer, as the loop would on its next tick.
    pub fn fire_next_timer(&mut self) -> Option<TimerId> {
        let id = self.timers.iter().next().copied()?;
        self.timers.remove(&id);
        Some(id)
    }

    fn check(&mut self) -> Result<(), ReactorError> {
        if std::mem::take(&mut self.fail_next) {
            Err(ReactorError::Io(std::io::Error::other("injected failure")))
        } else {
            Ok(())
        }
    }
}

impl Reactor for MockReactor {
    fn register_handlers(&mut self) -> Result<(), ReactorError> {
        if self.bound {
            return Err(ReactorError::AlreadyBound);
        }
        self.bound = true;
        self.calls.push(ReactorCall::Bind);
        Ok(())
    }

    fn release_handlers(&mut self) {
        self.bound = false;
        self.calls.push(ReactorCall::Release);
    }

    fn add_watch(&mut self, socket: Socket, mask: EventMask) -> Result<(), ReactorError> {
        self.check()?;
        if self.watched.contains_key(&socket) {
            return Err(ReactorError::AlreadyWatched(socket));
        }
        self.watched.insert(socket, mask);
        self.calls.push(ReactorCall::Add(socket, mask));
        Ok(())
    }

    fn modify_watch(&mut self, socket: Socket, mask: EventMask) -> Result<(), ReactorError> {
        self.check()?;
        match self.watched.get_mut(&socket) {
            Some(current) => {
                *current = mask;
                self.calls.push(ReactorCall::Modify(socket, mask));
                Ok(())
            }
            None => Err(ReactorError::NotWatched(socket)),
        }
    }

    fn remove_watch(&mut self, socket: Socket) -> Result<(), ReactorError> {
        self.check()?;
        if self.watched.remove(&socket).is_none() {
            return Err(ReactorError::NotWatched(socket));
        }
        self.calls.push(ReactorCall::Remove(socket));
        Ok(())
    }

    fn schedule_once(&mut self, delay: Duration) -> Result<TimerId, ReactorError> {
        self.check()?;
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        self.timers.insert(id);
        self.calls.push(ReactorCall::Schedule(id, delay));
        Ok(id)
    }

    fn cancel_scheduled(&mut self, id: TimerId) {
        self.timers.remove(&id);
        self.calls.push(ReactorCall::Cancel(id));
    }
}

/// Transfer handed to the scripted engine. Records its own drop so tests can check every
/// transfer is released exactly once.
#[derive(Debug)]
pub struct MockTransfer {
    pub name: String,
    pub socket: Option<Socket>,
    pub key: Option<TransferKey>,
    pub error_text: Option<String>,
    pub effective: Option<String>,
    freed: Rc<RefCell<Vec<String>>>,
}

impl Drop for MockTransfer {
    fn drop(&mut self) {
        self.freed.borrow_mut().push(self.name.clone());
    }
}

#[derive(Debug)]
pub struct MockHandle(u64);

/// Something the engine does from inside an entry point.
#[derive(Debug, Clone)]
pub enum Effect {
    Interest(Socket, SocketInterest),
    Timer(i64),
    Finish(&'static str, TransferCode),
    Fail(&'static str, TransferCode, &'static str),
    /// Queue a completion whose context is `key`, without a matching transfer.
    Orphan(Option<TransferKey>),
}

#[derive(Debug, Default)]
pub struct ScriptedEngine {
    attached: BTreeMap<u64, MockTransfer>,
    finished: BTreeSet<u64>,
    next_handle: u64,
    completed: VecDeque<Completed>,
    script: VecDeque<Vec<Effect>>,
    /// Applied on every attach.
    pub on_attach: Vec<Effect>,
    pub socket_advances: Vec<(Socket, Direction)>,
    pub timeout_advances: usize,
    pub detached: Vec<String>,
    pub advance_error: Option<MultiCode>,
    pub detach_error: Option<MultiCode>,
    pub callbacks_installed: bool,
    freed: Rc<RefCell<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer(&self, name: &str, socket: Option<Socket>) -> MockTransfer {
        MockTransfer {
            name: name.to_string(),
            socket,
            key: None,
            error_text: None,
            effective: None,
            freed: self.freed.clone(),
        }
    }

    /// Effects for the next advance (socket or timeout).
    pub fn push_step(&mut self, effects: Vec<Effect>) {
        self.script.push_back(effects);
    }

    pub fn freed(&self) -> Vec<String> {
        self.freed.borrow().clone()
    }

    pub fn running(&self) -> usize {
        self.attached.len() - self.finished.len()
    }

    pub fn queued_completions(&self) -> usize {
        self.completed.len()
    }

    fn find(&self, name: &str) -> Option<u64> {
        self.attached
            .iter()
            .find(|(id, t)| t.name == name && !self.finished.contains(id))
            .map(|(id, _)| *id)
    }

    fn apply(&mut self, effects: Vec<Effect>, hooks: &mut dyn EngineHooks) {
        for effect in effects {
            match effect {
                Effect::Interest(socket, interest) => hooks.socket_interest(socket, interest),
                Effect::Timer(ms) => hooks.reprogram_timer(ms),
                Effect::Finish(name, result) => self.finish(name, result, None),
                Effect::Fail(name, result, text) => self.finish(name, result, Some(text)),
                Effect::Orphan(key) => self.completed.push_back(Completed {
                    result: TransferCode::OK,
                    key,
                }),
            }
        }
    }

    fn finish(&mut self, name: &str, result: TransferCode, text: Option<&str>) {
        let Some(id) = self.find(name) else {
            panic!("no running transfer named {name}");
        };
        self.finished.insert(id);
        let transfer = self.attached.get_mut(&id).expect("attached");
        transfer.error_text = text.map(str::to_string);
        self.completed.push_back(Completed {
            result,
            key: transfer.key,
        });
    }

    fn step(&mut self, hooks: &mut dyn EngineHooks) -> Result<usize, MultiCode> {
        if let Some(effects) = self.script.pop_front() {
            self.apply(effects, hooks);
        }
        match self.advance_error.take() {
            Some(code) => Err(code),
            None => Ok(self.running()),
        }
    }
}

impl TransferEngine for ScriptedEngine {
    type Transfer = MockTransfer;
    type Handle = MockHandle;

    fn install_callbacks(&mut self) -> Result<(), MultiCode> {
        self.callbacks_installed = true;
        Ok(())
    }

    fn set_opaque_context(
        &mut self,
        transfer: &mut MockTransfer,
        key: TransferKey,
    ) -> Result<(), MultiCode> {
        transfer.key = Some(key);
        Ok(())
    }

    fn attach(
        &mut self,
        transfer: MockTransfer,
        hooks: &mut dyn EngineHooks,
    ) -> Result<MockHandle, Rejected<MockTransfer>> {
        self.next_handle += 1;
        let id = self.next_handle;
        self.attached.insert(id, transfer);
        let effects = self.on_attach.clone();
        self.apply(effects, hooks);
        Ok(MockHandle(id))
    }

    fn detach(
        &mut self,
        handle: MockHandle,
        hooks: &mut dyn EngineHooks,
    ) -> Result<MockTransfer, Rejected<MockHandle>> {
        if let Some(code) = self.detach_error.take() {
            return Err(Rejected::new(handle, code));
        }
        let Some(transfer) = self.attached.remove(&handle.0) else {
            return Err(Rejected::new(handle, MultiCode::BadEasyHandle));
        };
        self.finished.remove(&handle.0);
        self.completed.retain(|c| c.key != transfer.key);
        self.detached.push(transfer.name.clone());
        if let Some(socket) = transfer.socket {
            hooks.socket_interest(socket, SocketInterest::Remove);
        }
        Ok(transfer)
    }

    fn advance_by_socket(
        &mut self,
        socket: Socket,
        direction: Direction,
        hooks: &mut dyn EngineHooks,
    ) -> Result<usize, MultiCode> {
        self.socket_advances.push((socket, direction));
        self.step(hooks)
    }

    fn advance_by_timeout(&mut self, hooks: &mut dyn EngineHooks) -> Result<usize, MultiCode> {
        self.timeout_advances += 1;
        self.step(hooks)
    }

    fn poll_next_completed(&mut self) -> Option<Completed> {
        self.completed.pop_front()
    }

    fn effective_target(&self, handle: &MockHandle) -> Option<String> {
        self.attached.get(&handle.0)?.effective.clone()
    }

    fn read_error(&self, handle: &MockHandle, buf: &mut ErrorBuffer) {
        if let Some(text) = self
            .attached
            .get(&handle.0)
            .and_then(|t| t.error_text.as_deref())
        {
            buf.write(text);
        }
    }
}
