//! The bridge: lifecycle, socket and timer dispatch, completion draining.
//!
//! Every reactor event funnels into one engine advance followed by a drain of the engine's
//! completed queue. The engine calls back into [`Hooks`] while it advances, attaches or
//! detaches; the hooks own the socket table, the pending timer and the reactor, and nothing
//! else. The engine and the transfer arena live outside the hooks, so a nested callback can
//! never see a transfer in the middle of being added or finished.

use std::mem;

use tracing::{debug, error, info, warn};

use crate::arena::{Arena, TransferKey};
use crate::config::BridgeConfig;
use crate::engine::{
    Direction, EngineHooks, MultiCode, Rejected, Socket, SocketInterest, TransferCode,
    TransferEngine,
};
use crate::error::{BridgeError, Fault};
use crate::reactor::{Reactor, ReactorEvent, TimerId};
use crate::sockets::{SocketTable, TableChange};
use crate::timer::TimerSlot;
use crate::transfer::{AbortedTransfer, Completion, TransferContext};

/// Counters since initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub socket_advances: u64,
    pub timeout_advances: u64,
    pub completions: u64,
    pub cancellations: u64,
    pub watches_added: u64,
    pub watches_modified: u64,
    pub watches_removed: u64,
    pub timer_reprograms: u64,
}

/// The callback sink handed to the engine.
struct Hooks<R> {
    reactor: R,
    sockets: SocketTable,
    timer: TimerSlot,
    faults: Vec<Fault>,
    stats: BridgeStats,
}

impl<R: Reactor> EngineHooks for Hooks<R> {
    fn socket_interest(&mut self, socket: Socket, interest: SocketInterest) {
        debug!(socket, what = %interest, "socket callback");
        match self.sockets.apply(&mut self.reactor, socket, interest) {
            Ok(TableChange::Added) => self.stats.watches_added += 1,
            Ok(TableChange::Modified) => self.stats.watches_modified += 1,
            Ok(TableChange::Removed) => self.stats.watches_removed += 1,
            Ok(TableChange::Unchanged) => {}
            Err(err) => {
                error!(error = %err, "socket registration failed");
                self.faults.push(Fault::Registration(err));
            }
        }
    }

    fn reprogram_timer(&mut self, timeout_ms: i64) {
        debug!(timeout_ms, "setting timeout");
        self.stats.timer_reprograms += 1;
        if let Err(err) = self.timer.reprogram(&mut self.reactor, timeout_ms) {
            error!(error = %err, timeout_ms, "timer reprogram failed");
            self.faults.push(Fault::Timer(err));
        }
    }
}

/// Advisory codes are logged and swallowed (`Ok(None)`); everything else is fatal for the call.
fn engine_call<T>(op: &'static str, result: Result<T, MultiCode>) -> Result<Option<T>, BridgeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(code) if code.is_advisory() => {
            warn!(op, code = code.name(), "ignoring advisory engine error");
            Ok(None)
        }
        Err(code) => {
            error!(op, code = code.name(), "engine call failed");
            Err(BridgeError::Engine { op, code })
        }
    }
}

/// Bridge state: one engine, the contexts of its in-flight transfers, and the hooks.
pub struct Bridge<E: TransferEngine, R: Reactor> {
    engine: E,
    transfers: Arena<TransferContext<E::Handle>>,
    /// Contexts whose detach failed. Their handles may still be attached, so they are kept.
    stranded: Vec<(TransferKey, TransferContext<E::Handle>)>,
    hooks: Hooks<R>,
    running: usize,
    config: BridgeConfig,
}

impl<E: TransferEngine, R: Reactor> Bridge<E, R> {
    /// Bind the bridge to an engine and a reactor: route the reactor's events to this bridge and
    /// install the engine's socket-interest and timer callbacks.
    pub fn initialize(mut engine: E, mut reactor: R, config: BridgeConfig) -> Result<Self, BridgeError> {
        reactor.register_handlers()?;
        if let Err(err) = engine_call("install callbacks", engine.install_callbacks()) {
            reactor.release_handlers();
            return Err(err);
        }
        debug!(
            error_buffer = config.error_buffer_capacity,
            immediate_delay_ms = config.immediate_delay_ms,
            "bridge initialized"
        );
        Ok(Self {
            engine,
            transfers: Arena::new(),
            stranded: Vec::new(),
            hooks: Hooks {
                reactor,
                sockets: SocketTable::new(),
                timer: TimerSlot::new(config.immediate_delay()),
                faults: Vec::new(),
                stats: BridgeStats::default(),
            },
            running: 0,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Running-transfer count as reported by the engine's last advance.
    pub fn running(&self) -> usize {
        self.running
    }

    /// Transfer contexts currently held.
    pub fn in_flight(&self) -> usize {
        self.transfers.len()
    }

    pub fn contains(&self, key: TransferKey) -> bool {
        self.transfers.contains(key)
    }

    pub fn target(&self, key: TransferKey) -> Option<&str> {
        self.transfers.get(key).map(TransferContext::target)
    }

    pub fn sockets(&self) -> &SocketTable {
        &self.hooks.sockets
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.hooks.timer.pending()
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.hooks.stats
    }

    /// Diagnostics recorded since the last call.
    pub fn take_faults(&mut self) -> Vec<Fault> {
        mem::take(&mut self.hooks.faults)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Direct engine access, e.g. for engine-wide options. Engine entry points that need the
    /// hooks are only reachable through the bridge.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn reactor(&self) -> &R {
        &self.hooks.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut R {
        &mut self.hooks.reactor
    }

    /// Hand a configured transfer to the engine. The transfer's key is stored with the engine
    /// before it is attached; the engine may call back (typically a timer request) while
    /// attaching.
    pub fn add_transfer(
        &mut self,
        target: impl Into<String>,
        mut transfer: E::Transfer,
    ) -> Result<TransferKey, Rejected<E::Transfer>> {
        let target = target.into();
        let key = self.transfers.vacant_key();
        if let Err(code) = self.engine.set_opaque_context(&mut transfer, key) {
            error!(url = %target, code = code.name(), "setting transfer context failed");
            return Err(Rejected::new(transfer, code));
        }
        let handle = match self.engine.attach(transfer, &mut self.hooks) {
            Ok(handle) => handle,
            Err(rejected) => {
                error!(url = %target, code = rejected.code.name(), "engine refused transfer");
                return Err(rejected);
            }
        };
        debug!(%key, url = %target, "transfer added");
        let context = TransferContext::new(handle, target, self.config.error_buffer_capacity);
        let inserted = self.transfers.insert(context);
        debug_assert_eq!(inserted, key);
        Ok(inserted)
    }

    /// Route one reactor event.
    pub fn handle_event(
        &mut self,
        event: ReactorEvent,
    ) -> Result<Vec<Completion<E::Transfer>>, BridgeError> {
        match event {
            ReactorEvent::Readable(socket) => self.on_socket_ready(socket, Direction::Read),
            ReactorEvent::Writable(socket) => self.on_socket_ready(socket, Direction::Write),
            ReactorEvent::Timer(id) => self.on_timer(id),
        }
    }

    /// Forward readiness to the engine, then drain. The engine alone knows what `socket` is.
    pub fn on_socket_ready(
        &mut self,
        socket: Socket,
        direction: Direction,
    ) -> Result<Vec<Completion<E::Transfer>>, BridgeError> {
        self.hooks.stats.socket_advances += 1;
        let advanced = self
            .engine
            .advance_by_socket(socket, direction, &mut self.hooks);
        if let Some(running) = engine_call("advance by socket", advanced)? {
            self.running = running;
        }
        let completed = self.drain_completed();

        if self.running == 0
            && self.transfers.is_empty()
            && self.config.cancel_timer_when_idle
            && self.hooks.timer.pending().is_some()
        {
            debug!("last transfer done, kill timeout");
            self.hooks.timer.cancel(&mut self.hooks.reactor);
        }
        Ok(completed)
    }

    /// Handle a fired timer. Timers replaced or cancelled after the reactor queued them are
    /// ignored.
    pub fn on_timer(&mut self, id: TimerId) -> Result<Vec<Completion<E::Transfer>>, BridgeError> {
        if !self.hooks.timer.fire(id) {
            debug!(%id, "ignoring stale timer");
            return Ok(Vec::new());
        }
        self.hooks.stats.timeout_advances += 1;
        let advanced = self.engine.advance_by_timeout(&mut self.hooks);
        if let Some(running) = engine_call("advance by timeout", advanced)? {
            self.running = running;
        }
        Ok(self.drain_completed())
    }

    /// Pull every finished transfer out of the engine: detach it, then report it.
    pub fn drain_completed(&mut self) -> Vec<Completion<E::Transfer>> {
        debug!(remaining = self.running, "checking completed transfers");
        let mut done = Vec::new();
        while let Some(message) = self.engine.poll_next_completed() {
            let Some(key) = message.key else {
                warn!(result = %message.result, "completed transfer carries no context");
                self.hooks.faults.push(Fault::MissingContext);
                continue;
            };
            let Some(context) = self.transfers.remove(key) else {
                warn!(%key, "completion for stale transfer");
                self.hooks.faults.push(Fault::StaleTransfer(key));
                continue;
            };
            if let Some(completion) = self.finish(key, context, message.result) {
                done.push(completion);
            }
        }
        done
    }

    fn finish(
        &mut self,
        key: TransferKey,
        context: TransferContext<E::Handle>,
        result: TransferCode,
    ) -> Option<Completion<E::Transfer>> {
        let (handle, target, mut error) = context.into_parts();
        self.engine.read_error(&handle, &mut error);
        let effective = self.engine.effective_target(&handle);
        match self.engine.detach(handle, &mut self.hooks) {
            Ok(transfer) => {
                self.hooks.stats.completions += 1;
                info!(
                    %key,
                    url = effective.as_deref().unwrap_or(&target),
                    %result,
                    error = error.as_str(),
                    "transfer done"
                );
                Some(Completion::new(key, target, effective, result, error, transfer))
            }
            Err(Rejected { value, code }) => {
                error!(%key, code = code.name(), "detach failed, keeping transfer context");
                self.hooks.faults.push(Fault::Detach { key, code });
                self.stranded
                    .push((key, TransferContext::from_parts(value, target, error)));
                None
            }
        }
    }

    /// Detach an in-flight transfer and free its context. The transfer is handed back.
    pub fn cancel_transfer(&mut self, key: TransferKey) -> Result<E::Transfer, BridgeError> {
        let context = self
            .transfers
            .remove(key)
            .ok_or(BridgeError::UnknownTransfer(key))?;
        let (handle, target, error) = context.into_parts();
        match self.engine.detach(handle, &mut self.hooks) {
            Ok(transfer) => {
                self.hooks.stats.cancellations += 1;
                info!(%key, url = %target, "transfer cancelled");
                Ok(transfer)
            }
            Err(Rejected { value, code }) => {
                error!(%key, code = code.name(), "detach failed, keeping transfer context");
                self.stranded
                    .push((key, TransferContext::from_parts(value, target, error)));
                Err(BridgeError::Engine {
                    op: "detach transfer",
                    code,
                })
            }
        }
    }

    /// Tear the bridge down: detach whatever is still attached, drop the pending timer, release
    /// the reactor handlers, and report anything that could not be cleaned up.
    pub fn teardown(mut self) -> Teardown<E, R> {
        let mut pending: Vec<(TransferKey, TransferContext<E::Handle>)> = self
            .transfers
            .keys()
            .into_iter()
            .filter_map(|key| self.transfers.remove(key).map(|context| (key, context)))
            .collect();
        pending.append(&mut self.stranded);

        let mut aborted = Vec::new();
        for (key, context) in pending {
            let (handle, target, error) = context.into_parts();
            match self.engine.detach(handle, &mut self.hooks) {
                Ok(transfer) => {
                    warn!(%key, url = %target, "transfer aborted at teardown");
                    aborted.push(AbortedTransfer {
                        key,
                        target,
                        transfer,
                    });
                }
                Err(Rejected { value, code }) => {
                    error!(%key, code = code.name(), "detach failed at teardown");
                    self.hooks.faults.push(Fault::Detach { key, code });
                    self.stranded
                        .push((key, TransferContext::from_parts(value, target, error)));
                }
            }
        }

        // Detaching may have asked for a new timer.
        self.hooks.timer.cancel(&mut self.hooks.reactor);

        let leaked_sockets = self.hooks.sockets.sockets();
        for socket in &leaked_sockets {
            warn!(socket = *socket, "socket still registered at teardown");
        }
        self.hooks.reactor.release_handlers();
        if aborted.is_empty() && leaked_sockets.is_empty() && self.stranded.is_empty() {
            debug!("bridge torn down");
        }

        let Hooks {
            reactor,
            faults,
            stats,
            ..
        } = self.hooks;
        Teardown {
            engine: self.engine,
            reactor,
            aborted,
            stranded: self.stranded,
            leaked_sockets,
            faults,
            stats,
        }
    }
}

/// What teardown hands back.
pub struct Teardown<E: TransferEngine, R> {
    pub engine: E,
    pub reactor: R,
    /// Transfers that were still running, detached and returned.
    pub aborted: Vec<AbortedTransfer<E::Transfer>>,
    /// Contexts the engine refused to detach. Their handles may still be attached.
    pub stranded: Vec<(TransferKey, TransferContext<E::Handle>)>,
    /// Sockets the reactor still watches on the bridge's behalf.
    pub leaked_sockets: Vec<Socket>,
    pub faults: Vec<Fault>,
    pub stats: BridgeStats,
}

impl<E: TransferEngine, R> Teardown<E, R> {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty() && self.stranded.is_empty() && self.leaked_sockets.is_empty()
    }
}

/// Host-owned holder for at most one bridge. Initializing an occupied slot fails until the
/// bridge in it is torn down.
pub struct BridgeSlot<E: TransferEngine, R: Reactor> {
    bridge: Option<Bridge<E, R>>,
}

impl<E: TransferEngine, R: Reactor> BridgeSlot<E, R> {
    pub fn new() -> Self {
        Self { bridge: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn initialize(
        &mut self,
        engine: E,
        reactor: R,
        config: BridgeConfig,
    ) -> Result<&mut Bridge<E, R>, BridgeError> {
        if self.bridge.is_some() {
            return Err(BridgeError::AlreadyInitialized);
        }
        let bridge = Bridge::initialize(engine, reactor, config)?;
        Ok(self.bridge.insert(bridge))
    }

    pub fn get(&self) -> Option<&Bridge<E, R>> {
        self.bridge.as_ref()
    }

    pub fn get_mut(&mut self) -> Result<&mut Bridge<E, R>, BridgeError> {
        self.bridge.as_mut().ok_or(BridgeError::NotInitialized)
    }

    pub fn teardown(&mut self) -> Result<Teardown<E, R>, BridgeError> {
        self.bridge
            .take()
            .map(Bridge::teardown)
            .ok_or(BridgeError::NotInitialized)
    }
}

impl<E: TransferEngine, R: Reactor> Default for BridgeSlot<E, R> {
    fn default() -> Self {
        Self::new()
    }
}
