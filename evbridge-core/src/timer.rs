//! The single pending timer. Reprogramming cancels the previous wake-up before scheduling the
//! next, so the reactor never holds more than one for a bridge.

use std::time::Duration;

use tracing::debug;

use crate::reactor::{Reactor, ReactorError, TimerId};

/// Delay to schedule for an engine timeout. Non-positive timeouts still go through the reactor,
/// after `immediate`, so the engine is only ever entered from reactor events.
pub fn timeout_delay(timeout_ms: i64, immediate: Duration) -> Duration {
    if timeout_ms <= 0 {
        immediate
    } else {
        Duration::from_millis(timeout_ms as u64)
    }
}

#[derive(Debug)]
pub struct TimerSlot {
    pending: Option<TimerId>,
    immediate: Duration,
}

impl TimerSlot {
    pub fn new(immediate: Duration) -> Self {
        Self {
            pending: None,
            immediate,
        }
    }

    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }

    /// Replace whatever is scheduled with a wake-up after `timeout_ms`. On failure nothing is
    /// pending.
    pub fn reprogram<R: Reactor + ?Sized>(
        &mut self,
        reactor: &mut R,
        timeout_ms: i64,
    ) -> Result<TimerId, ReactorError> {
        self.cancel(reactor);
        let delay = timeout_delay(timeout_ms, self.immediate);
        let id = reactor.schedule_once(delay)?;
        debug!(%id, timeout_ms, delay_ms = delay.as_millis() as u64, "timer scheduled");
        self.pending = Some(id);
        Ok(id)
    }

    pub fn cancel<R: Reactor + ?Sized>(&mut self, reactor: &mut R) {
        if let Some(id) = self.pending.take() {
            debug!(%id, "timer cancelled");
            reactor.cancel_scheduled(id);
        }
    }

    /// Consume a fired timer. False for a timer that was replaced or cancelled after the reactor
    /// queued its event.
    pub fn fire(&mut self, id: TimerId) -> bool {
        if self.pending == Some(id) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}
