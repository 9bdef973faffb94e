//! Host event loop: pull reactor events off the channel and feed them to the bridge until every
//! transfer is done or shutdown is requested.

use std::future::Future;

use anyhow::{bail, Context, Result};
use evbridge_core::{Bridge, Completion, Reactor, ReactorEvent, TransferEngine};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::LocalSet;
use tracing::{debug, info, warn};

/// What one [`run`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events: u64,
    pub succeeded: usize,
    pub failed: usize,
    pub faults: usize,
    /// Shutdown fired with transfers still in flight.
    pub interrupted: bool,
}

/// Dispatch reactor events into `bridge` until no transfer is left or `shutdown` resolves.
/// Completions go to `on_complete` as they are drained. Fatal engine errors end the loop.
pub async fn run<E, R, F>(
    bridge: &mut Bridge<E, R>,
    events: &mut UnboundedReceiver<ReactorEvent>,
    shutdown: impl Future<Output = ()>,
    mut on_complete: F,
) -> Result<RunSummary>
where
    E: TransferEngine,
    R: Reactor,
    F: FnMut(Completion<E::Transfer>),
{
    tokio::pin!(shutdown);
    let mut summary = RunSummary::default();
    while bridge.in_flight() > 0 {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(in_flight = bridge.in_flight(), "shutdown requested");
                summary.interrupted = true;
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => bail!("reactor event channel closed"),
            },
        };
        summary.events += 1;
        debug!(?event, "dispatching");
        let completed = bridge
            .handle_event(event)
            .context("dispatching reactor event")?;
        for completion in completed {
            if completion.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            on_complete(completion);
        }
        for fault in bridge.take_faults() {
            warn!(%fault, "bridge fault");
            summary.faults += 1;
        }
    }
    Ok(summary)
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r.context("waiting for Ctrl+C")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

/// Run `future` on a fresh current-thread runtime inside a [`LocalSet`], which the reactor needs.
pub fn block_on_local<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    Ok(LocalSet::new().block_on(&runtime, future))
}
