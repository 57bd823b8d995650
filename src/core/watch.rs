//! Watch-mode scheduling
//!
//! Two tasks share a single-slot pending signal: the debouncer turns bursts
//! of filesystem events into one trigger after a trailing quiet window, and
//! the worker runs one rebuild per trigger. Triggers that arrive while a
//! rebuild is running collapse into a single follow-up run. Cancellation
//! stops scheduling but never interrupts a rebuild already in progress.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Counts of what the watch loop did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOutcome {
    /// Rebuilds started
    pub runs: usize,
    /// Rebuilds that returned an error
    pub failures: usize,
}

/// Watch loop settings
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Trailing quiet window before a trigger fires
    pub debounce: Duration,
    /// Run once before waiting for events
    pub initial_run: bool,
}

/// Run `rebuild` whenever `events` settles, until cancelled or the event
/// source closes.
///
/// Rebuild errors are logged and counted; the loop keeps going.
pub async fn run_watch_loop<Ev, F, Fut, T, E>(
    events: mpsc::UnboundedReceiver<Ev>,
    options: WatchOptions,
    cancel: CancellationToken,
    mut rebuild: F,
) -> WatchOutcome
where
    Ev: Send + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let pending = Arc::new(Notify::new());
    let mut debouncer = tokio::spawn(debounce(
        events,
        options.debounce,
        Arc::clone(&pending),
        cancel.clone(),
    ));

    let mut outcome = WatchOutcome::default();
    if options.initial_run {
        run_once(&mut rebuild, &mut outcome).await;
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("watch stopped");
                break;
            }
            () = pending.notified() => run_once(&mut rebuild, &mut outcome).await,
            _ = &mut debouncer => {
                tracing::debug!("event source closed");
                break;
            }
        }
    }

    outcome
}

async fn run_once<F, Fut, T, E>(rebuild: &mut F, outcome: &mut WatchOutcome)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    outcome.runs += 1;
    tracing::info!(run = outcome.runs, "rebuilding");
    if let Err(e) = rebuild().await {
        outcome.failures += 1;
        tracing::error!(error = %e, "rebuild failed, still watching");
    }
}

/// Collapse events into triggers on `pending`
async fn debounce<Ev>(
    mut events: mpsc::UnboundedReceiver<Ev>,
    window: Duration,
    pending: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        if first.is_none() {
            return;
        }

        // Every further event restarts the window
        let closed = loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                event = events.recv() => {
                    if event.is_none() {
                        break true;
                    }
                }
                () = tokio::time::sleep(window) => break false,
            }
        };

        tracing::debug!("changes settled, scheduling rebuild");
        // Stores at most one permit: queue depth 1
        pending.notify_one();
        if closed {
            return;
        }
    }
}
