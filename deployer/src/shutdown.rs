//! Graceful shutdown coordination
//!
//! A deployment step that mutates a device must never be cut off halfway.
//! Device tasks wrap every `apply` in a [`MutationGuard`]; the signal
//! listener consults the shared state to decide between exiting immediately
//! and deferring until the open mutation regions close.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, warn};

/// What the signal handler should do with a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDisposition {
    /// No mutation in progress, terminate right away
    ExitNow,
    /// A mutation region is open, stop at the next safe point
    Deferred,
}

/// Shared shutdown state, one instance per process run
#[derive(Debug, Default)]
pub struct ShutdownState {
    active_mutations: AtomicUsize,
    stop_requested: AtomicBool,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a mutation region. The region stays open until the returned
    /// guard is dropped.
    pub fn begin_mutation(self: &Arc<Self>) -> MutationGuard {
        self.active_mutations.fetch_add(1, Ordering::SeqCst);
        MutationGuard {
            state: Arc::clone(self),
        }
    }

    /// True while at least one device task holds a mutation guard
    pub fn mutation_in_progress(&self) -> bool {
        self.active_mutations.load(Ordering::SeqCst) > 0
    }

    /// True once a stop has been requested
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Record a stop request and report how it should be honored.
    ///
    /// A repeated request always yields [`StopDisposition::ExitNow`]: the
    /// operator pressing Ctrl+C twice means now.
    pub fn request_stop(&self) -> StopDisposition {
        let already_requested = self.stop_requested.swap(true, Ordering::SeqCst);
        if already_requested || !self.mutation_in_progress() {
            StopDisposition::ExitNow
        } else {
            StopDisposition::Deferred
        }
    }
}

/// RAII marker for an open mutation region
#[derive(Debug)]
pub struct MutationGuard {
    state: Arc<ShutdownState>,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.state.active_mutations.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawn the signal listener task
pub fn spawn_signal_listener(state: Arc<ShutdownState>) -> JoinHandle<()> {
    tokio::spawn(listen_for_signals(state))
}

#[cfg(unix)]
async fn listen_for_signals(state: Arc<ShutdownState>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {e}");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to register SIGINT handler: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => handle_signal("SIGTERM", &state),
            _ = sigint.recv() => handle_signal("SIGINT", &state),
        }
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(state: Arc<ShutdownState>) {
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Failed to listen for Ctrl+C");
            return;
        }
        handle_signal("Ctrl+C", &state);
    }
}

fn handle_signal(name: &str, state: &ShutdownState) {
    warn!("{} received", name);
    match state.request_stop() {
        StopDisposition::ExitNow => {
            warn!("Process {} exiting...", std::process::id());
            std::process::exit(0);
        }
        StopDisposition::Deferred => {
            warn!("A deployment step is in progress, exiting at the next safe point");
        }
    }
}
