//! Worker strategy: the refresh loop on a dedicated OS thread
//!
//! Runs in parallel with `get()` callers and publishes straight into the
//! cache cell. The only signal it takes back is the write gate closing.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use super::{
    ExitGuard, ExitReason, RefreshContext, RefreshLoop, Refresher, RefresherHandle, Strategy,
    Tick, POLL_INTERVAL,
};
use crate::cell::WriteGate;
use crate::error::{Error, Result};

pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Starts worker threads.
///
/// `launch` must run `body` on a new thread, never inline on the caller.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Whether this process can run worker threads at all
    fn available(&self) -> bool {
        true
    }

    fn launch(&self, name: String, body: WorkerBody) -> io::Result<JoinHandle<()>>;
}

/// Launches workers with `std::thread::Builder`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadLauncher;

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, name: String, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(body)
    }
}

/// Seed the cell and start the refresh loop on a worker thread
pub fn spawn(
    ctx: RefreshContext,
    launcher: &dyn WorkerLauncher,
    name: String,
    guard: ExitGuard,
) -> Result<Refresher> {
    let gate = Arc::new(WriteGate::new());
    let refresh = RefreshLoop::start(ctx, gate.clone());

    let handle = launcher
        .launch(name, Box::new(move || run(refresh, guard)))
        .map_err(|e| {
            gate.close();
            Error::Spawn(e.to_string())
        })?;
    debug!(thread = ?handle.thread().name(), "worker refresher spawned");

    Ok(Refresher {
        strategy: Strategy::WorkerThread,
        gate,
        handle: RefresherHandle::Worker(handle),
    })
}

fn run(mut refresh: RefreshLoop, guard: ExitGuard) {
    loop {
        match refresh.tick() {
            Tick::Idle => return guard.exit(ExitReason::IdleCooldown),
            Tick::Closed => return guard.exit(ExitReason::Stopped),
            Tick::Updated | Tick::Unchanged => {}
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
