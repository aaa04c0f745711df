//! Test helpers for driving the controller deterministically.
//!
//! Provides a `ManualClock` that only moves when told to, a `FaultyClock`
//! that can make worker threads fail mid-run, and `WorkerLauncher`s that
//! simulate unavailable, failing and vanishing worker threads.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::Clock;
use crate::refresher::{WorkerBody, WorkerLauncher};

/// Clock whose wall and monotonic readings advance only on request
pub struct ManualClock {
    wall_nanos: AtomicU64,
    mono_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            wall_nanos: AtomicU64::new(start_millis * 1_000_000),
            mono_nanos: AtomicU64::new(0),
        }
    }

    /// Move both readings forward
    pub fn advance(&self, by: Duration) {
        let nanos = by.as_nanos() as u64;
        self.wall_nanos.fetch_add(nanos, Ordering::SeqCst);
        self.mono_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Jump the wall clock without touching the monotonic clock
    pub fn set_millis(&self, millis: u64) {
        self.wall_nanos.store(millis * 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.wall_nanos.load(Ordering::SeqCst) / 1_000_000
    }

    fn now_nanos(&self) -> u64 {
        self.mono_nanos.load(Ordering::SeqCst)
    }
}

/// Wraps a clock; once armed, wall-clock reads on worker threads panic.
///
/// Worker threads are recognised by the `tickstamp-` thread name prefix.
pub struct FaultyClock<C> {
    inner: C,
    armed: AtomicBool,
}

impl<C: Clock> FaultyClock<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Clock> Clock for FaultyClock<C> {
    fn now_millis(&self) -> u64 {
        let on_worker = std::thread::current()
            .name()
            .is_some_and(|n| n.starts_with("tickstamp-"));
        if on_worker && self.armed.load(Ordering::SeqCst) {
            panic!("injected clock failure on worker thread");
        }
        self.inner.now_millis()
    }

    fn now_nanos(&self) -> u64 {
        self.inner.now_nanos()
    }
}

/// Reports worker threads as unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableLauncher;

impl WorkerLauncher for UnavailableLauncher {
    fn available(&self) -> bool {
        false
    }

    fn launch(&self, _name: String, _body: WorkerBody) -> io::Result<JoinHandle<()>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "worker threads unavailable"))
    }
}

/// Claims availability but every spawn fails
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingLauncher;

impl WorkerLauncher for FailingLauncher {
    fn launch(&self, _name: String, _body: WorkerBody) -> io::Result<JoinHandle<()>> {
        Err(io::Error::new(io::ErrorKind::OutOfMemory, "injected spawn failure"))
    }
}

/// Starts a thread that exits without running the body
#[derive(Debug, Default)]
pub struct VanishingLauncher {
    launches: AtomicU64,
}

impl VanishingLauncher {
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }
}

impl WorkerLauncher for VanishingLauncher {
    fn launch(&self, name: String, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        std::thread::Builder::new().name(name).spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            drop(body);
        })
    }
}
