//! Background refresh of the cache cell
//!
//! Both strategies drive the same [`RefreshLoop`]: publish the encoding of
//! the current millisecond whenever it changes, sleep between polls, and stop
//! once the hot path has been quiet for the idle cooldown.

pub mod cooperative;
pub mod worker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cell::{CacheCell, WriteGate};
use crate::clock::Clock;
use crate::encoder::Alphabet;

pub use worker::{ThreadLauncher, WorkerBody, WorkerLauncher};

/// Pause between polls when the millisecond has not changed
pub const POLL_INTERVAL: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Task on a tokio runtime, yielding between polls
    CooperativeLoop,
    /// Dedicated OS thread
    WorkerThread,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CooperativeLoop => "cooperative",
            Strategy::WorkerThread => "worker",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a refresher stopped running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    IdleCooldown,
    Stopped,
    /// Panicked, aborted, or never ran
    Crashed,
}

pub type ExitCallback = Box<dyn FnOnce(ExitReason) + Send + 'static>;

/// Reports a refresher's exit exactly once.
///
/// Dropping the guard without calling [`ExitGuard::exit`] reports
/// [`ExitReason::Crashed`], which covers unwinding panics, aborted tasks and
/// bodies that were dropped before running.
pub struct ExitGuard {
    callback: Option<ExitCallback>,
}

impl ExitGuard {
    pub fn new(callback: impl FnOnce(ExitReason) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn exit(mut self, reason: ExitReason) {
        if let Some(callback) = self.callback.take() {
            callback(reason);
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(ExitReason::Crashed);
        }
    }
}

/// Hot-path activity signal.
///
/// Callers only bump a counter; the refresher turns counter movement into a
/// timestamp so the hot path never reads a clock for it.
#[derive(Default)]
pub struct Activity {
    calls: AtomicU64,
    last_active: AtomicU64,
}

impl Activity {
    #[inline]
    pub fn touch(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Monotonic nanos at which the refresher last saw activity
    pub fn last_active_nanos(&self) -> u64 {
        self.last_active.load(Ordering::Relaxed)
    }

    fn stamp(&self, now_nanos: u64) {
        self.last_active.store(now_nanos, Ordering::Relaxed);
    }
}

/// Everything a refresher needs from its controller
#[derive(Clone)]
pub struct RefreshContext {
    pub clock: Arc<dyn Clock>,
    pub alphabet: Alphabet,
    pub cell: Arc<CacheCell>,
    pub activity: Arc<Activity>,
    pub idle_cooldown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    Updated,
    Unchanged,
    Idle,
    Closed,
}

pub(crate) struct RefreshLoop {
    ctx: RefreshContext,
    gate: Arc<WriteGate>,
    last_millis: u64,
    seen_calls: u64,
    last_active: u64,
    cooldown_nanos: u64,
}

impl RefreshLoop {
    /// Seed the cell with an immediate encode and start the idle timer
    pub(crate) fn start(ctx: RefreshContext, gate: Arc<WriteGate>) -> Self {
        let millis = ctx.clock.now_millis();
        ctx.cell.store(ctx.alphabet.encode(millis));

        let now = ctx.clock.now_nanos();
        ctx.activity.stamp(now);

        Self {
            seen_calls: ctx.activity.calls(),
            cooldown_nanos: ctx.idle_cooldown.as_nanos() as u64,
            last_millis: millis,
            last_active: now,
            gate,
            ctx,
        }
    }

    pub(crate) fn tick(&mut self) -> Tick {
        let now = self.ctx.clock.now_nanos();
        let calls = self.ctx.activity.calls();
        if calls != self.seen_calls {
            self.seen_calls = calls;
            self.last_active = now;
            self.ctx.activity.stamp(now);
        } else if now.saturating_sub(self.last_active) >= self.cooldown_nanos {
            return Tick::Idle;
        }

        let millis = self.ctx.clock.now_millis();
        if millis == self.last_millis {
            return if self.gate.is_open() {
                Tick::Unchanged
            } else {
                Tick::Closed
            };
        }

        if !self
            .gate
            .publish(&self.ctx.cell, self.ctx.alphabet.encode(millis))
        {
            return Tick::Closed;
        }
        self.last_millis = millis;
        Tick::Updated
    }
}

enum RefresherHandle {
    Worker(std::thread::JoinHandle<()>),
    Cooperative(tokio::task::JoinHandle<()>),
}

/// Handle to a running refresher
pub struct Refresher {
    strategy: Strategy,
    gate: Arc<WriteGate>,
    handle: RefresherHandle,
}

impl Refresher {
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn is_finished(&self) -> bool {
        match &self.handle {
            RefresherHandle::Worker(h) => h.is_finished(),
            RefresherHandle::Cooperative(h) => h.is_finished(),
        }
    }

    /// Close the write gate and tear the refresher down.
    ///
    /// No cache write lands after this returns. Worker threads are joined,
    /// cooperative tasks are aborted.
    pub fn stop(self) {
        self.gate.close();
        match self.handle {
            RefresherHandle::Worker(handle) => {
                if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                    debug!("worker refresher panicked before join");
                }
            }
            RefresherHandle::Cooperative(handle) => handle.abort(),
        }
    }

    /// Release a refresher that already exited on its own
    pub fn detach(self) {
        self.gate.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use crate::test_helpers::ManualClock;
    use std::sync::atomic::AtomicBool;

    fn context(clock: Arc<ManualClock>, cooldown: Duration) -> RefreshContext {
        RefreshContext {
            cell: Arc::new(CacheCell::new(encode(0))),
            clock,
            alphabet: Alphabet::DEFAULT,
            activity: Arc::new(Activity::default()),
            idle_cooldown: cooldown,
        }
    }

    #[test]
    fn test_start_seeds_cell() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let ctx = context(clock, Duration::from_secs(1));
        let _loop = RefreshLoop::start(ctx.clone(), Arc::new(WriteGate::new()));
        assert_eq!(ctx.cell.load(), encode(1_700_000_000_000));
    }

    #[test]
    fn test_publishes_only_on_millisecond_change() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = context(clock.clone(), Duration::from_secs(1));
        let mut lp = RefreshLoop::start(ctx.clone(), Arc::new(WriteGate::new()));

        clock.advance(Duration::from_micros(300));
        assert_eq!(lp.tick(), Tick::Unchanged);

        clock.advance(Duration::from_micros(700));
        assert_eq!(lp.tick(), Tick::Updated);
        assert_eq!(ctx.cell.load(), encode(1_001));

        assert_eq!(lp.tick(), Tick::Unchanged);
    }

    #[test]
    fn test_idle_after_cooldown_without_activity() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = context(clock.clone(), Duration::from_millis(50));
        let mut lp = RefreshLoop::start(ctx.clone(), Arc::new(WriteGate::new()));

        clock.advance(Duration::from_millis(49));
        assert_eq!(lp.tick(), Tick::Updated);

        clock.advance(Duration::from_millis(1));
        assert_eq!(lp.tick(), Tick::Idle);
    }

    #[test]
    fn test_activity_extends_cooldown() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = context(clock.clone(), Duration::from_millis(50));
        let mut lp = RefreshLoop::start(ctx.clone(), Arc::new(WriteGate::new()));

        clock.advance(Duration::from_millis(40));
        ctx.activity.touch();
        assert_eq!(lp.tick(), Tick::Updated);
        assert_eq!(ctx.activity.last_active_nanos(), clock.now_nanos());

        clock.advance(Duration::from_millis(40));
        assert_ne!(lp.tick(), Tick::Idle);

        clock.advance(Duration::from_millis(10));
        assert_eq!(lp.tick(), Tick::Idle);
    }

    #[test]
    fn test_closed_gate_stops_loop() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = context(clock.clone(), Duration::from_secs(1));
        let gate = Arc::new(WriteGate::new());
        let mut lp = RefreshLoop::start(ctx.clone(), gate.clone());

        gate.close();
        assert_eq!(lp.tick(), Tick::Closed);
        clock.advance(Duration::from_millis(5));
        assert_eq!(lp.tick(), Tick::Closed);
        assert_eq!(ctx.cell.load(), encode(1_000));
    }

    #[test]
    fn test_exit_guard_reports_explicit_reason() {
        let (tx, rx) = std::sync::mpsc::channel();
        let guard = ExitGuard::new(move |reason| tx.send(reason).unwrap());
        guard.exit(ExitReason::IdleCooldown);
        assert_eq!(rx.try_recv().unwrap(), ExitReason::IdleCooldown);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_exit_guard_reports_crash() {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(ExitGuard::new(move |reason| tx.send(reason).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), ExitReason::Crashed);
    }

    #[test]
    fn test_exit_guard_reports_crash_on_panic() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let result = std::thread::spawn(move || {
            let _guard = ExitGuard::new(move |reason| {
                assert_eq!(reason, ExitReason::Crashed);
                flag.store(true, Ordering::SeqCst);
            });
            panic!("refresher failure");
        })
        .join();
        assert!(result.is_err());
        assert!(fired.load(Ordering::SeqCst));
    }
}
