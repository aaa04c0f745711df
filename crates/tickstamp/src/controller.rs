//! Adaptive acquisition of encoded timestamps
//!
//! At low call rates every `get()` reads the clock and encodes. When the
//! call rate crosses the configured threshold the controller is promoted:
//! a background refresher keeps a shared cell current and `get()` just loads
//! it. The refresher stops itself once calls go quiet for the idle cooldown,
//! which demotes the controller back to direct computation.
//!
//! `get()` never performs a transition itself. Crossing the threshold only
//! flags a request and unparks the controller's promoter thread, which
//! starts the refresher. Refresher exits are queued and applied under the
//! lifecycle lock by the promoter (or, without one, whichever thread gets
//! there first), so a refresher never blocks on the controller and the hot
//! path never waits on a transition.

use std::cell::Cell;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::thread::{JoinHandle, Thread};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cell::CacheCell;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, Prefer};
use crate::diagnostics::{ControllerState, Diagnostics, Transition, TransitionReason};
use crate::encoder::{Alphabet, EncodedTimestamp};
use crate::error::{Error, Result};
use crate::metrics::ControllerMetrics;
use crate::rate::CallRateMonitor;
use crate::refresher::{
    cooperative, worker, Activity, ExitGuard, ExitReason, RefreshContext, Refresher, Strategy,
    ThreadLauncher, WorkerLauncher,
};

const MODE_IDLE: u8 = 0;
const MODE_DIRECT: u8 = 1;
const MODE_COOPERATIVE: u8 = 2;
const MODE_WORKER: u8 = 3;

fn state_of(mode: u8) -> ControllerState {
    match mode {
        MODE_IDLE => ControllerState::Idle,
        MODE_COOPERATIVE => ControllerState::Promoted(Strategy::CooperativeLoop),
        MODE_WORKER => ControllerState::Promoted(Strategy::WorkerThread),
        _ => ControllerState::DirectCompute,
    }
}

fn mode_of(strategy: Strategy) -> u8 {
    match strategy {
        Strategy::CooperativeLoop => MODE_COOPERATIVE,
        Strategy::WorkerThread => MODE_WORKER,
    }
}

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Controller id and packed value of the last `get()` on this thread
    static LAST_HANDED_OUT: Cell<(u64, u64)> = const { Cell::new((0, 0)) };
}

/// Never hand a thread a value older than the one it last got from the
/// same controller. A direct read racing a promotion can be a millisecond
/// ahead of the freshly seeded cache.
#[inline]
fn hand_out(controller: u64, value: EncodedTimestamp) -> EncodedTimestamp {
    LAST_HANDED_OUT.with(|last| {
        let (last_controller, last_packed) = last.get();
        let packed = value.to_packed();
        if last_controller == controller && last_packed > packed {
            return EncodedTimestamp::from_packed(last_packed);
        }
        last.set((controller, packed));
        value
    })
}

/// Strategy requested by an explicit `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Worker thread when available, cooperative task otherwise
    Auto,
    /// Cooperative task
    Internal,
    /// Worker thread, falling back to the cooperative task on failure
    Worker,
}

impl StartMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartMode::Auto => "auto",
            StartMode::Internal => "internal",
            StartMode::Worker => "worker",
        }
    }
}

impl FromStr for StartMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "auto" => Ok(StartMode::Auto),
            "internal" => Ok(StartMode::Internal),
            "worker" => Ok(StartMode::Worker),
            other => Err(Error::Config(format!("unknown start mode: {}", other))),
        }
    }
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct RefresherExit {
    generation: u64,
    strategy: Strategy,
    reason: ExitReason,
}

struct ActiveRefresher {
    generation: u64,
    refresher: Refresher,
}

#[derive(Default)]
struct Lifecycle {
    active: Option<ActiveRefresher>,
    next_generation: u64,
    last_transition: Option<Transition>,
}

impl Lifecycle {
    fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

struct Shared {
    id: u64,
    config: Config,
    alphabet: Alphabet,
    clock: Arc<dyn Clock>,
    launcher: Arc<dyn WorkerLauncher>,
    runtime: Option<Handle>,
    mode: AtomicU8,
    cell: OnceCell<Arc<CacheCell>>,
    activity: Arc<Activity>,
    monitor: Mutex<CallRateMonitor>,
    lifecycle: Mutex<Lifecycle>,
    exits: Mutex<Vec<RefresherExit>>,
    exit_pending: AtomicBool,
    promotion_requested: AtomicBool,
    /// Set when automatic promotion found no refresher to start
    auto_blocked: AtomicBool,
    closed: AtomicBool,
    promoter: OnceCell<Thread>,
    worker_failed: AtomicBool,
    promotions: AtomicU64,
    demotions: AtomicU64,
    fallbacks: AtomicU64,
    metrics: ControllerMetrics,
}

impl Shared {
    fn state(&self) -> ControllerState {
        state_of(self.mode.load(Ordering::Acquire))
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock_lifecycle(&self) -> Option<MutexGuard<'_, Lifecycle>> {
        match self.lifecycle.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Record a call unless another caller holds the monitor
    #[inline]
    fn record_call(&self) -> bool {
        match self.monitor.try_lock() {
            Ok(mut monitor) => monitor.record_call(),
            Err(_) => false,
        }
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    fn worker_available(&self) -> bool {
        self.launcher.available() && !self.worker_failed.load(Ordering::Relaxed)
    }

    fn auto_strategy(&self) -> Strategy {
        if self.worker_available() {
            Strategy::WorkerThread
        } else {
            Strategy::CooperativeLoop
        }
    }

    fn refresh_context(&self) -> RefreshContext {
        let cell = self
            .cell
            .get_or_init(|| Arc::new(CacheCell::new(self.alphabet.encode(self.clock.now_millis()))))
            .clone();
        RefreshContext {
            clock: self.clock.clone(),
            alphabet: self.alphabet,
            cell,
            activity: self.activity.clone(),
            idle_cooldown: self.config.idle_cooldown,
        }
    }

    fn exit_guard(self: &Arc<Self>, generation: u64, strategy: Strategy) -> ExitGuard {
        let shared = Arc::downgrade(self);
        ExitGuard::new(move |reason| {
            if let Some(shared) = shared.upgrade() {
                shared.refresher_exited(RefresherExit {
                    generation,
                    strategy,
                    reason,
                });
            }
        })
    }

    /// Called from the exiting refresher's thread; never blocks on the lifecycle
    fn refresher_exited(self: &Arc<Self>, exit: RefresherExit) {
        {
            let mut exits = self.exits.lock().unwrap_or_else(PoisonError::into_inner);
            exits.push(exit);
            self.exit_pending.store(true, Ordering::Release);
        }
        if self.wake_promoter() {
            return;
        }
        // A refresher unwinding from a panic must not start its replacement
        // on its own thread; the next caller applies the exit instead.
        if !std::thread::panicking() {
            self.try_reconcile();
        }
    }

    /// Unpark the promoter thread, if this controller has one
    fn wake_promoter(&self) -> bool {
        match self.promoter.get() {
            Some(promoter) => {
                promoter.unpark();
                true
            }
            None => false,
        }
    }

    fn try_reconcile(self: &Arc<Self>) {
        if let Some(mut lifecycle) = self.try_lock_lifecycle() {
            self.reconcile(&mut lifecycle);
        }
    }

    /// Apply queued refresher exits. Caller holds the lifecycle lock.
    fn reconcile(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if !self.exit_pending.load(Ordering::Acquire) {
            return;
        }
        let exits = {
            let mut exits = self.exits.lock().unwrap_or_else(PoisonError::into_inner);
            self.exit_pending.store(false, Ordering::Release);
            std::mem::take(&mut *exits)
        };
        for exit in exits {
            self.handle_exit(lifecycle, exit);
        }
    }

    fn handle_exit(self: &Arc<Self>, lifecycle: &mut Lifecycle, exit: RefresherExit) {
        let current = lifecycle.active.as_ref().map(|a| a.generation);
        if current != Some(exit.generation) {
            debug!(
                name = %self.config.name,
                generation = exit.generation,
                reason = ?exit.reason,
                "ignoring exit of retired refresher"
            );
            return;
        }
        let Some(active) = lifecycle.active.take() else {
            return;
        };
        active.refresher.detach();

        let from = self.state();
        match (exit.strategy, exit.reason) {
            (Strategy::WorkerThread, ExitReason::Crashed) => {
                self.note_worker_failure("worker refresher exited unexpectedly");
                self.start_cooperative(lifecycle, from, TransitionReason::WorkerExited);
            }
            (Strategy::CooperativeLoop, ExitReason::Crashed) => {
                warn!(name = %self.config.name, "cooperative refresher exited unexpectedly");
                self.enter_direct(lifecycle, from, MODE_DIRECT, TransitionReason::CooperativeExited);
            }
            (_, ExitReason::IdleCooldown) => {
                self.enter_direct(lifecycle, from, MODE_DIRECT, TransitionReason::IdleCooldown);
            }
            (_, ExitReason::Stopped) => {
                self.enter_direct(lifecycle, from, MODE_IDLE, TransitionReason::ExplicitStop);
            }
        }
    }

    fn note_worker_failure(&self, what: &str) {
        warn!(name = %self.config.name, "{}, falling back to cooperative refresher", what);
        self.worker_failed.store(true, Ordering::Relaxed);
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_fallback();
    }

    /// Replace any active refresher with one running `target`
    fn promote(self: &Arc<Self>, lifecycle: &mut Lifecycle, target: Strategy, reason: TransitionReason) {
        let from = self.state();
        if let Some(active) = lifecycle.active.take() {
            active.refresher.stop();
        }
        match target {
            Strategy::WorkerThread => self.start_worker(lifecycle, from, reason),
            Strategy::CooperativeLoop => self.start_cooperative(lifecycle, from, reason),
        }
    }

    fn start_worker(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        from: ControllerState,
        reason: TransitionReason,
    ) {
        if !self.launcher.available() {
            self.note_worker_failure("worker threads unavailable");
            return self.start_cooperative(lifecycle, from, TransitionReason::WorkerUnavailable);
        }

        let generation = lifecycle.next_generation();
        let name = format!("tickstamp-{}", self.config.name);
        let guard = self.exit_guard(generation, Strategy::WorkerThread);
        match worker::spawn(self.refresh_context(), self.launcher.as_ref(), name, guard) {
            Ok(refresher) => {
                self.worker_failed.store(false, Ordering::Relaxed);
                lifecycle.active = Some(ActiveRefresher {
                    generation,
                    refresher,
                });
                self.enter_promoted(lifecycle, from, Strategy::WorkerThread, reason);
            }
            Err(e) => {
                warn!(name = %self.config.name, error = %e, "worker refresher failed to start");
                self.note_worker_failure("worker spawn failed");
                self.start_cooperative(lifecycle, from, TransitionReason::WorkerSpawnFailed);
            }
        }
    }

    fn start_cooperative(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        from: ControllerState,
        reason: TransitionReason,
    ) {
        let Some(runtime) = self.runtime() else {
            warn!(
                name = %self.config.name,
                "no tokio runtime for the cooperative refresher, computing directly"
            );
            return self.enter_direct(
                lifecycle,
                from,
                MODE_DIRECT,
                TransitionReason::CooperativeUnavailable,
            );
        };

        let generation = lifecycle.next_generation();
        let guard = self.exit_guard(generation, Strategy::CooperativeLoop);
        let refresher = cooperative::spawn(self.refresh_context(), &runtime, guard);
        lifecycle.active = Some(ActiveRefresher {
            generation,
            refresher,
        });
        self.enter_promoted(lifecycle, from, Strategy::CooperativeLoop, reason);
    }

    fn enter_promoted(
        &self,
        lifecycle: &mut Lifecycle,
        from: ControllerState,
        strategy: Strategy,
        reason: TransitionReason,
    ) {
        self.mode.store(mode_of(strategy), Ordering::Release);
        self.metrics.set_promoted(Some(strategy));
        self.record(lifecycle, from, ControllerState::Promoted(strategy), reason);
    }

    fn enter_direct(
        &self,
        lifecycle: &mut Lifecycle,
        from: ControllerState,
        mode: u8,
        reason: TransitionReason,
    ) {
        self.mode.store(mode, Ordering::Release);
        self.metrics.set_promoted(None);
        self.record(lifecycle, from, state_of(mode), reason);
    }

    fn record(
        &self,
        lifecycle: &mut Lifecycle,
        from: ControllerState,
        to: ControllerState,
        reason: TransitionReason,
    ) {
        if from == to {
            return;
        }
        if to.is_promoted() && !from.is_promoted() {
            self.promotions.fetch_add(1, Ordering::Relaxed);
        } else if from.is_promoted() && !to.is_promoted() {
            self.demotions.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.inc_transition(reason);
        info!(
            name = %self.config.name,
            from = %from,
            to = %to,
            reason = %reason,
            "acquisition state changed"
        );
        lifecycle.last_transition = Some(Transition { from, to, reason });
    }

    /// Flag a promotion for the promoter thread. Repeat requests coalesce.
    #[inline]
    fn request_promotion(&self) {
        if self.auto_blocked.load(Ordering::Relaxed)
            || self.promotion_requested.swap(true, Ordering::AcqRel)
        {
            return;
        }
        self.wake_promoter();
    }

    /// One promoter wakeup: apply queued exits, then any pending request
    fn run_pending(self: &Arc<Self>) {
        let mut lifecycle = self.lock_lifecycle();
        self.reconcile(&mut lifecycle);
        if self.promotion_requested.swap(false, Ordering::AcqRel) {
            self.promote_on_demand(&mut lifecycle);
            self.reconcile(&mut lifecycle);
        }
    }

    fn promote_on_demand(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        // Promoted already, or stopped since the request was raised
        if self.state() != ControllerState::DirectCompute
            || self.auto_blocked.load(Ordering::Relaxed)
            || self.closed.load(Ordering::Acquire)
        {
            return;
        }

        let target = match self.config.prefer {
            Prefer::Basic => return,
            Prefer::Internal => Strategy::CooperativeLoop,
            Prefer::Worker if !self.worker_failed.load(Ordering::Relaxed) => {
                Strategy::WorkerThread
            }
            Prefer::Worker => Strategy::CooperativeLoop,
            Prefer::Auto => self.auto_strategy(),
        };
        self.promote(lifecycle, target, TransitionReason::RateThreshold);
        if !self.state().is_promoted() {
            self.auto_blocked.store(true, Ordering::Relaxed);
            warn!(
                name = %self.config.name,
                strategy = %target,
                "no refresher could start, automatic promotion off until an explicit start"
            );
        }
    }

    fn stop(self: &Arc<Self>) {
        let mut lifecycle = self.lock_lifecycle();
        self.reconcile(&mut lifecycle);

        let from = self.state();
        let active = lifecycle.active.take();
        if from != ControllerState::Idle || active.is_some() {
            self.enter_direct(&mut lifecycle, from, MODE_IDLE, TransitionReason::ExplicitStop);
        }
        if let Some(active) = active {
            active.refresher.stop();
        }
        self.reconcile(&mut lifecycle);
    }
}

/// Builds an [`AcquisitionController`] with injected collaborators
pub struct ControllerBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    launcher: Option<Arc<dyn WorkerLauncher>>,
    runtime: Option<Handle>,
}

impl ControllerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Runtime hosting the cooperative refresher. Defaults to the runtime
    /// current at build time, if any.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the config and build the controller
    pub fn build(self) -> Result<AcquisitionController> {
        self.config.validate()?;
        let alphabet = self.config.alphabet()?;
        Ok(AcquisitionController::from_parts(
            self.config,
            alphabet,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            self.launcher.unwrap_or_else(|| Arc::new(ThreadLauncher)),
            self.runtime.or_else(|| Handle::try_current().ok()),
        ))
    }
}

/// Produces encoded timestamps, switching between direct computation and a
/// background-refreshed cache as the call rate demands.
///
/// `get()` never blocks and never fails. Dropping the controller stops any
/// running refresher.
pub struct AcquisitionController {
    shared: Arc<Shared>,
    promoter: Option<JoinHandle<()>>,
}

impl AcquisitionController {
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Default config, system clock, OS-thread workers
    pub fn with_defaults() -> Self {
        Self::from_parts(
            Config::default(),
            Alphabet::DEFAULT,
            Arc::new(SystemClock::new()),
            Arc::new(ThreadLauncher),
            Handle::try_current().ok(),
        )
    }

    pub fn builder(config: Config) -> ControllerBuilder {
        ControllerBuilder {
            config,
            clock: None,
            launcher: None,
            runtime: None,
        }
    }

    fn from_parts(
        config: Config,
        alphabet: Alphabet,
        clock: Arc<dyn Clock>,
        launcher: Arc<dyn WorkerLauncher>,
        runtime: Option<Handle>,
    ) -> Self {
        let monitor =
            CallRateMonitor::new(config.threshold_calls, config.threshold_window, clock.clone());
        debug!(
            name = %config.name,
            prefer = %config.prefer,
            threshold_calls = config.threshold_calls,
            threshold_window = ?config.threshold_window,
            idle_cooldown = ?config.idle_cooldown,
            "acquisition controller created"
        );

        let shared = Arc::new(Shared {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            metrics: ControllerMetrics::new(config.name.clone()),
            config,
            alphabet,
            clock,
            launcher,
            runtime,
            mode: AtomicU8::new(MODE_DIRECT),
            cell: OnceCell::new(),
            activity: Arc::new(Activity::default()),
            monitor: Mutex::new(monitor),
            lifecycle: Mutex::new(Lifecycle::default()),
            exits: Mutex::new(Vec::new()),
            exit_pending: AtomicBool::new(false),
            promotion_requested: AtomicBool::new(false),
            auto_blocked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            promoter: OnceCell::new(),
            worker_failed: AtomicBool::new(false),
            promotions: AtomicU64::new(0),
            demotions: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        });
        let promoter = if shared.config.prefer.auto_promotes() {
            spawn_promoter(&shared)
        } else {
            None
        };
        Self { shared, promoter }
    }

    /// The current encoded timestamp.
    ///
    /// Promoted: one atomic load of the cache, no clock read, no encode.
    /// Otherwise: read the clock and encode, possibly flagging a promotion
    /// for the promoter thread.
    #[inline]
    pub fn get(&self) -> EncodedTimestamp {
        let shared = &self.shared;
        if shared.exit_pending.load(Ordering::Acquire) && !shared.wake_promoter() {
            shared.try_reconcile();
        }

        match shared.mode.load(Ordering::Acquire) {
            MODE_COOPERATIVE | MODE_WORKER => {
                if let Some(cell) = shared.cell.get() {
                    shared.activity.touch();
                    shared.record_call();
                    return hand_out(shared.id, cell.load());
                }
            }
            MODE_IDLE => {
                let _ = shared.mode.compare_exchange(
                    MODE_IDLE,
                    MODE_DIRECT,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
            _ => {}
        }

        let value = shared.alphabet.encode(shared.clock.now_millis());
        if shared.record_call() && shared.config.prefer.auto_promotes() {
            shared.request_promotion();
        }
        hand_out(shared.id, value)
    }

    /// Promote immediately, bypassing the rate heuristic. Always retries,
    /// even after automatic promotion found nothing to start.
    pub fn start(&self, mode: StartMode) {
        let shared = &self.shared;
        let mut lifecycle = shared.lock_lifecycle();
        shared.reconcile(&mut lifecycle);

        let target = match mode {
            StartMode::Auto => shared.auto_strategy(),
            StartMode::Internal => Strategy::CooperativeLoop,
            StartMode::Worker => Strategy::WorkerThread,
        };
        if shared.state() == ControllerState::Promoted(target) {
            debug!(name = %shared.config.name, strategy = %target, "already promoted");
            return;
        }
        shared.promote(&mut lifecycle, target, TransitionReason::ExplicitStart);
        if shared.state().is_promoted() {
            shared.auto_blocked.store(false, Ordering::Relaxed);
        }
        shared.reconcile(&mut lifecycle);
    }

    /// Stop any refresher and go idle. Idempotent; no cache write happens
    /// after this returns.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> ControllerState {
        if self.shared.exit_pending.load(Ordering::Acquire) {
            self.shared.try_reconcile();
        }
        self.shared.state()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let shared = &self.shared;
        let mut lifecycle = shared.lock_lifecycle();
        shared.reconcile(&mut lifecycle);

        let state = shared.state();
        let idle_for = state.is_promoted().then(|| {
            Duration::from_nanos(
                shared
                    .clock
                    .now_nanos()
                    .saturating_sub(shared.activity.last_active_nanos()),
            )
        });

        Diagnostics {
            state,
            cached: shared.cell.get().map(|cell| cell.load()),
            worker_available: shared.worker_available(),
            worker_active: state == ControllerState::Promoted(Strategy::WorkerThread),
            cooperative_available: shared.runtime().is_some(),
            cooperative_active: state == ControllerState::Promoted(Strategy::CooperativeLoop),
            idle_for,
            last_transition: lifecycle.last_transition,
            promotions: shared.promotions.load(Ordering::Relaxed),
            demotions: shared.demotions.load(Ordering::Relaxed),
            fallbacks: shared.fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.shared.alphabet
    }
}

impl fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("name", &self.shared.config.name)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        // Retire the promoter first so nothing starts after the final stop
        self.shared.closed.store(true, Ordering::Release);
        if let Some(promoter) = self.promoter.take() {
            promoter.thread().unpark();
            if promoter.join().is_err() {
                warn!(name = %self.shared.config.name, "promoter thread panicked");
            }
        }
        self.shared.stop();
    }
}

/// Start the thread that applies promotion requests and refresher exits.
///
/// Parks between requests. Holds only a weak reference, so it never keeps
/// the controller alive.
fn spawn_promoter(shared: &Arc<Shared>) -> Option<JoinHandle<()>> {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let spawned = std::thread::Builder::new()
        .name(format!("promote-{}", shared.config.name))
        .spawn(move || loop {
            std::thread::park();
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.closed.load(Ordering::Acquire) {
                return;
            }
            shared.run_pending();
        });

    match spawned {
        Ok(handle) => {
            let _ = shared.promoter.set(handle.thread().clone());
            Some(handle)
        }
        Err(e) => {
            warn!(
                name = %shared.config.name,
                error = %e,
                "promoter thread failed to start, automatic promotion off"
            );
            shared.auto_blocked.store(true, Ordering::Relaxed);
            None
        }
    }
}
