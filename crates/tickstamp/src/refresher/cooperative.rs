//! Cooperative strategy: a task on a tokio runtime
//!
//! Re-arms itself with a short sleep every iteration, so it shares the
//! runtime's threads without ever spinning.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use super::{
    ExitGuard, ExitReason, RefreshContext, RefreshLoop, Refresher, RefresherHandle, Strategy,
    Tick, POLL_INTERVAL,
};
use crate::cell::WriteGate;

/// Seed the cell and spawn the refresh task on `runtime`
pub fn spawn(ctx: RefreshContext, runtime: &Handle, guard: ExitGuard) -> Refresher {
    let gate = Arc::new(WriteGate::new());
    let refresh = RefreshLoop::start(ctx, gate.clone());
    let handle = runtime.spawn(run(refresh, guard));
    debug!("cooperative refresher spawned");

    Refresher {
        strategy: Strategy::CooperativeLoop,
        gate,
        handle: RefresherHandle::Cooperative(handle),
    }
}

async fn run(mut refresh: RefreshLoop, guard: ExitGuard) {
    loop {
        match refresh.tick() {
            Tick::Idle => return guard.exit(ExitReason::IdleCooldown),
            Tick::Closed => return guard.exit(ExitReason::Stopped),
            Tick::Updated | Tick::Unchanged => {}
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CacheCell;
    use crate::clock::{Clock, SystemClock};
    use crate::encoder::{decode, encode, Alphabet};
    use crate::refresher::Activity;
    use crate::test_helpers::ManualClock;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keeps_cell_current() {
        let clock = Arc::new(SystemClock::new());
        let ctx = RefreshContext {
            cell: Arc::new(CacheCell::new(encode(0))),
            clock: clock.clone(),
            alphabet: Alphabet::DEFAULT,
            activity: Arc::new(Activity::default()),
            idle_cooldown: Duration::from_secs(10),
        };
        let guard = ExitGuard::new(|_| {});
        let refresher = spawn(ctx.clone(), &Handle::current(), guard);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let cached = decode(ctx.cell.load().as_str()).unwrap();
        let now = clock.now_millis();
        assert!(now - cached <= 5, "cache lagging: now={} cached={}", now, cached);

        refresher.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exits_idle_after_cooldown() {
        let clock = Arc::new(ManualClock::new(5_000));
        let ctx = RefreshContext {
            cell: Arc::new(CacheCell::new(encode(0))),
            clock: clock.clone(),
            alphabet: Alphabet::DEFAULT,
            activity: Arc::new(Activity::default()),
            idle_cooldown: Duration::from_millis(100),
        };
        let (tx, rx) = tokio::sync::oneshot::channel();
        let guard = ExitGuard::new(move |reason| {
            let _ = tx.send(reason);
        });
        let _refresher = spawn(ctx, &Handle::current(), guard);

        clock.advance(Duration::from_millis(100));
        let reason = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ExitReason::IdleCooldown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_blocks_further_writes() {
        let clock = Arc::new(ManualClock::new(5_000));
        let ctx = RefreshContext {
            cell: Arc::new(CacheCell::new(encode(0))),
            clock: clock.clone(),
            alphabet: Alphabet::DEFAULT,
            activity: Arc::new(Activity::default()),
            idle_cooldown: Duration::from_secs(60),
        };
        let refresher = spawn(ctx.clone(), &Handle::current(), ExitGuard::new(|_| {}));
        assert_eq!(ctx.cell.load(), encode(5_000));

        refresher.stop();
        clock.advance(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctx.cell.load(), encode(5_000));
    }
}
